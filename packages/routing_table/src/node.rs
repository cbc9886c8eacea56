use chrono::{DateTime, TimeDelta, Utc};
use krpc_encoding::{NodeID, NodeInfo};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddrV4, time::Duration};

/// A remote node tracked by the routing table, along with the statistics
/// that drive the replacement policy.
///
/// Identity is the id alone; two records with the same id describe the same
/// node. `last_updated` moves on every successful or failed exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeID,
    pub address: SocketAddrV4,
    pub last_updated: DateTime<Utc>,
    pub total_rtt: Duration,
    pub success_count: u32,
    pub fail_count: u32,
}

impl Node {
    pub fn new(id: NodeID, address: SocketAddrV4, now: DateTime<Utc>) -> Node {
        Node {
            id,
            address,
            last_updated: now,
            total_rtt: Duration::ZERO,
            success_count: 0,
            fail_count: 0,
        }
    }

    /// Records a properly answered query that originated at `origin_time`.
    /// The elapsed time feeds the running round-trip average.
    pub fn successful_query(&mut self, origin_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.touch(origin_time, now);
        self.success_count += 1;
    }

    /// Records a query that came back as an error. Counts against the
    /// round-trip average, so erroring nodes sort behind clean ones.
    pub fn failed_query(&mut self, origin_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.touch(origin_time, now);
        self.fail_count += 1;
    }

    fn touch(&mut self, origin_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.last_updated = now;
        self.total_rtt += (now - origin_time).to_std().unwrap_or(Duration::ZERO);
    }

    /// A node is fresh while its last exchange is at most `node_timeout`
    /// old.
    pub fn fresh(&self, now: DateTime<Utc>, node_timeout: TimeDelta) -> bool {
        now - self.last_updated <= node_timeout
    }

    /// Average round trip over all completed exchanges; `None` when nothing
    /// has completed yet, which orders as slower than any measurement.
    pub fn average_rtt(&self) -> Option<Duration> {
        let replies = self.success_count + self.fail_count;
        if replies == 0 {
            return None;
        }

        Some(self.total_rtt / replies)
    }

    /// Replacement preference: fresh beats stale, and among fresh nodes a
    /// strictly smaller average round trip wins. Everything else, ties
    /// included, is not preferable.
    pub fn better_than(&self, other: &Node, now: DateTime<Utc>, node_timeout: TimeDelta) -> bool {
        if !self.fresh(now, node_timeout) {
            return false;
        }

        if !other.fresh(now, node_timeout) {
            return true;
        }

        match (self.average_rtt(), other.average_rtt()) {
            (Some(mine), Some(theirs)) => mine < theirs,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn distance(&self, target: &NodeID) -> BigUint {
        self.id.distance(target)
    }
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> NodeInfo {
        NodeInfo::new(node.id.clone(), node.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn node_timeout() -> TimeDelta {
        TimeDelta::seconds(900)
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    fn node(id: u64) -> Node {
        Node::new(
            NodeID::from(id),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, id as u16),
            epoch(),
        )
    }

    #[test]
    fn freshness_expires_after_the_node_timeout() {
        let n = node(1);
        assert!(n.fresh(epoch() + node_timeout(), node_timeout()));
        assert!(!n.fresh(epoch() + node_timeout() + TimeDelta::seconds(1), node_timeout()));
    }

    #[test]
    fn successful_queries_accumulate_rtt() {
        let mut n = node(1);
        n.successful_query(epoch(), epoch() + TimeDelta::seconds(2));
        n.successful_query(epoch() + TimeDelta::seconds(2), epoch() + TimeDelta::seconds(6));
        assert_eq!(n.success_count, 2);
        assert_eq!(n.average_rtt(), Some(Duration::from_secs(3)));
        assert_eq!(n.last_updated, epoch() + TimeDelta::seconds(6));
    }

    #[test]
    fn unmeasured_nodes_have_no_average() {
        assert_eq!(node(1).average_rtt(), None);
    }

    #[test]
    fn fresh_beats_stale() {
        let fresh = node(1);
        let stale = node(2);
        let now = epoch() + node_timeout() + TimeDelta::seconds(1);

        let mut refreshed = fresh.clone();
        refreshed.successful_query(now, now);

        assert!(refreshed.better_than(&stale, now, node_timeout()));
        assert!(!stale.better_than(&refreshed, now, node_timeout()));
    }

    #[test]
    fn lower_rtt_wins_between_fresh_nodes() {
        let now = epoch() + TimeDelta::seconds(10);
        let mut quick = node(1);
        quick.successful_query(now - TimeDelta::seconds(1), now);
        let mut slow = node(2);
        slow.successful_query(now - TimeDelta::seconds(5), now);

        assert!(quick.better_than(&slow, now, node_timeout()));
        assert!(!slow.better_than(&quick, now, node_timeout()));
    }

    #[test]
    fn equal_fresh_nodes_are_not_preferable_either_way() {
        let a = node(1);
        let b = node(2);
        let now = epoch();
        assert!(!a.better_than(&b, now, node_timeout()));
        assert!(!b.better_than(&a, now, node_timeout()));
    }

    #[test]
    fn a_measured_fresh_node_beats_an_unmeasured_one() {
        let now = epoch() + TimeDelta::seconds(1);
        let mut measured = node(1);
        measured.successful_query(epoch(), now);
        let unmeasured = node(2);

        assert!(measured.better_than(&unmeasured, now, node_timeout()));
        assert!(!unmeasured.better_than(&measured, now, node_timeout()));
    }
}
