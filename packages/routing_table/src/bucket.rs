use crate::{errors::KBucketError, node::Node};
use chrono::{DateTime, TimeDelta, Utc};
use krpc_encoding::{id_space_end, NodeID};
use num_bigint::BigUint;

/// Standard bucket capacity, the `k` of Kademlia.
pub const K: usize = 8;

/// Outcome of offering a node to a bucket.
#[derive(Debug)]
pub enum Offer {
    /// The node is stored. If taking it meant evicting a worse member,
    /// the evicted record rides along so the owner can drop its indices.
    Accepted { evicted: Option<Node> },

    /// The bucket is full of members at least as good; the node comes
    /// back to the caller untouched.
    Rejected(Node),
}

/// A k-bucket: a bounded set of nodes whose ids fall in the half-open
/// range `[range_min, range_max)`.
#[derive(Clone, Debug)]
pub struct KBucket {
    range_min: BigUint,
    range_max: BigUint,
    max_size: usize,
    nodes: Vec<Node>,
}

impl KBucket {
    pub fn new(
        range_min: BigUint,
        range_max: BigUint,
        max_size: usize,
    ) -> Result<KBucket, KBucketError> {
        if range_min >= range_max {
            return Err(KBucketError::EmptyRange);
        }

        Ok(KBucket {
            range_min,
            range_max,
            max_size,
            nodes: Vec::new(),
        })
    }

    /// The bucket covering the whole keyspace, as a fresh table starts.
    pub fn initial_bucket() -> KBucket {
        KBucket {
            range_min: BigUint::from(0u8),
            range_max: id_space_end(),
            max_size: K,
            nodes: Vec::new(),
        }
    }

    pub fn key_in_range(&self, key: &NodeID) -> bool {
        let key = key.as_biguint();
        &self.range_min <= key && key < &self.range_max
    }

    /// Takes the node if its id is new and there is room, or if it is
    /// better than the worst current member. Re-offering a known id is
    /// accepted without change.
    pub fn offer_node(
        &mut self,
        node: Node,
        now: DateTime<Utc>,
        node_timeout: TimeDelta,
    ) -> Result<Offer, KBucketError> {
        if !self.key_in_range(&node.id) {
            return Err(KBucketError::OutOfRange);
        }

        if self.nodes.iter().any(|member| member.id == node.id) {
            return Ok(Offer::Accepted { evicted: None });
        }

        let evicted = if self.full() {
            let worst = match self.worst_node_index(now, node_timeout) {
                Some(index) => index,
                None => return Ok(Offer::Rejected(node)),
            };

            if !node.better_than(&self.nodes[worst], now, node_timeout) {
                return Ok(Offer::Rejected(node));
            }

            Some(self.nodes.swap_remove(worst))
        } else {
            None
        };

        self.nodes.push(node);
        Ok(Offer::Accepted { evicted })
    }

    /// Whether the range is wide enough to split in half; each half must
    /// cover more than two ids.
    pub fn splittable(&self) -> bool {
        let half_width = (&self.range_max - &self.range_min) >> 1;
        half_width > BigUint::from(2u8)
    }

    /// Splits into two buckets of the same capacity, each covering half of
    /// this bucket's range, and distributes the members by id. This bucket
    /// is left empty with capacity zero; its range keeps guiding trie
    /// descent.
    pub fn split(&mut self) -> Result<(KBucket, KBucket), KBucketError> {
        if !self.splittable() {
            return Err(KBucketError::NotSplittable);
        }

        let mid: BigUint = &self.range_min + ((&self.range_max - &self.range_min) >> 1);
        let mut lower = KBucket::new(self.range_min.clone(), mid.clone(), self.max_size)?;
        let mut upper = KBucket::new(mid, self.range_max.clone(), self.max_size)?;

        for node in self.nodes.drain(..) {
            let half = if lower.key_in_range(&node.id) {
                &mut lower
            } else {
                &mut upper
            };

            if half.full() {
                log::warn!("dropping node {} while splitting a bucket", node.id);
                continue;
            }

            half.nodes.push(node);
        }

        self.max_size = 0;
        Ok((lower, upper))
    }

    pub fn get(&self, id: &NodeID) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    pub fn get_mut(&mut self, id: &NodeID) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| &node.id == id)
    }

    pub fn remove_node(&mut self, id: &NodeID) -> Option<Node> {
        let index = self.nodes.iter().position(|node| &node.id == id)?;
        Some(self.nodes.swap_remove(index))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The member whose last exchange is longest ago, for refresh sweeps.
    pub fn stalest_node(&self) -> Option<&Node> {
        self.nodes.iter().min_by_key(|node| node.last_updated)
    }

    pub fn full(&self) -> bool {
        self.nodes.len() >= self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    pub fn range(&self) -> (&BigUint, &BigUint) {
        (&self.range_min, &self.range_max)
    }

    /// The member that no other member is strictly better than.
    fn worst_node_index(&self, now: DateTime<Utc>, node_timeout: TimeDelta) -> Option<usize> {
        let mut worst = 0;
        for index in 1..self.nodes.len() {
            if self.nodes[worst].better_than(&self.nodes[index], now, node_timeout) {
                worst = index;
            }
        }

        if self.nodes.is_empty() {
            None
        } else {
            Some(worst)
        }
    }
}
