use crate::{errors::IterationError, node::DhtNode};
use krpc_encoding::{NodeID, NodeInfo, QueryKind};
use routing_table::K;
use std::{collections::HashSet, net::SocketAddrV4, time::Duration};

#[derive(Clone, Copy)]
enum IterateRpc {
    FindNode,
    GetPeers,
}

impl DhtNode {
    /// One fan-out round of `find_node` toward `target`. Returns the
    /// union of nodes the responders handed back.
    pub async fn find_iterate(
        &self,
        target: &NodeID,
        seeds: Option<&[NodeInfo]>,
        timeout: Option<Duration>,
    ) -> Result<HashSet<NodeInfo>, IterationError> {
        let (nodes, _peers) = self
            .iterate(IterateRpc::FindNode, target, seeds, timeout)
            .await?;
        Ok(nodes)
    }

    /// One fan-out round of `get_peers` toward `target`. Returns both the
    /// nodes and the peers learned.
    pub async fn get_iterate(
        &self,
        target: &NodeID,
        seeds: Option<&[NodeInfo]>,
        timeout: Option<Duration>,
    ) -> Result<(HashSet<NodeInfo>, HashSet<SocketAddrV4>), IterationError> {
        self.iterate(IterateRpc::GetPeers, target, seeds, timeout)
            .await
    }

    async fn iterate(
        &self,
        rpc: IterateRpc,
        target: &NodeID,
        seeds: Option<&[NodeInfo]>,
        timeout: Option<Duration>,
    ) -> Result<(HashSet<NodeInfo>, HashSet<SocketAddrV4>), IterationError> {
        let seeds = match seeds {
            Some(seeds) => seeds.to_vec(),
            None => self
                .routing_table()
                .get_closest_nodes(target, K)
                .iter()
                .map(NodeInfo::from)
                .collect(),
        };

        // One query per node, however many endpoints it was seen under.
        let mut seen = HashSet::new();
        let seeds: Vec<NodeInfo> = seeds
            .into_iter()
            .filter(|info| seen.insert(info.id.clone()))
            .collect();

        if seeds.is_empty() {
            return Err(IterationError::NoSeeds);
        }

        let queries = seeds.iter().map(|info| {
            let kind = match rpc {
                IterateRpc::FindNode => QueryKind::FindNode {
                    target: target.clone(),
                },
                IterateRpc::GetPeers => QueryKind::GetPeers {
                    info_hash: target.clone(),
                },
            };
            self.query(kind, info.address, timeout)
        });
        let outcomes = futures::future::join_all(queries).await;

        let mut new_nodes = HashSet::new();
        let mut new_peers = HashSet::new();
        let mut any_succeeded = false;

        for outcome in outcomes {
            match outcome {
                Ok(response) => {
                    any_succeeded = true;
                    new_nodes.extend(response.nodes.into_iter().flatten());
                    new_peers.extend(response.peers.into_iter().flatten());
                }
                // Individual failures contribute nothing; the round only
                // fails when nobody answers.
                Err(cause) => log::debug!("iterate query failed: {}", cause),
            }
        }

        if !any_succeeded {
            return Err(IterationError::AllFailed);
        }

        Ok((new_nodes, new_peers))
    }
}
