use crate::node::DhtNode;
use krpc_encoding::{NodeID, NodeInfo, QueryKind};
use routing_table::K;
use std::{
    collections::HashSet,
    net::SocketAddrV4,
    sync::{Arc, Mutex, MutexGuard},
};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// A peer search that keeps reporting as results stream in.
///
/// Listeners registered before completion fire on every batch of appended
/// results and one final time when the search marks itself complete.
pub struct LiveSearch {
    target: NodeID,
    inner: Mutex<SearchInner>,
}

struct SearchInner {
    results: Vec<SocketAddrV4>,
    queried: HashSet<NodeID>,
    outstanding: usize,
    complete: bool,
    listeners: Vec<Listener>,
}

impl LiveSearch {
    fn new(target: NodeID) -> LiveSearch {
        LiveSearch {
            target,
            inner: Mutex::new(SearchInner {
                results: Vec::new(),
                queried: HashSet::new(),
                outstanding: 0,
                complete: false,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn target(&self) -> &NodeID {
        &self.target
    }

    /// Every peer reported so far.
    pub fn results(&self) -> Vec<SocketAddrV4> {
        self.lock().results.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Registers a callback fired on every append and on completion.
    pub fn register_listener<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().listeners.push(Arc::new(listener));
    }

    pub(crate) fn add_results(&self, peers: impl IntoIterator<Item = SocketAddrV4>) {
        let listeners = {
            let mut inner = self.lock();
            assert!(
                !inner.complete,
                "results appended to a completed search"
            );
            inner.results.extend(peers);
            inner.listeners.clone()
        };

        for listener in listeners {
            listener();
        }
    }

    pub(crate) fn mark_completed(&self) {
        let listeners = {
            let mut inner = self.lock();
            inner.complete = true;
            inner.listeners.clone()
        };

        for listener in listeners {
            listener();
        }
    }

    /// Claims `id` for querying. False when it was already visited, so
    /// the frontier never doubles back.
    pub(crate) fn claim_query(&self, id: &NodeID) -> bool {
        let mut inner = self.lock();
        if !inner.queried.insert(id.clone()) {
            return false;
        }

        inner.outstanding += 1;
        true
    }

    /// Releases one claimed query; true when it was the last one out.
    pub(crate) fn release_query(&self) -> bool {
        let mut inner = self.lock();
        inner.outstanding -= 1;
        inner.outstanding == 0
    }

    fn lock(&self) -> MutexGuard<'_, SearchInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DhtNode {
    /// Starts a live peer search for `target`, walking outward from the
    /// closest known nodes and querying each newly learned node once.
    ///
    /// Must be called within a tokio runtime; the search runs on spawned
    /// tasks and the returned handle observes it.
    pub fn search(&self, target: NodeID) -> Arc<LiveSearch> {
        let search = Arc::new(LiveSearch::new(target.clone()));

        let seeds: Vec<NodeInfo> = self
            .routing_table()
            .get_closest_nodes(&target, K)
            .iter()
            .map(NodeInfo::from)
            .collect();

        if seeds.is_empty() {
            search.mark_completed();
            return search;
        }

        self.continue_search(&search, seeds);
        search
    }

    fn continue_search(&self, search: &Arc<LiveSearch>, nodes: Vec<NodeInfo>) {
        for info in nodes {
            if !search.claim_query(&info.id) {
                continue;
            }

            let node = self.clone();
            let search = search.clone();
            tokio::spawn(async move {
                let outcome = node
                    .query(
                        QueryKind::GetPeers {
                            info_hash: search.target().clone(),
                        },
                        info.address,
                        Some(node.config.query_timeout),
                    )
                    .await;

                match outcome {
                    Ok(response) => {
                        if let Some(peers) = response.peers {
                            search.add_results(peers);
                        }
                        if let Some(nodes) = response.nodes {
                            // Widen the frontier before releasing this
                            // query, so completion can't fire early.
                            node.continue_search(&search, nodes);
                        }
                    }
                    Err(cause) => log::debug!("live search query failed: {}", cause),
                }

                if search.release_query() {
                    search.mark_completed();
                }
            });
        }
    }
}
