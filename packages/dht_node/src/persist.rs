use routing_table::Node;

/// Hook for hosts that keep routing-table contents across restarts.
///
/// The engine calls [`NodeObserver::node_accepted`] with every record the
/// routing table takes, refreshed statistics included, so a host can
/// serialize it under the node's id. On startup the stored records go
/// back in through [`crate::DhtNode::restore_nodes`].
pub trait NodeObserver: Send + Sync {
    fn node_accepted(&self, node: &Node);
}
