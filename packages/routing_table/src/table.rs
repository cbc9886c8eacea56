use crate::{
    bucket::{KBucket, Offer},
    clock::{Clock, SystemClock},
    node::Node,
    split::SplitPolicy,
};
use chrono::{DateTime, TimeDelta, Utc};
use krpc_encoding::NodeID;
use std::{
    collections::{HashMap, HashSet},
    net::SocketAddrV4,
    sync::Arc,
};

/// Default age past which a node stops counting as fresh.
pub const DEFAULT_NODE_TIMEOUT_SECS: i64 = 900;

/// Prefix-trie Kademlia routing table.
///
/// Leaves hold live buckets whose ranges partition the keyspace; only
/// buckets on the path containing our own id may split. Two flat indices
/// (id to endpoint, endpoint to ids) answer membership questions without
/// walking the trie; the node records themselves live in the leaves.
pub struct RoutingTable {
    node_id: NodeID,
    root: TreeNode,
    ids: HashMap<NodeID, SocketAddrV4>,
    ids_by_addr: HashMap<SocketAddrV4, HashSet<NodeID>>,
    split_policy: SplitPolicy,
    splits_performed: u32,
    node_timeout: TimeDelta,
    clock: Arc<dyn Clock>,
}

struct TreeNode {
    bucket: KBucket,
    children: Option<Box<(TreeNode, TreeNode)>>,
}

impl TreeNode {
    fn leaf(bucket: KBucket) -> TreeNode {
        TreeNode {
            bucket,
            children: None,
        }
    }
}

impl RoutingTable {
    pub fn new(node_id: NodeID) -> RoutingTable {
        RoutingTable::with_split_policy(node_id, SplitPolicy::default())
    }

    pub fn with_split_policy(node_id: NodeID, split_policy: SplitPolicy) -> RoutingTable {
        RoutingTable {
            node_id,
            root: TreeNode::leaf(KBucket::initial_bucket()),
            ids: HashMap::new(),
            ids_by_addr: HashMap::new(),
            split_policy,
            splits_performed: 0,
            node_timeout: TimeDelta::seconds(DEFAULT_NODE_TIMEOUT_SECS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> RoutingTable {
        self.clock = clock;
        self
    }

    pub fn with_node_timeout(mut self, node_timeout: TimeDelta) -> RoutingTable {
        self.node_timeout = node_timeout;
        self
    }

    pub fn node_id(&self) -> &NodeID {
        &self.node_id
    }

    pub fn node_timeout(&self) -> TimeDelta {
        self.node_timeout
    }

    /// Offers a node for storage. Returns whether the table holds the node
    /// afterwards; an id the table already knows is accepted unchanged.
    pub fn offer_node(&mut self, node: Node) -> bool {
        if self.ids.contains_key(&node.id) {
            return true;
        }

        let id = node.id.clone();
        let address = node.address;
        let now = self.clock.now();

        let mut ctx = OfferContext {
            self_id: &self.node_id,
            split_policy: self.split_policy,
            splits_performed: &mut self.splits_performed,
            now,
            node_timeout: self.node_timeout,
        };

        match offer_in(&mut self.root, node, &mut ctx) {
            OfferResult::Accepted { evicted } => {
                self.ids.insert(id.clone(), address);
                self.ids_by_addr.entry(address).or_default().insert(id);

                if let Some(evicted) = evicted {
                    self.unindex(&evicted.id, &evicted.address);
                }

                true
            }
            OfferResult::Rejected => false,
        }
    }

    /// Removes the node with this id. Returns whether it was present.
    pub fn remove_node(&mut self, id: &NodeID) -> bool {
        let address = match self.ids.get(id) {
            Some(address) => *address,
            None => return false,
        };

        remove_in(&mut self.root, id);
        self.unindex(id, &address);
        true
    }

    pub fn get_node(&self, id: &NodeID) -> Option<&Node> {
        if !self.ids.contains_key(id) {
            return None;
        }

        find_leaf(&self.root, id).get(id)
    }

    pub fn get_node_mut(&mut self, id: &NodeID) -> Option<&mut Node> {
        if !self.ids.contains_key(id) {
            return None;
        }

        find_leaf_mut(&mut self.root, id).get_mut(id)
    }

    /// All nodes sharing an endpoint. Usually zero or one, but nothing
    /// stops distinct ids answering from one address.
    pub fn get_nodes_by_address(&self, address: &SocketAddrV4) -> Vec<&Node> {
        self.ids_by_addr
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(|id| find_leaf(&self.root, id).get(id))
            .collect()
    }

    /// The `count` known nodes closest to `target` by XOR distance,
    /// ascending, ties broken by id.
    pub fn get_closest_nodes(&self, target: &NodeID, count: usize) -> Vec<Node> {
        let mut collected: Vec<&Node> = Vec::new();
        collect_closest(&self.root, target, count, &mut collected);

        collected.sort_by(|a, b| {
            a.distance(target)
                .cmp(&b.distance(target))
                .then_with(|| a.id.cmp(&b.id))
        });
        collected.truncate(count);
        collected.into_iter().cloned().collect()
    }

    /// The live buckets, left to right across the keyspace.
    pub fn buckets(&self) -> Vec<&KBucket> {
        let mut buckets = Vec::new();
        collect_buckets(&self.root, &mut buckets);
        buckets
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn unindex(&mut self, id: &NodeID, address: &SocketAddrV4) {
        self.ids.remove(id);
        if let Some(ids) = self.ids_by_addr.get_mut(address) {
            ids.remove(id);
            if ids.is_empty() {
                self.ids_by_addr.remove(address);
            }
        }
    }
}

struct OfferContext<'a> {
    self_id: &'a NodeID,
    split_policy: SplitPolicy,
    splits_performed: &'a mut u32,
    now: DateTime<Utc>,
    node_timeout: TimeDelta,
}

enum OfferResult {
    Accepted { evicted: Option<Node> },
    Rejected,
}

fn offer_in(tree_node: &mut TreeNode, node: Node, ctx: &mut OfferContext<'_>) -> OfferResult {
    if let Some(children) = &mut tree_node.children {
        let child = if children.0.bucket.key_in_range(&node.id) {
            &mut children.0
        } else {
            &mut children.1
        };
        return offer_in(child, node, ctx);
    }

    match tree_node.bucket.offer_node(node, ctx.now, ctx.node_timeout) {
        Ok(Offer::Accepted { evicted }) => OfferResult::Accepted { evicted },
        Ok(Offer::Rejected(node)) => {
            let can_split = tree_node.bucket.full()
                && tree_node.bucket.splittable()
                && tree_node.bucket.key_in_range(ctx.self_id);

            if !can_split {
                return OfferResult::Rejected;
            }

            if let Err(error) = split(tree_node, ctx) {
                log::error!("failed to split a splittable bucket: {}", error);
                return OfferResult::Rejected;
            }

            offer_in(tree_node, node, ctx)
        }
        Err(error) => {
            log::error!("routing table descent reached the wrong bucket: {}", error);
            OfferResult::Rejected
        }
    }
}

/// Turns a leaf into an interior node with two half-range children. The
/// sibling of the self-side child gets its capacity from the split policy.
fn split(tree_node: &mut TreeNode, ctx: &mut OfferContext<'_>) -> Result<(), crate::KBucketError> {
    let (mut lower, mut upper) = tree_node.bucket.split()?;

    let sibling_capacity = ctx.split_policy.sibling_capacity(*ctx.splits_performed);
    if lower.key_in_range(ctx.self_id) {
        upper.set_max_size(sibling_capacity.max(upper.max_size()));
    } else {
        lower.set_max_size(sibling_capacity.max(lower.max_size()));
    }

    *ctx.splits_performed += 1;
    tree_node.children = Some(Box::new((TreeNode::leaf(lower), TreeNode::leaf(upper))));
    Ok(())
}

fn remove_in(tree_node: &mut TreeNode, id: &NodeID) {
    match &mut tree_node.children {
        None => {
            tree_node.bucket.remove_node(id);
        }
        Some(children) => {
            if children.0.bucket.key_in_range(id) {
                remove_in(&mut children.0, id);
            } else {
                remove_in(&mut children.1, id);
            }
        }
    }
}

fn find_leaf<'a>(tree_node: &'a TreeNode, id: &NodeID) -> &'a KBucket {
    match &tree_node.children {
        None => &tree_node.bucket,
        Some(children) => {
            if children.0.bucket.key_in_range(id) {
                find_leaf(&children.0, id)
            } else {
                find_leaf(&children.1, id)
            }
        }
    }
}

fn find_leaf_mut<'a>(tree_node: &'a mut TreeNode, id: &NodeID) -> &'a mut KBucket {
    match &mut tree_node.children {
        None => &mut tree_node.bucket,
        Some(children) => {
            if children.0.bucket.key_in_range(id) {
                find_leaf_mut(&mut children.0, id)
            } else {
                find_leaf_mut(&mut children.1, id)
            }
        }
    }
}

/// Descends toward the leaf whose range holds `target`, then sweeps the
/// sibling subtrees on the way back out until enough candidates are
/// gathered.
fn collect_closest<'a>(
    tree_node: &'a TreeNode,
    target: &NodeID,
    want: usize,
    collected: &mut Vec<&'a Node>,
) {
    if collected.len() >= want {
        return;
    }

    match &tree_node.children {
        None => collected.extend(tree_node.bucket.nodes()),
        Some(children) => {
            let (near, far) = if children.0.bucket.key_in_range(target) {
                (&children.0, &children.1)
            } else {
                (&children.1, &children.0)
            };

            collect_closest(near, target, want, collected);
            collect_closest(far, target, want, collected);
        }
    }
}

fn collect_buckets<'a>(tree_node: &'a TreeNode, buckets: &mut Vec<&'a KBucket>) {
    match &tree_node.children {
        None => buckets.push(&tree_node.bucket),
        Some(children) => {
            collect_buckets(&children.0, buckets);
            collect_buckets(&children.1, buckets);
        }
    }
}
