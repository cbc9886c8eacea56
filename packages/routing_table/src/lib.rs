//! Kademlia routing table: node statistics records, k-buckets, and the
//! prefix trie that keeps detailed coverage of the keyspace near our own
//! id.
//!
//! There will be more buckets closer to our identifier; only buckets on
//! the path containing it are allowed to split, so the table tapers off
//! with distance.

mod bucket;
mod clock;
mod errors;
mod node;
mod split;
mod table;

pub use crate::{
    bucket::{KBucket, Offer, K},
    clock::{Clock, ManualClock, SystemClock},
    errors::KBucketError,
    node::Node,
    split::SplitPolicy,
    table::{RoutingTable, DEFAULT_NODE_TIMEOUT_SECS},
};
