//! A participating node of the BitTorrent mainline DHT.
//!
//! [`DhtNode`] answers the four KRPC queries, maintains a routing table of
//! peers near its own id, and mounts parallel iterative lookups on behalf
//! of the host. The host owns the event loop: [`DhtNode::start`] hands
//! back the serve future along with the handle, and bootstrap endpoints
//! arrive already resolved.

mod config;
mod errors;
mod iterate;
mod node;
mod peer_store;
mod persist;
mod responder;
mod search;
mod token;

pub use crate::{
    config::{
        Config, DEFAULT_BOOTSTRAP_HOSTS, DHT_PORT, NODE_TIMEOUT_SECS, PEER_TIMEOUT_SECS,
        PUBLIC_DHT_PORT, QUARANTINE_TIMEOUT_SECS, QUERY_TIMEOUT_SECS, RPC_TIMEOUT_SECS,
        SECRET_TIMEOUT_SECS, TOKEN_TIMEOUT_SECS,
    },
    errors::IterationError,
    node::DhtNode,
    peer_store::PeerStore,
    persist::NodeObserver,
    search::LiveSearch,
    token::TokenAuthority,
};

pub use krpc_encoding::{
    ErrorCode, KRPCError, Message, NodeID, NodeInfo, Query, QueryKind, Response, Token,
};
pub use routing_table::{
    Clock, KBucket, ManualClock, Node, RoutingTable, SplitPolicy, SystemClock, K,
};
pub use tokio_krpc::{PacketTransport, QueryError};
