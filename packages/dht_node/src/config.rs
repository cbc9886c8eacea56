use chrono::TimeDelta;
use krpc_encoding::NodeID;
use routing_table::SplitPolicy;
use std::time::Duration;

/// Default UDP port for a bespoke node.
pub const DHT_PORT: u16 = 1800;

/// Port the well-known public routers listen on.
pub const PUBLIC_DHT_PORT: u16 = 6881;

/// How long an RPC waits for its reply.
pub const RPC_TIMEOUT_SECS: u64 = 30;

/// Deadline for the queries a high-level search issues.
pub const QUERY_TIMEOUT_SECS: u64 = 60;

/// Age past which a node stops counting as fresh.
pub const NODE_TIMEOUT_SECS: i64 = 900;

/// How long hosts that stage newly observed nodes hold them back.
pub const QUARANTINE_TIMEOUT_SECS: i64 = 180;

/// Age past which an announced peer drops out of the peer store.
pub const PEER_TIMEOUT_SECS: i64 = 43_200;

/// How often the token secret rotates.
pub const SECRET_TIMEOUT_SECS: i64 = 300;

/// Lifetime of an issued announce token.
pub const TOKEN_TIMEOUT_SECS: i64 = 600;

/// Public routers a host can resolve and hand to `bootstrap`. The core
/// itself never touches DNS.
pub const DEFAULT_BOOTSTRAP_HOSTS: &[(&str, u16)] = &[
    ("dht.transmissionbt.com", PUBLIC_DHT_PORT),
    ("router.utorrent.com", PUBLIC_DHT_PORT),
    ("router.bittorrent.com", PUBLIC_DHT_PORT),
];

/// Tunables for a node. Every timing constant of the protocol is a field;
/// the defaults are the protocol's standard values.
#[derive(Clone, Debug)]
pub struct Config {
    /// Identity to run under; a random id is drawn when absent.
    pub node_id: Option<NodeID>,

    /// How bucket capacities are assigned on splits.
    pub split_policy: SplitPolicy,

    pub rpc_timeout: Duration,
    pub query_timeout: Duration,
    pub node_timeout: TimeDelta,

    /// Carried for hosts that quarantine newly seen nodes before offering
    /// them; the core does not consult it.
    pub quarantine_timeout: TimeDelta,

    pub peer_timeout: TimeDelta,
    pub secret_timeout: TimeDelta,
    pub token_timeout: TimeDelta,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            node_id: None,
            split_policy: SplitPolicy::default(),
            rpc_timeout: Duration::from_secs(RPC_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(QUERY_TIMEOUT_SECS),
            node_timeout: TimeDelta::seconds(NODE_TIMEOUT_SECS),
            quarantine_timeout: TimeDelta::seconds(QUARANTINE_TIMEOUT_SECS),
            peer_timeout: TimeDelta::seconds(PEER_TIMEOUT_SECS),
            secret_timeout: TimeDelta::seconds(SECRET_TIMEOUT_SECS),
            token_timeout: TimeDelta::seconds(TOKEN_TIMEOUT_SECS),
        }
    }
}
