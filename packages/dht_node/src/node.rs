use crate::{
    config::Config,
    peer_store::PeerStore,
    persist::NodeObserver,
    token::TokenAuthority,
};
use futures::{Stream, StreamExt};
use krpc_encoding::{NodeID, NodeInfo, QueryKind, Response, Token};
use routing_table::{Clock, Node, RoutingTable, SystemClock};
use std::{
    collections::HashSet,
    future::Future,
    io,
    net::{SocketAddr, SocketAddrV4},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::net::UdpSocket;
use tokio_krpc::{InboundQuery, KRPCNode, PacketTransport, QueryError, SendTransport};

/// A participating node of the mainline DHT.
///
/// The handle is cheap to clone; all state sits behind shared references.
/// [`DhtNode::start`] also returns the serve future that pumps inbound
/// datagrams; the host decides where it runs and for how long.
#[derive(Clone)]
pub struct DhtNode {
    pub(crate) node_id: NodeID,
    pub(crate) config: Arc<Config>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) routing_table: Arc<Mutex<RoutingTable>>,
    pub(crate) peer_store: Arc<Mutex<PeerStore>>,
    pub(crate) tokens: Arc<Mutex<TokenAuthority>>,
    pub(crate) send_transport: Arc<SendTransport>,
    pub(crate) observer: Option<Arc<dyn NodeObserver>>,
}

impl DhtNode {
    /// Binds a UDP socket and starts a node on it.
    pub async fn bind(
        config: Config,
        bind_address: SocketAddrV4,
    ) -> io::Result<(DhtNode, impl Future<Output = ()>)> {
        let socket = UdpSocket::bind(SocketAddr::V4(bind_address)).await?;
        Ok(DhtNode::start(config, Arc::new(socket)))
    }

    /// Starts a node over an arbitrary datagram transport, with the real
    /// clock and no persistence observer.
    pub fn start(
        config: Config,
        transport: Arc<dyn PacketTransport>,
    ) -> (DhtNode, impl Future<Output = ()>) {
        DhtNode::start_with(config, transport, Arc::new(SystemClock), None)
    }

    /// Starts a node with every collaborator explicit.
    pub fn start_with(
        config: Config,
        transport: Arc<dyn PacketTransport>,
        clock: Arc<dyn Clock>,
        observer: Option<Arc<dyn NodeObserver>>,
    ) -> (DhtNode, impl Future<Output = ()>) {
        let node_id = config.node_id.clone().unwrap_or_else(NodeID::random);

        let routing_table = RoutingTable::with_split_policy(node_id.clone(), config.split_policy)
            .with_clock(clock.clone())
            .with_node_timeout(config.node_timeout);

        let (send_transport, queries) =
            KRPCNode::new(node_id.clone(), transport, config.rpc_timeout).serve();

        let node = DhtNode {
            node_id,
            peer_store: Arc::new(Mutex::new(PeerStore::new(config.peer_timeout))),
            tokens: Arc::new(Mutex::new(TokenAuthority::new(
                config.secret_timeout,
                config.token_timeout,
            ))),
            config: Arc::new(config),
            clock,
            routing_table: Arc::new(Mutex::new(routing_table)),
            send_transport: Arc::new(send_transport),
            observer,
        };

        let server = node.clone().run(queries);
        (node, server)
    }

    pub fn node_id(&self) -> &NodeID {
        &self.node_id
    }

    /// Sends a `ping` and waits for the reply.
    pub async fn ping(
        &self,
        address: SocketAddrV4,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.query(QueryKind::Ping, address, timeout).await
    }

    /// Asks `address` for the node with `target`, or its closest
    /// neighbours.
    pub async fn find_node(
        &self,
        address: SocketAddrV4,
        target: NodeID,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.query(QueryKind::FindNode { target }, address, timeout)
            .await
    }

    /// Asks `address` for peers on `target_id`, collecting an announce
    /// token either way.
    pub async fn get_peers(
        &self,
        address: SocketAddrV4,
        target_id: NodeID,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.query(
            QueryKind::GetPeers {
                info_hash: target_id,
            },
            address,
            timeout,
        )
        .await
    }

    /// Announces that this host serves `target_id` on `port`, proving the
    /// claim with a token from an earlier `get_peers`.
    pub async fn announce_peer(
        &self,
        address: SocketAddrV4,
        target_id: NodeID,
        token: Token,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.query(
            QueryKind::AnnouncePeer {
                info_hash: target_id,
                port,
                token,
            },
            address,
            timeout,
        )
        .await
    }

    /// Introduces this node to the network through already-resolved
    /// endpoints: each gets a `find_node` for our own id, and whatever
    /// that uncovers seeds one follow-up round.
    pub async fn bootstrap(&self, endpoints: impl IntoIterator<Item = SocketAddrV4>) {
        let target = self.node_id.clone();
        let queries: Vec<_> = endpoints
            .into_iter()
            .map(|endpoint| self.find_node(endpoint, target.clone(), None))
            .collect();
        let outcomes = futures::future::join_all(queries).await;

        let mut seen = HashSet::new();
        let mut learned: Vec<NodeInfo> = Vec::new();
        for response in outcomes.into_iter().flatten() {
            for info in response.nodes.into_iter().flatten() {
                if seen.insert(info.id.clone()) {
                    learned.push(info);
                }
            }
        }

        if learned.is_empty() {
            log::info!("bootstrap ended without learning any nodes");
            return;
        }

        match self.find_iterate(&target, Some(&learned), None).await {
            Ok(found) => log::info!("bootstrap learned {} nodes", found.len()),
            Err(cause) => log::info!("bootstrap iteration stopped: {}", cause),
        }
    }

    /// A copy of the routing-table record for `id`, if the table holds
    /// one.
    pub fn known_node(&self, id: &NodeID) -> Option<Node> {
        self.routing_table().get_node(id).cloned()
    }

    /// How many nodes the routing table currently holds.
    pub fn node_count(&self) -> usize {
        self.routing_table().len()
    }

    /// Replays previously persisted node records through the routing
    /// table. Returns how many were accepted.
    pub fn restore_nodes(&self, nodes: impl IntoIterator<Item = Node>) -> usize {
        let mut table = self.routing_table();
        nodes
            .into_iter()
            .filter(|node| table.offer_node(node.clone()))
            .count()
    }

    /// Sends one query and folds its outcome into the routing table: a
    /// reply refreshes (or creates) the responder's record, a timeout
    /// evicts whatever at that endpoint is no longer fresh, and a remote
    /// error counts against everything there.
    pub(crate) async fn query(
        &self,
        kind: QueryKind,
        address: SocketAddrV4,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        let origin_time = self.clock.now();
        let result = self.send_transport.send_query(kind, address, timeout).await;

        match &result {
            Ok(response) => self.record_success(response.from.clone(), address, origin_time),
            Err(QueryError::Timeout) => self.evict_unresponsive(address),
            Err(QueryError::Remote(_)) => self.record_failure(address, origin_time),
            Err(QueryError::InvalidMessage(_)) => {}
        }

        result
    }

    fn record_success(
        &self,
        id: NodeID,
        address: SocketAddrV4,
        origin_time: chrono::DateTime<chrono::Utc>,
    ) {
        let now = self.clock.now();

        let accepted = {
            let mut table = self.routing_table();
            if let Some(node) = table.get_node_mut(&id) {
                node.successful_query(origin_time, now);
                Some(node.clone())
            } else {
                let mut node = Node::new(id, address, now);
                node.successful_query(origin_time, now);
                table.offer_node(node.clone()).then_some(node)
            }
        };

        if let (Some(node), Some(observer)) = (accepted, &self.observer) {
            observer.node_accepted(&node);
        }
    }

    fn evict_unresponsive(&self, address: SocketAddrV4) {
        let now = self.clock.now();
        let mut table = self.routing_table();
        let node_timeout = table.node_timeout();

        let stale: Vec<NodeID> = table
            .get_nodes_by_address(&address)
            .into_iter()
            .filter(|node| !node.fresh(now, node_timeout))
            .map(|node| node.id.clone())
            .collect();

        for id in &stale {
            table.remove_node(id);
        }
    }

    fn record_failure(
        &self,
        address: SocketAddrV4,
        origin_time: chrono::DateTime<chrono::Utc>,
    ) {
        let now = self.clock.now();
        let mut table = self.routing_table();

        let ids: Vec<NodeID> = table
            .get_nodes_by_address(&address)
            .into_iter()
            .map(|node| node.id.clone())
            .collect();

        for id in &ids {
            if let Some(node) = table.get_node_mut(id) {
                node.failed_query(origin_time, now);
            }
        }
    }

    async fn run(self, queries: impl Stream<Item = InboundQuery>) {
        futures::pin_mut!(queries);
        while let Some(InboundQuery { query, source }) = queries.next().await {
            if let Err(cause) = self.handle_query(query, source).await {
                log::warn!("failed to answer a query from {}: {}", source, cause);
            }
        }
    }

    pub(crate) fn routing_table(&self) -> MutexGuard<'_, RoutingTable> {
        self.routing_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn peer_store(&self) -> MutexGuard<'_, PeerStore> {
        self.peer_store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn tokens(&self) -> MutexGuard<'_, TokenAuthority> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
