use crate::{errors::RespondError, node::DhtNode};
use krpc_encoding::{NodeInfo, Query, QueryKind, Response, Token, TransactionId};
use routing_table::K;
use std::net::SocketAddrV4;

impl DhtNode {
    /// Answers one inbound query, per the four RPC contracts.
    ///
    /// Only `announce_peer` can legitimately go unanswered: an invalid
    /// token gets silence and a log event, never an error message.
    pub(crate) async fn handle_query(
        &self,
        query: Query,
        source: SocketAddrV4,
    ) -> Result<(), RespondError> {
        match query.kind.clone() {
            QueryKind::Ping => {
                self.respond(query.transaction_id, source, None, None, None)
                    .await
            }
            QueryKind::FindNode { target } => {
                let nodes = {
                    let table = self.routing_table();
                    match table.get_node(&target) {
                        // We know the wanted node itself; a singleton
                        // beats any list of neighbours.
                        Some(node) => vec![NodeInfo::from(node)],
                        None => table
                            .get_closest_nodes(&target, K)
                            .iter()
                            .map(NodeInfo::from)
                            .collect(),
                    }
                };

                self.respond(query.transaction_id, source, Some(nodes), None, None)
                    .await
            }
            QueryKind::GetPeers { info_hash } => {
                let now = self.clock.now();
                let peers = self.peer_store().get(&info_hash, now);
                let token = self
                    .tokens()
                    .generate(&query.from, &info_hash, source, now)?;

                if peers.is_empty() {
                    let nodes = self
                        .routing_table()
                        .get_closest_nodes(&info_hash, K)
                        .iter()
                        .map(NodeInfo::from)
                        .collect();
                    self.respond(
                        query.transaction_id,
                        source,
                        Some(nodes),
                        None,
                        Some(token),
                    )
                    .await
                } else {
                    self.respond(query.transaction_id, source, None, Some(peers), Some(token))
                        .await
                }
            }
            QueryKind::AnnouncePeer {
                info_hash,
                port,
                token,
            } => {
                let now = self.clock.now();
                let valid = self
                    .tokens()
                    .verify(&query.from, &info_hash, source, &token, now);

                if !valid {
                    log::info!(
                        "rejecting announce_peer from {} with an invalid token",
                        source
                    );
                    return Ok(());
                }

                // The peer is reachable at the announcing host's address
                // on whatever port the query names.
                let peer = SocketAddrV4::new(*source.ip(), port);
                self.peer_store().insert(info_hash, peer, now);
                self.respond(query.transaction_id, source, None, None, None)
                    .await
            }
        }
    }

    async fn respond(
        &self,
        transaction_id: TransactionId,
        address: SocketAddrV4,
        nodes: Option<Vec<NodeInfo>>,
        peers: Option<Vec<SocketAddrV4>>,
        token: Option<Token>,
    ) -> Result<(), RespondError> {
        let response = Response {
            transaction_id,
            from: self.node_id.clone(),
            nodes,
            peers,
            token,
        };

        self.send_transport.send_response(response, address).await?;
        Ok(())
    }
}
