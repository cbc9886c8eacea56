use crate::{
    errors::QueryError,
    transactions::{ActiveTransactions, TransactionResult},
    transport::PacketTransport,
};
use krpc_encoding::{Message, NodeID, Query, QueryKind, Response, Token};
use std::{net::SocketAddrV4, sync::Arc, time::Duration};
use tokio::time;

/// The sending half of a KRPC node: builds queries, records transactions,
/// and waits for the matching reply or the deadline, whichever wins.
pub struct SendTransport {
    transport: Arc<dyn PacketTransport>,
    transactions: ActiveTransactions,
    node_id: NodeID,
    default_timeout: Duration,
}

impl SendTransport {
    pub(crate) fn new(
        transport: Arc<dyn PacketTransport>,
        transactions: ActiveTransactions,
        node_id: NodeID,
        default_timeout: Duration,
    ) -> SendTransport {
        SendTransport {
            transport,
            transactions,
            node_id,
            default_timeout,
        }
    }

    pub fn node_id(&self) -> &NodeID {
        &self.node_id
    }

    /// Sends `kind` to `address` and waits for the outcome.
    ///
    /// The query goes out stamped with our node id and a transaction id
    /// unique among live queries. Encoding failures surface immediately
    /// and leave no transaction behind. Transmission is fire-and-forget;
    /// a lost datagram is indistinguishable from a silent peer and ends
    /// in [`QueryError::Timeout`].
    pub async fn send_query(
        &self,
        kind: QueryKind,
        address: SocketAddrV4,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let (transaction_id, completion) = self.transactions.claim(address);

        let query = Query {
            transaction_id,
            from: self.node_id.clone(),
            kind,
        };

        let packet = match Message::Query(query).encode() {
            Ok(packet) => packet,
            Err(cause) => {
                self.transactions.abandon(transaction_id);
                return Err(cause.into());
            }
        };

        if let Err(cause) = self.transport.send_to(&packet, address).await {
            log::warn!("failed to send datagram to {}: {}", address, cause);
        }

        match time::timeout(timeout, completion).await {
            Ok(Ok(TransactionResult::Response(response))) => Ok(response),
            Ok(Ok(TransactionResult::Error(error))) => Err(QueryError::Remote(error)),
            // The slot vanished without completing; treat it like silence.
            Ok(Err(_)) => Err(QueryError::Timeout),
            Err(_) => {
                self.transactions.abandon(transaction_id);
                Err(QueryError::Timeout)
            }
        }
    }

    pub async fn ping(
        &self,
        address: SocketAddrV4,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.send_query(QueryKind::Ping, address, timeout).await
    }

    pub async fn find_node(
        &self,
        address: SocketAddrV4,
        target: NodeID,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.send_query(QueryKind::FindNode { target }, address, timeout)
            .await
    }

    pub async fn get_peers(
        &self,
        address: SocketAddrV4,
        info_hash: NodeID,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.send_query(QueryKind::GetPeers { info_hash }, address, timeout)
            .await
    }

    pub async fn announce_peer(
        &self,
        address: SocketAddrV4,
        info_hash: NodeID,
        token: Token,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Response, QueryError> {
        self.send_query(
            QueryKind::AnnouncePeer {
                info_hash,
                port,
                token,
            },
            address,
            timeout,
        )
        .await
    }

    /// Sends a reply to an inbound query. Encoding problems surface to the
    /// responder; transmission failures are logged and forgotten.
    pub async fn send_response(
        &self,
        response: Response,
        address: SocketAddrV4,
    ) -> Result<(), QueryError> {
        let packet = Message::Response(response).encode()?;
        if let Err(cause) = self.transport.send_to(&packet, address).await {
            log::warn!("failed to send response to {}: {}", address, cause);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn transactions(&self) -> &ActiveTransactions {
        &self.transactions
    }
}
