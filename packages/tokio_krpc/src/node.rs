use crate::{
    send_transport::SendTransport,
    transactions::{ActiveTransactions, TransactionResult},
    transport::{PacketTransport, MAX_DATAGRAM_LEN},
};
use futures::stream::{self, Stream};
use krpc_encoding::{Message, NodeID, Query};
use std::{
    io,
    net::{SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Duration,
};

/// A query read off the wire, paired with where it came from.
#[derive(Debug)]
pub struct InboundQuery {
    pub query: Query,
    pub source: SocketAddrV4,
}

/// One KRPC endpoint over a datagram transport.
pub struct KRPCNode {
    node_id: NodeID,
    transport: Arc<dyn PacketTransport>,
    default_timeout: Duration,
}

impl KRPCNode {
    pub fn new(
        node_id: NodeID,
        transport: Arc<dyn PacketTransport>,
        default_timeout: Duration,
    ) -> KRPCNode {
        KRPCNode {
            node_id,
            transport,
            default_timeout,
        }
    }

    /// Splits the node into its sending half and a stream of inbound
    /// queries.
    ///
    /// Polling the stream drives the receive loop: replies are routed to
    /// their transactions as they arrive, queries are yielded to the
    /// caller, and anything malformed or unexpected is dropped with a log
    /// event. The engine never dies on a bad datagram.
    pub fn serve(self) -> (SendTransport, impl Stream<Item = InboundQuery>) {
        let transactions = ActiveTransactions::new();
        let send_transport = SendTransport::new(
            self.transport.clone(),
            transactions.clone(),
            self.node_id,
            self.default_timeout,
        );

        let stream = stream::unfold(
            RecvState {
                transport: self.transport,
                transactions,
            },
            |state| async move {
                loop {
                    match state.recv_one().await {
                        RecvOutcome::Query(inbound) => return Some((inbound, state)),
                        RecvOutcome::Continue => continue,
                        RecvOutcome::Shutdown => return None,
                    }
                }
            },
        );

        (send_transport, stream)
    }
}

struct RecvState {
    transport: Arc<dyn PacketTransport>,
    transactions: ActiveTransactions,
}

enum RecvOutcome {
    Query(InboundQuery),
    Continue,
    Shutdown,
}

impl RecvState {
    async fn recv_one(&self) -> RecvOutcome {
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        let (len, source) = match self.transport.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(cause) if is_fatal(&cause) => {
                log::error!("datagram transport closed: {}", cause);
                return RecvOutcome::Shutdown;
            }
            Err(cause) => {
                log::warn!("error receiving datagram: {}", cause);
                return RecvOutcome::Continue;
            }
        };

        let source = match source {
            SocketAddr::V4(source) => source,
            SocketAddr::V6(source) => {
                log::debug!("dropping datagram from non-IPv4 source {}", source);
                return RecvOutcome::Continue;
            }
        };

        let message = match Message::decode(&buf[..len]) {
            Ok(message) => message,
            Err(cause) => {
                log::info!("malformed packet received from {}: {}", source, cause);
                return RecvOutcome::Continue;
            }
        };

        match message {
            Message::Query(query) => RecvOutcome::Query(InboundQuery { query, source }),
            Message::Response(response) => {
                let transaction_id = response.transaction_id;
                let routed = self
                    .transactions
                    .complete(transaction_id, TransactionResult::Response(response));
                if !routed {
                    log::info!(
                        "reply from {} does not match an outstanding query (tid {})",
                        source,
                        transaction_id
                    );
                }
                RecvOutcome::Continue
            }
            Message::Error(error) => {
                let transaction_id = error.transaction_id;
                let routed = self
                    .transactions
                    .complete(transaction_id, TransactionResult::Error(error));
                if !routed {
                    log::info!(
                        "error from {} does not match an outstanding query (tid {})",
                        source,
                        transaction_id
                    );
                }
                RecvOutcome::Continue
            }
        }
    }
}

fn is_fatal(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::QueryError, testing::Mailbox};
    use futures::StreamExt;
    use krpc_encoding::{ErrorCode, KRPCError, QueryKind, Response};
    use std::net::Ipv4Addr;

    fn endpoint(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    fn node(mailbox: &Arc<Mailbox>) -> KRPCNode {
        KRPCNode::new(
            NodeID::from(50),
            mailbox.clone() as Arc<dyn PacketTransport>,
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn a_response_completes_the_matching_transaction() {
        let mailbox = Arc::new(Mailbox::new());
        let (send_transport, stream) = node(&mailbox).serve();
        tokio::spawn(stream.for_each(|_| async {}));

        let pending = tokio::spawn({
            let mailbox = mailbox.clone();
            async move {
                let (packet, target) = mailbox.next_sent().await;
                let query = match Message::decode(&packet).unwrap() {
                    Message::Query(query) => query,
                    other => panic!("expected a query, got {:?}", other),
                };
                assert_eq!(query.kind, QueryKind::Ping);

                let reply = Response {
                    transaction_id: query.transaction_id,
                    from: NodeID::from(9),
                    ..Response::default()
                };
                mailbox.deliver(Message::Response(reply).encode().unwrap(), target);
                query.transaction_id
            }
        });

        let response = send_transport.ping(endpoint(2828), None).await.unwrap();
        assert_eq!(response.from, NodeID::from(9));
        assert!(send_transport.transactions().is_empty());

        // The same tid again is an orphan; nothing blows up.
        let transaction_id = pending.await.unwrap();
        let reply = Response {
            transaction_id,
            from: NodeID::from(9),
            ..Response::default()
        };
        mailbox.deliver(Message::Response(reply).encode().unwrap(), endpoint(2828));
        tokio::task::yield_now().await;
        assert!(send_transport.transactions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sending_registers_exactly_one_transaction() {
        let mailbox = Arc::new(Mailbox::new());
        let (send_transport, stream) = node(&mailbox).serve();
        tokio::spawn(stream.for_each(|_| async {}));

        let send_transport = Arc::new(send_transport);
        let call = tokio::spawn({
            let send_transport = send_transport.clone();
            async move { send_transport.ping(endpoint(2828), None).await }
        });

        // Let the query hit the wire, then inspect the table.
        let _ = mailbox.next_sent().await;
        assert_eq!(send_transport.transactions().len(), 1);

        // Nobody answers; the deadline resolves the call.
        let result = call.await.unwrap();
        assert!(matches!(result, Err(QueryError::Timeout)));
        assert!(send_transport.transactions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_errors_surface_as_remote() {
        let mailbox = Arc::new(Mailbox::new());
        let (send_transport, stream) = node(&mailbox).serve();
        tokio::spawn(stream.for_each(|_| async {}));

        tokio::spawn({
            let mailbox = mailbox.clone();
            async move {
                let (packet, target) = mailbox.next_sent().await;
                let message = Message::decode(&packet).unwrap();
                let reply = KRPCError {
                    transaction_id: message.transaction_id(),
                    code: ErrorCode::Server,
                    message: "Server Error".to_string(),
                };
                mailbox.deliver(Message::Error(reply).encode().unwrap(), target);
            }
        });

        let result = send_transport
            .find_node(endpoint(2828), NodeID::from(5), None)
            .await;
        match result {
            Err(QueryError::Remote(error)) => assert_eq!(error.code, ErrorCode::Server),
            other => panic!("expected a remote error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unencodable_queries_fail_without_a_transaction() {
        let mailbox = Arc::new(Mailbox::new());
        let (send_transport, _stream) = node(&mailbox).serve();

        let result = send_transport
            .find_node(
                endpoint(2828),
                NodeID::new(krpc_encoding::id_space_end()),
                None,
            )
            .await;

        assert!(matches!(result, Err(QueryError::InvalidMessage(_))));
        assert!(send_transport.transactions().is_empty());
        assert!(mailbox.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_queries_come_out_of_the_stream() {
        let mailbox = Arc::new(Mailbox::new());
        let (_send_transport, stream) = node(&mailbox).serve();
        futures::pin_mut!(stream);

        let query = Query {
            transaction_id: 50,
            from: NodeID::from(58),
            kind: QueryKind::Ping,
        };
        mailbox.deliver(
            Message::Query(query.clone()).encode().unwrap(),
            endpoint(8888),
        );
        // Garbage in between is dropped silently.
        mailbox.deliver(b"garbage".to_vec(), endpoint(8888));
        mailbox.deliver(
            Message::Query(query.clone()).encode().unwrap(),
            endpoint(8889),
        );

        let first = stream.next().await.unwrap();
        assert_eq!(first.query, query);
        assert_eq!(first.source, endpoint(8888));

        let second = stream.next().await.unwrap();
        assert_eq!(second.source, endpoint(8889));
    }
}
