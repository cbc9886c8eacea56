use chrono::TimeDelta;
use dht_node::{
    Clock, Config, DhtNode, IterationError, ManualClock, Message, Node, NodeID, NodeInfo,
    NodeObserver, PacketTransport, Query, QueryError, QueryKind, Response, Token,
};
use num_bigint::BigUint;
use std::{
    collections::HashSet,
    net::{Ipv4Addr, SocketAddrV4},
    sync::{Arc, Mutex},
};
use tokio_krpc::testing::Mailbox;

fn start_node(self_id: u64) -> (DhtNode, Arc<Mailbox>, Arc<ManualClock>) {
    let mailbox = Arc::new(Mailbox::new());
    let clock = Arc::new(ManualClock::starting_at_epoch());
    let config = Config {
        node_id: Some(NodeID::from(self_id)),
        ..Config::default()
    };

    let transport: Arc<dyn PacketTransport> = mailbox.clone();
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let (node, server) = DhtNode::start_with(config, transport, shared_clock, None);
    tokio::spawn(server);
    (node, mailbox, clock)
}

fn endpoint(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn decode_response(packet: &[u8]) -> Response {
    match Message::decode(packet).unwrap() {
        Message::Response(response) => response,
        other => panic!("expected a response, got {:?}", other),
    }
}

fn decode_query(packet: &[u8]) -> Query {
    match Message::decode(packet).unwrap() {
        Message::Query(query) => query,
        other => panic!("expected a query, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn answers_ping_with_our_own_id() {
    let (_node, mailbox, _clock) = start_node(1);
    let source = endpoint(8888);

    let ping = Message::Query(Query {
        transaction_id: 0x0f,
        from: NodeID::new(BigUint::from(1u8) << 120),
        kind: QueryKind::Ping,
    });
    mailbox.deliver(ping.encode().unwrap(), source);

    let (packet, target) = mailbox.next_sent().await;
    assert_eq!(target, source);

    let mut expected = b"d1:rd2:id20:".to_vec();
    expected.extend_from_slice(&[0u8; 19]);
    expected.push(1);
    expected.extend_from_slice(b"e1:t1:\x0f1:y1:re");
    assert_eq!(packet, expected);
}

#[tokio::test(start_paused = true)]
async fn find_node_returns_the_exact_node_when_known() {
    let (node, mailbox, clock) = start_node(75);

    let now = clock.now();
    node.restore_nodes(
        (0..100)
            .filter(|&id| id != 75)
            .map(|id| Node::new(NodeID::from(id), endpoint(2000 + id as u16), now)),
    );
    assert!(node.known_node(&NodeID::from(76)).is_some());

    let query = Message::Query(Query {
        transaction_id: 9,
        from: NodeID::from(555),
        kind: QueryKind::FindNode {
            target: NodeID::from(76),
        },
    });
    mailbox.deliver(query.encode().unwrap(), endpoint(8888));

    let (packet, _) = mailbox.next_sent().await;
    let response = decode_response(&packet);
    assert_eq!(response.transaction_id, 9);
    assert_eq!(response.from, NodeID::from(75));

    let nodes = response.nodes.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, NodeID::from(76));
    assert!(response.peers.is_none());
}

#[tokio::test(start_paused = true)]
async fn find_node_falls_back_to_the_closest_nodes() {
    let (node, mailbox, clock) = start_node(75);

    let now = clock.now();
    node.restore_nodes(
        (0..8u64).map(|id| Node::new(NodeID::from(id), endpoint(2000 + id as u16), now)),
    );

    let target = NodeID::new(BigUint::from(1u8) << 100);
    let query = Message::Query(Query {
        transaction_id: 10,
        from: NodeID::from(555),
        kind: QueryKind::FindNode {
            target: target.clone(),
        },
    });
    mailbox.deliver(query.encode().unwrap(), endpoint(8888));

    let (packet, _) = mailbox.next_sent().await;
    let nodes = decode_response(&packet).nodes.unwrap();
    assert_eq!(nodes.len(), 8);
    assert!(nodes.iter().all(|info| info.id != target));
}

#[tokio::test(start_paused = true)]
async fn get_peers_then_announce_then_get_peers_again() {
    let (_node, mailbox, _clock) = start_node(1);
    let source = endpoint(8888);
    let querier = NodeID::from(42);
    let target = NodeID::from(800);

    // First ask: nothing stored yet, so we get nodes plus a token.
    let ask = Message::Query(Query {
        transaction_id: 1,
        from: querier.clone(),
        kind: QueryKind::GetPeers {
            info_hash: target.clone(),
        },
    });
    mailbox.deliver(ask.encode().unwrap(), source);

    let (packet, _) = mailbox.next_sent().await;
    let first = decode_response(&packet);
    assert!(first.peers.is_none());
    let token = first.token.expect("get_peers always mints a token");

    // Announce with the captured token.
    let announce = Message::Query(Query {
        transaction_id: 2,
        from: querier.clone(),
        kind: QueryKind::AnnouncePeer {
            info_hash: target.clone(),
            port: 55,
            token,
        },
    });
    mailbox.deliver(announce.encode().unwrap(), source);

    let (packet, _) = mailbox.next_sent().await;
    let confirmation = decode_response(&packet);
    assert_eq!(confirmation.transaction_id, 2);
    assert!(confirmation.nodes.is_none());
    assert!(confirmation.peers.is_none());

    // Now the peer store answers, under the announced port.
    let ask_again = Message::Query(Query {
        transaction_id: 3,
        from: querier,
        kind: QueryKind::GetPeers { info_hash: target },
    });
    mailbox.deliver(ask_again.encode().unwrap(), source);

    let (packet, _) = mailbox.next_sent().await;
    let second = decode_response(&packet);
    assert_eq!(second.peers, Some(vec![endpoint(55)]));
    assert!(second.nodes.is_none());
    assert!(second.token.is_some());
}

#[tokio::test(start_paused = true)]
async fn announce_with_a_bad_token_is_silently_dropped() {
    let (_node, mailbox, _clock) = start_node(1);
    let source = endpoint(8888);
    let querier = NodeID::from(42);
    let target = NodeID::from(800);

    // Prime the token authority with a real get_peers first.
    let ask = Message::Query(Query {
        transaction_id: 1,
        from: querier.clone(),
        kind: QueryKind::GetPeers {
            info_hash: target.clone(),
        },
    });
    mailbox.deliver(ask.encode().unwrap(), source);
    let _ = mailbox.next_sent().await;

    let announce = Message::Query(Query {
        transaction_id: 2,
        from: querier.clone(),
        kind: QueryKind::AnnouncePeer {
            info_hash: target.clone(),
            port: 55,
            token: Token::from(5_858_585_858u64),
        },
    });
    mailbox.deliver(announce.encode().unwrap(), source);

    // The next reply out of the node is for the ping, proving the bad
    // announce produced nothing.
    let ping = Message::Query(Query {
        transaction_id: 7,
        from: querier.clone(),
        kind: QueryKind::Ping,
    });
    mailbox.deliver(ping.encode().unwrap(), source);

    let (packet, _) = mailbox.next_sent().await;
    let reply = decode_response(&packet);
    assert_eq!(reply.transaction_id, 7);

    // And the peer was never stored.
    let ask_again = Message::Query(Query {
        transaction_id: 8,
        from: querier,
        kind: QueryKind::GetPeers { info_hash: target },
    });
    mailbox.deliver(ask_again.encode().unwrap(), source);
    let (packet, _) = mailbox.next_sent().await;
    assert!(decode_response(&packet).peers.is_none());
}

#[tokio::test(start_paused = true)]
async fn successful_replies_enter_the_routing_table() {
    let (node, mailbox, _clock) = start_node(1);
    let remote = endpoint(2828);

    let call = tokio::spawn({
        let node = node.clone();
        async move { node.ping(remote, None).await }
    });

    let (packet, target) = mailbox.next_sent().await;
    let query = decode_query(&packet);
    let reply = Response {
        transaction_id: query.transaction_id,
        from: NodeID::from(9),
        ..Response::default()
    };
    mailbox.deliver(Message::Response(reply).encode().unwrap(), target);

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.from, NodeID::from(9));

    let record = node.known_node(&NodeID::from(9)).unwrap();
    assert_eq!(record.address, remote);
    assert_eq!(record.success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn observers_see_every_accepted_node() {
    struct Recorder(Mutex<Vec<NodeID>>);

    impl NodeObserver for Recorder {
        fn node_accepted(&self, node: &Node) {
            self.0
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(node.id.clone());
        }
    }

    let mailbox = Arc::new(Mailbox::new());
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let config = Config {
        node_id: Some(NodeID::from(1)),
        ..Config::default()
    };

    let transport: Arc<dyn PacketTransport> = mailbox.clone();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at_epoch());
    let (node, server) =
        DhtNode::start_with(config, transport, clock, Some(recorder.clone()));
    tokio::spawn(server);

    let call = tokio::spawn({
        let node = node.clone();
        async move { node.ping(endpoint(2828), None).await }
    });

    let (packet, target) = mailbox.next_sent().await;
    let query = decode_query(&packet);
    let reply = Response {
        transaction_id: query.transaction_id,
        from: NodeID::from(9),
        ..Response::default()
    };
    mailbox.deliver(Message::Response(reply).encode().unwrap(), target);
    call.await.unwrap().unwrap();

    let seen = recorder
        .0
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    assert_eq!(seen, vec![NodeID::from(9)]);
}

#[tokio::test(start_paused = true)]
async fn timeouts_evict_only_stale_nodes() {
    let (node, _mailbox, clock) = start_node(1);
    let shared = endpoint(7777);

    node.restore_nodes([Node::new(NodeID::from(50), shared, clock.now())]);
    clock.advance(TimeDelta::seconds(901));
    node.restore_nodes([Node::new(NodeID::from(60), shared, clock.now())]);

    // Nobody answers at that endpoint.
    let result = node.ping(shared, None).await;
    assert!(matches!(result, Err(QueryError::Timeout)));

    assert!(node.known_node(&NodeID::from(50)).is_none());
    assert!(node.known_node(&NodeID::from(60)).is_some());
}

#[tokio::test(start_paused = true)]
async fn remote_errors_count_as_failed_queries() {
    let (node, mailbox, clock) = start_node(1);
    let remote = endpoint(2828);
    node.restore_nodes([Node::new(NodeID::from(9), remote, clock.now())]);

    let call = tokio::spawn({
        let node = node.clone();
        async move { node.ping(remote, None).await }
    });

    let (packet, target) = mailbox.next_sent().await;
    let query = decode_query(&packet);
    let error = dht_node::KRPCError {
        transaction_id: query.transaction_id,
        code: dht_node::ErrorCode::Generic,
        message: "Generic Error".to_string(),
    };
    mailbox.deliver(Message::Error(error).encode().unwrap(), target);

    assert!(matches!(
        call.await.unwrap(),
        Err(QueryError::Remote(_))
    ));
    assert_eq!(node.known_node(&NodeID::from(9)).unwrap().fail_count, 1);
}

#[tokio::test(start_paused = true)]
async fn find_iterate_without_seeds_fails() {
    let (node, _mailbox, _clock) = start_node(5);
    let result = node.find_iterate(&NodeID::from(5), None, None).await;
    assert_eq!(result.unwrap_err(), IterationError::NoSeeds);
}

#[tokio::test(start_paused = true)]
async fn find_iterate_fails_when_every_query_times_out() {
    let (node, _mailbox, _clock) = start_node(5);
    let seeds: Vec<NodeInfo> = (1..=3)
        .map(|i| NodeInfo::new(NodeID::from(100 + i), endpoint(4000 + i as u16)))
        .collect();

    let result = node.find_iterate(&NodeID::from(5), Some(&seeds), None).await;
    assert_eq!(result.unwrap_err(), IterationError::AllFailed);
}

#[tokio::test(start_paused = true)]
async fn find_iterate_collects_one_node_per_seed() {
    let (node, mailbox, _clock) = start_node(5);
    let seeds: Vec<NodeInfo> = (1..=5u64)
        .map(|i| NodeInfo::new(NodeID::from(100 + i), endpoint(4000 + i as u16)))
        .collect();

    let answer = tokio::spawn({
        let mailbox = mailbox.clone();
        async move {
            for i in 0..5u64 {
                let (packet, target) = mailbox.next_sent().await;
                let query = decode_query(&packet);
                assert!(matches!(query.kind, QueryKind::FindNode { .. }));

                let learned = NodeInfo::new(NodeID::from(900 + i), endpoint(5000 + i as u16));
                let reply = Response {
                    transaction_id: query.transaction_id,
                    from: NodeID::from(100 + u64::from(target.port() - 4000)),
                    nodes: Some(vec![learned]),
                    ..Response::default()
                };
                mailbox.deliver(Message::Response(reply).encode().unwrap(), target);
            }
        }
    });

    let found = node
        .find_iterate(&NodeID::from(5), Some(&seeds), None)
        .await
        .unwrap();
    answer.await.unwrap();

    let expected: HashSet<NodeInfo> = (0..5u64)
        .map(|i| NodeInfo::new(NodeID::from(900 + i), endpoint(5000 + i as u16)))
        .collect();
    assert_eq!(found, expected);
}

#[tokio::test(start_paused = true)]
async fn get_iterate_collects_nodes_and_peers() {
    let (node, mailbox, _clock) = start_node(5);
    let seeds: Vec<NodeInfo> = (1..=2u64)
        .map(|i| NodeInfo::new(NodeID::from(100 + i), endpoint(4000 + i as u16)))
        .collect();

    let answer = tokio::spawn({
        let mailbox = mailbox.clone();
        async move {
            // One seed returns a peer, the other times out silently.
            let (packet, target) = mailbox.next_sent().await;
            let query = decode_query(&packet);
            assert!(matches!(query.kind, QueryKind::GetPeers { .. }));

            let reply = Response {
                transaction_id: query.transaction_id,
                from: NodeID::from(100 + u64::from(target.port() - 4000)),
                peers: Some(vec![endpoint(6881)]),
                token: Some(Token::from(77u8)),
                ..Response::default()
            };
            mailbox.deliver(Message::Response(reply).encode().unwrap(), target);
            let _ = mailbox.next_sent().await;
        }
    });

    let (nodes, peers) = node
        .get_iterate(&NodeID::from(5), Some(&seeds), None)
        .await
        .unwrap();
    answer.await.unwrap();

    assert!(nodes.is_empty());
    assert_eq!(peers, HashSet::from([endpoint(6881)]));
}

#[tokio::test(start_paused = true)]
async fn bootstrap_reaches_out_with_find_node_for_our_own_id() {
    let (node, mailbox, _clock) = start_node(77);
    let router = endpoint(6881);

    let answer = tokio::spawn({
        let mailbox = mailbox.clone();
        async move {
            let (packet, target) = mailbox.next_sent().await;
            let query = decode_query(&packet);
            match &query.kind {
                QueryKind::FindNode { target } => assert_eq!(target, &NodeID::from(77)),
                other => panic!("expected find_node, got {:?}", other),
            }

            let reply = Response {
                transaction_id: query.transaction_id,
                from: NodeID::from(500),
                nodes: Some(vec![NodeInfo::new(NodeID::from(501), endpoint(5001))]),
                ..Response::default()
            };
            mailbox.deliver(Message::Response(reply).encode().unwrap(), target);

            // The learned node gets the follow-up round; let it time out.
            let (packet, _) = mailbox.next_sent().await;
            let query = decode_query(&packet);
            assert!(matches!(query.kind, QueryKind::FindNode { .. }));
        }
    });

    node.bootstrap([router]).await;
    answer.await.unwrap();

    // The router answered, so it sits in the routing table now.
    assert!(node.known_node(&NodeID::from(500)).is_some());
}
