use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::engine::{Engine, EngineConfig};
use crate::error::Error;
use crate::id::Id;
use crate::message::{
    encode_datagram, Body as _, FindPeerRequest, FindPeerResponse, FindValueRequest, Header,
    MessageKind, PingRequest, StoreRequest,
};
use crate::routing::K;

async fn spawn_node(initial_peer: Option<String>) -> (Arc<Engine>, JoinHandle<Result<(), Error>>) {
    let engine = Engine::bind(EngineConfig {
        listen_v4: "127.0.0.1:0".into(),
        listen_v6: "[::1]:0".into(),
        initial_peer,
        id: None,
    })
    .await
    .unwrap();

    let engine = Arc::new(engine);
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };
    (engine, runner)
}

async fn exchange(probe: &UdpSocket, datagram: &[u8], to: std::net::SocketAddr) -> Vec<u8> {
    probe.send_to(datagram, to).await.unwrap();

    let mut buf = vec![0u8; 65536];
    let (len, _) = timeout(Duration::from_secs(1), probe.recv_from(&mut buf))
        .await
        .expect("no response within a second")
        .unwrap();
    buf.truncate(len);
    buf
}

#[tokio::test]
async fn test_standalone_node_initializes_immediately() {
    let (a, runner) = spawn_node(None).await;

    assert!(a.is_initialized());
    assert_eq!(a.peer_count(), 0);

    a.abort();
    assert!(matches!(runner.await.unwrap(), Err(Error::RunAborted)));
}

#[tokio::test]
async fn test_two_node_bootstrap() {
    let (a, _ra) = spawn_node(None).await;
    let (b, _rb) = spawn_node(Some(a.local_v4().to_string())).await;

    assert!(!b.is_initialized());
    b.bootstrap().await.unwrap();
    assert!(b.is_initialized());

    // B learned A from its response; A learned B from its requests.
    assert_eq!(b.peer_count(), 1);
    assert_eq!(a.peer_count(), 1);
}

#[tokio::test]
async fn test_bootstrap_against_dead_peer_fails() {
    // Nothing listens on the probe's endpoint once it is dropped.
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dead = probe.local_addr().unwrap();
    drop(probe);

    let (b, _rb) = spawn_node(Some(dead.to_string())).await;
    assert!(matches!(
        b.bootstrap().await,
        Err(Error::InitialPeerFailedToRespond)
    ));
    assert!(!b.is_initialized());
}

#[tokio::test]
async fn test_save_then_load_on_same_node_is_local() {
    let (a, _ra) = spawn_node(None).await;

    // With no peers the replication fails, but the node keeps its own copy.
    assert!(matches!(a.save(b"k", b"v").await, Err(Error::MissingPeers)));
    assert_eq!(&a.load(b"k").await.unwrap()[..], b"v");
}

#[tokio::test]
async fn test_save_and_load_across_nodes() {
    let (a, _ra) = spawn_node(None).await;
    let (b, rb) = spawn_node(Some(a.local_v4().to_string())).await;
    b.bootstrap().await.unwrap();

    b.save(b"shared key", b"shared value").await.unwrap();

    // A fresh node that never held the value finds it on the network.
    let (c, _rc) = spawn_node(Some(a.local_v4().to_string())).await;
    c.bootstrap().await.unwrap();
    let value = c.load(b"shared key").await.unwrap();
    assert_eq!(&value[..], b"shared value");

    // The writer going away doesn't lose the value: A holds a replica.
    b.abort();
    let _ = rb.await;
    let value = c.load(b"shared key").await.unwrap();
    assert_eq!(&value[..], b"shared value");
}

#[tokio::test]
async fn test_load_of_unknown_key_reports_value_not_found() {
    let (a, _ra) = spawn_node(None).await;
    let (b, _rb) = spawn_node(Some(a.local_v4().to_string())).await;
    b.bootstrap().await.unwrap();
    let (c, _rc) = spawn_node(Some(a.local_v4().to_string())).await;
    c.bootstrap().await.unwrap();

    assert!(matches!(
        c.load(b"missing").await,
        Err(Error::ValueNotFound)
    ));
}

#[tokio::test]
async fn test_large_value_round_trip() {
    let (a, _ra) = spawn_node(None).await;
    let (b, _rb) = spawn_node(Some(a.local_v4().to_string())).await;
    b.bootstrap().await.unwrap();

    let value: Vec<u8> = (0..50_000).map(|i| (i % 251) as u8).collect();
    b.save(b"big", &value).await.unwrap();

    let (c, _rc) = spawn_node(Some(a.local_v4().to_string())).await;
    c.bootstrap().await.unwrap();
    let loaded = c.load(b"big").await.unwrap();
    assert_eq!(&loaded[..], &value[..]);
}

#[tokio::test]
async fn test_ping_is_answered_with_echoed_token() {
    let (a, _ra) = spawn_node(None).await;
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let token = Id::random();
    let datagram = encode_datagram(&Id::random(), &token, &PingRequest);
    let response = exchange(&probe, &datagram, a.local_v4()).await;

    let mut input = &response[..];
    let header = Header::decode(&mut input).unwrap();
    assert_eq!(header.kind, MessageKind::PingResponse);
    assert_eq!(header.token, token);
    assert_eq!(&header.source, a.id());
}

#[tokio::test]
async fn test_find_peer_response_excludes_requester() {
    let (a, _ra) = spawn_node(None).await;
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let probe_id = Id::random();
    let token = Id::random();
    let datagram = encode_datagram(
        &probe_id,
        &token,
        &FindPeerRequest { target: probe_id },
    );
    let response = exchange(&probe, &datagram, a.local_v4()).await;

    let mut input = &response[..];
    let header = Header::decode(&mut input).unwrap();
    assert_eq!(header.kind, MessageKind::FindPeerResponse);
    assert_eq!(header.token, token);

    // A knows only the probe itself, which must not be echoed back.
    let body = FindPeerResponse::decode(&mut input).unwrap();
    assert!(body.peers.is_empty());
    assert_eq!(a.peer_count(), 1);
}

#[tokio::test]
async fn test_find_peer_response_is_capped_at_k() {
    let (a, _ra) = spawn_node(None).await;
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Teach A about more peers than fit in one response; each ping's
    // source id lands in the routing table.
    for _ in 0..K + 5 {
        let datagram = encode_datagram(&Id::random(), &Id::random(), &PingRequest);
        exchange(&probe, &datagram, a.local_v4()).await;
    }
    assert!(a.peer_count() > K);

    let datagram = encode_datagram(
        &Id::random(),
        &Id::random(),
        &FindPeerRequest {
            target: Id::random(),
        },
    );
    let response = exchange(&probe, &datagram, a.local_v4()).await;

    let mut input = &response[..];
    let header = Header::decode(&mut input).unwrap();
    assert_eq!(header.kind, MessageKind::FindPeerResponse);
    let body = FindPeerResponse::decode(&mut input).unwrap();
    assert_eq!(body.peers.len(), K);
}

#[tokio::test]
async fn test_find_value_miss_answers_with_closest_peers() {
    let (a, _ra) = spawn_node(None).await;
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // A first learns one peer id from an inbound ping.
    let known_id = Id::random();
    let datagram = encode_datagram(&known_id, &Id::random(), &PingRequest);
    exchange(&probe, &datagram, a.local_v4()).await;

    // A value request for a key A doesn't hold falls back to routing.
    let datagram = encode_datagram(
        &Id::random(),
        &Id::random(),
        &FindValueRequest {
            target: Id::from_key(b"nowhere"),
        },
    );
    let response = exchange(&probe, &datagram, a.local_v4()).await;

    let mut input = &response[..];
    let header = Header::decode(&mut input).unwrap();
    assert_eq!(header.kind, MessageKind::FindPeerResponse);
    let body = FindPeerResponse::decode(&mut input).unwrap();
    assert_eq!(body.peers.len(), 1);
    assert_eq!(body.peers[0].id, known_id);
}

#[tokio::test]
async fn test_concurrent_saves_and_loads() {
    let (a, _ra) = spawn_node(None).await;
    let (b, _rb) = spawn_node(Some(a.local_v4().to_string())).await;
    b.bootstrap().await.unwrap();

    let saves: Vec<_> = (0..10u8)
        .map(|i| {
            let b = b.clone();
            tokio::spawn(async move { b.save(&[i], &[i; 32]).await })
        })
        .collect();
    for save in saves {
        save.await.unwrap().unwrap();
    }

    // A fresh node resolves every key over the network, in parallel.
    let (c, _rc) = spawn_node(Some(a.local_v4().to_string())).await;
    c.bootstrap().await.unwrap();

    let loads: Vec<_> = (0..10u8)
        .map(|i| {
            let c = c.clone();
            tokio::spawn(async move { (i, c.load(&[i]).await) })
        })
        .collect();
    for load in loads {
        let (i, value) = load.await.unwrap();
        assert_eq!(&value.unwrap()[..], &[i; 32]);
    }
}

#[tokio::test]
async fn test_inbound_store_request_is_served_back() {
    let (a, _ra) = spawn_node(None).await;
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let request = StoreRequest {
        key: Id::from_key(b"direct"),
        value: bytes::Bytes::from_static(b"payload"),
    };
    let datagram = encode_datagram(&Id::random(), &Id::random(), &request);
    probe.send_to(&datagram, a.local_v4()).await.unwrap();

    // A STORE has no acknowledgement; poll the store through the engine.
    timeout(Duration::from_secs(1), async {
        loop {
            match a.load(b"direct").await {
                Ok(value) => break value,
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    })
    .await
    .map(|value| assert_eq!(&value[..], b"payload"))
    .expect("store request never applied");
}

#[tokio::test]
async fn test_malformed_datagrams_are_dropped() {
    let (a, _ra) = spawn_node(None).await;
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Empty, truncated, bad version, and an unassociated response.
    probe.send_to(&[], a.local_v4()).await.unwrap();
    probe.send_to(&[0x01, 0x02], a.local_v4()).await.unwrap();
    probe.send_to(&[0x0f; 41], a.local_v4()).await.unwrap();
    let stray = encode_datagram(
        &Id::random(),
        &Id::random(),
        &FindPeerResponse::default(),
    );
    probe.send_to(&stray, a.local_v4()).await.unwrap();

    // The node keeps serving afterwards.
    let token = Id::random();
    let datagram = encode_datagram(&Id::random(), &token, &PingRequest);
    let response = exchange(&probe, &datagram, a.local_v4()).await;

    let mut input = &response[..];
    let header = Header::decode(&mut input).unwrap();
    assert_eq!(header.kind, MessageKind::PingResponse);
    assert_eq!(header.token, token);
}
