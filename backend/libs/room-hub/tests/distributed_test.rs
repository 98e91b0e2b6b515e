//! Distributed backend over the in-memory broker.
//!
//! Two backends sharing one `MemoryBroker` stand in for two server processes
//! sharing one Redis.

use bytes::Bytes;
use room_hub::{
    memory_transport, ActiveConnection, Backend, BackendKind, ChannelName, ConnectionHandle,
    ConnectionState, Connector, DistributedBackend, HubConfig, HubError, MemoryBroker, MemoryPeer,
    Message,
};
use std::sync::Arc;
use std::time::Duration;

fn room(name: &str) -> ChannelName {
    ChannelName::new(name).unwrap()
}

fn instance(broker: &MemoryBroker) -> Connector {
    Connector::new(Arc::new(DistributedBackend::new(
        broker.clone(),
        HubConfig::default(),
    )))
}

async fn join_room(connector: &Connector, name: &str) -> (ActiveConnection, MemoryPeer) {
    let (source, sink, peer) = memory_transport(64);
    let connection = connector
        .connect_to(room(name), source, sink)
        .await
        .expect("connect should succeed");
    (connection, peer)
}

async fn recv(peer: &mut MemoryPeer) -> Option<Bytes> {
    tokio::time::timeout(Duration::from_secs(1), peer.recv())
        .await
        .expect("timed out waiting for frame")
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_same_fan_out_semantics_as_local() {
    let broker = MemoryBroker::new();
    let connector = instance(&broker);
    assert_eq!(connector.backend().kind(), BackendKind::Distributed);

    let (_a, mut peer_a) = join_room(&connector, "room1").await;
    let (_b, mut peer_b) = join_room(&connector, "room1").await;
    let (_z, mut peer_z) = join_room(&connector, "room2").await;

    assert!(peer_a.send("hello").await);

    assert_eq!(recv(&mut peer_a).await, Some(Bytes::from("hello")));
    assert_eq!(recv(&mut peer_b).await, Some(Bytes::from("hello")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer_z.try_recv().is_none());
}

#[tokio::test]
async fn test_publish_crosses_instances() {
    let broker = MemoryBroker::new();
    let first = instance(&broker);
    let second = instance(&broker);

    let (_a, mut peer_a) = join_room(&first, "room1").await;
    let (_b, mut peer_b) = join_room(&second, "room1").await;
    let (_c, mut peer_c) = join_room(&second, "room2").await;

    assert!(peer_b.send("from second").await);

    assert_eq!(recv(&mut peer_a).await, Some(Bytes::from("from second")));
    assert_eq!(recv(&mut peer_b).await, Some(Bytes::from("from second")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer_c.try_recv().is_none());
}

#[tokio::test]
async fn test_one_subscription_per_channel_per_instance() {
    let broker = MemoryBroker::new();
    let first = instance(&broker);
    let second = instance(&broker);

    let _a = join_room(&first, "room1").await;
    let _b = join_room(&first, "room1").await;
    let _c = join_room(&second, "room1").await;

    assert_eq!(broker.subscriber_count("room1"), 2);
}

#[tokio::test]
async fn test_last_member_leaving_releases_subscription() {
    let broker = MemoryBroker::new();
    let connector = instance(&broker);

    let (first, _p1) = join_room(&connector, "room1").await;
    let (second, _p2) = join_room(&connector, "room1").await;
    assert_eq!(broker.subscriber_count("room1"), 1);

    first.close();
    wait_until(|| first.state() == ConnectionState::Closed).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.subscriber_count("room1"), 1);

    second.close();
    wait_until(|| broker.subscriber_count("room1") == 0).await;

    // Joining again subscribes again
    let (_third, mut peer) = join_room(&connector, "room1").await;
    assert_eq!(broker.subscriber_count("room1"), 1);
    assert!(peer.send("back").await);
    assert_eq!(recv(&mut peer).await, Some(Bytes::from("back")));
}

#[tokio::test]
async fn test_broker_outage_fails_publish_and_closes_sender() {
    let broker = MemoryBroker::new();
    let connector = instance(&broker);
    let (sender, peer) = join_room(&connector, "room1").await;

    broker.set_available(false);
    assert!(peer.send("lost").await);

    wait_until(|| sender.state() == ConnectionState::Closed).await;
    assert_eq!(
        connector.backend().hub().stats().broker_publish_failures,
        1
    );
}

#[tokio::test]
async fn test_register_fails_while_broker_unavailable() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let connector = instance(&broker);

    let (source, sink, mut peer) = memory_transport(8);
    let err = connector
        .connect_to(room("room1"), source, sink)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, HubError::BackendUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(recv(&mut peer).await, None);
    assert_eq!(
        connector
            .backend()
            .hub()
            .channel_size(&room("room1"))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_direct_backend_publish_reaches_remote_members() {
    let broker = MemoryBroker::new();
    let backend = Arc::new(DistributedBackend::with_topic_prefix(
        broker.clone(),
        HubConfig::default(),
        "rooms:",
    ));
    let connector = Connector::new(backend.clone());
    let (_a, mut peer) = join_room(&connector, "room1").await;

    assert_eq!(broker.subscriber_count("rooms:room1"), 1);
    assert_eq!(broker.subscriber_count("room1"), 0);

    backend
        .publish(room_hub::Message::new(room("room1"), "server says hi"))
        .await
        .unwrap();
    assert_eq!(recv(&mut peer).await, Some(Bytes::from("server says hi")));
}

#[tokio::test]
async fn test_lost_broker_stream_is_resubscribed() {
    let broker = MemoryBroker::new();
    let first = instance(&broker);
    let second = instance(&broker);

    let (_a, mut peer_a) = join_room(&first, "room1").await;
    let (_b, mut peer_b) = join_room(&second, "room1").await;

    assert!(peer_b.send("one").await);
    assert_eq!(recv(&mut peer_a).await, Some(Bytes::from("one")));
    assert_eq!(recv(&mut peer_b).await, Some(Bytes::from("one")));

    // Both instances lose their stream and must come back on their own
    assert_eq!(broker.drop_subscribers("room1"), 2);
    wait_until(|| broker.subscriber_count("room1") == 2).await;

    assert!(peer_b.send("two").await);
    assert_eq!(recv(&mut peer_a).await, Some(Bytes::from("two")));
    assert_eq!(recv(&mut peer_b).await, Some(Bytes::from("two")));
}

#[tokio::test]
async fn test_resubscribe_retries_until_broker_returns() {
    let broker = MemoryBroker::new();
    let connector = instance(&broker);
    let (conn, mut peer) = join_room(&connector, "room1").await;

    broker.set_available(false);
    broker.drop_subscribers("room1");

    // Several retry intervals pass with the broker still down
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(broker.subscriber_count("room1"), 0);
    assert_eq!(conn.state(), ConnectionState::Registered);

    broker.set_available(true);
    wait_until(|| broker.subscriber_count("room1") == 1).await;

    assert!(peer.send("recovered").await);
    assert_eq!(recv(&mut peer).await, Some(Bytes::from("recovered")));
}

#[tokio::test]
async fn test_no_resubscribe_after_room_empties() {
    let broker = MemoryBroker::new();
    let connector = instance(&broker);
    let (conn, _peer) = join_room(&connector, "room1").await;

    broker.set_available(false);
    broker.drop_subscribers("room1");
    conn.close();
    wait_until(|| conn.state() == ConnectionState::Closed).await;
    broker.set_available(true);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(broker.subscriber_count("room1"), 0);
}

#[tokio::test]
async fn test_slow_consumer_evicted_on_subscription_path() {
    let broker = MemoryBroker::new();
    let backend = DistributedBackend::new(broker.clone(), HubConfig::default());
    let hub = backend.hub().clone();

    let (a, _out_a) = ConnectionHandle::new(room("room1"), 1);
    let (b, mut out_b) = ConnectionHandle::new(room("room1"), 8);
    let _reg_a = backend.register(a.clone()).await.unwrap();
    let _reg_b = backend.register(b).await.unwrap();

    for payload in ["m1", "m2", "m3"] {
        backend
            .publish(Message::new(room("room1"), payload))
            .await
            .unwrap();
    }

    for expected in ["m1", "m2", "m3"] {
        let message = tokio::time::timeout(Duration::from_secs(1), out_b.recv())
            .await
            .expect("timed out waiting for message")
            .expect("outbound closed");
        assert_eq!(message.payload(), &Bytes::from(expected));
    }

    wait_until(|| a.is_closed()).await;
    assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 1);
    assert_eq!(hub.stats().connections_evicted, 1);
}
