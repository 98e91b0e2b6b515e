//! Core Flow Integration Tests
//!
//! Purpose: Verify the complete room flow from connect to fan-out and eviction
//! Dependencies: none (in-process backend and in-memory transports)
//!
//! Test Coverage:
//! 1. Connections in one room see each other's frames, other rooms do not
//! 2. A slow consumer is evicted while the rest of the room keeps receiving
//! 3. Leaving a room removes the connection from membership
//!
//! Run: cargo test --test core_flow_test

use bytes::Bytes;
use room_hub::{
    memory_transport, Backend, ChannelName, ConnectionHandle, ConnectionState, Connector,
    LocalBackend, Message,
};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

fn room(name: &str) -> ChannelName {
    ChannelName::new(name).unwrap()
}

#[tokio::test]
async fn test_room_isolation_and_slow_consumer_eviction() {
    let backend = LocalBackend::default();
    let hub = backend.hub().clone();

    // A has room for a single queued message and never drains on its own
    let (a, mut out_a) = ConnectionHandle::new(room("room1"), 1);
    let (b, mut out_b) = ConnectionHandle::new(room("room1"), 8);
    let (z, mut out_z) = ConnectionHandle::new(room("room2"), 8);

    let reg_a = backend.register(a.clone()).await.unwrap();
    let _reg_b = backend.register(b).await.unwrap();
    let _reg_z = backend.register(z).await.unwrap();

    backend
        .publish(Message::new(room("room1"), "hello"))
        .await
        .unwrap();
    hub.channel_size(&room("room1")).await.unwrap();

    assert_eq!(out_a.try_recv().unwrap().payload(), &Bytes::from("hello"));
    assert_eq!(out_b.try_recv().unwrap().payload(), &Bytes::from("hello"));
    assert!(out_z.try_recv().is_none());

    backend
        .publish(Message::new(room("room1"), "m1"))
        .await
        .unwrap();
    backend
        .publish(Message::new(room("room1"), "m2"))
        .await
        .unwrap();

    // m1 filled A's queue, m2 found it full
    assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 1);
    assert!(a.is_closed());
    assert_eq!(hub.stats().connections_evicted, 1);

    assert_eq!(out_b.try_recv().unwrap().payload(), &Bytes::from("m1"));
    assert_eq!(out_b.try_recv().unwrap().payload(), &Bytes::from("m2"));
    assert!(out_z.try_recv().is_none());

    // Releasing an evicted registration is harmless
    reg_a.unregister().await;
    assert_eq!(hub.channel_size(&room("room1")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_room_chat_over_connector() {
    let connector = Connector::new(Arc::new(LocalBackend::default()));

    let (source, sink, mut alice) = memory_transport(16);
    let alice_conn = connector
        .connect_to(room("lobby"), source, sink)
        .await
        .expect("alice joins");

    let (source, sink, mut bob) = memory_transport(16);
    let bob_conn = connector
        .connect_to(room("lobby"), source, sink)
        .await
        .expect("bob joins");

    assert!(alice.send(r#"{"type":"chat","payload":"hi bob"}"#).await);

    for peer in [&mut alice, &mut bob] {
        let frame = timeout(Duration::from_secs(1), peer.recv())
            .await
            .expect("frame should arrive");
        assert_eq!(
            frame,
            Some(Bytes::from(r#"{"type":"chat","payload":"hi bob"}"#))
        );
    }

    // Bob leaves; alice keeps chatting alone
    bob.hang_up();
    timeout(Duration::from_secs(1), async {
        while bob_conn.state() != ConnectionState::Closed {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bob's connection should close");

    let hub = connector.backend().hub();
    assert_eq!(hub.channel_size(&room("lobby")).await.unwrap(), 1);
    assert_eq!(alice_conn.state(), ConnectionState::Registered);

    assert!(alice.send("anyone?").await);
    let frame = timeout(Duration::from_secs(1), alice.recv()).await.unwrap();
    assert_eq!(frame, Some(Bytes::from("anyone?")));
    assert_eq!(timeout(Duration::from_secs(1), bob.recv()).await.unwrap(), None);
}
