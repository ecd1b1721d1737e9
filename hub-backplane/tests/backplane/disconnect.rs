//! Explicit, forced and server-driven disconnects.

use hub_backplane::{BackplaneConfig, StreamEvent, Topic};

use crate::common::{message, next_event, Harness};

#[tokio::test]
async fn test_three_misses_force_one_disconnect() {
    let harness = Harness::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;

    conn.send(message("1")).await.expect("send");
    conn.send(message("2")).await.expect("send");
    assert_eq!(conn.fail_attempts(), Some(2));
    assert!(disconnects.try_recv().is_err());

    // The third miss waits for the disconnect it triggers.
    conn.send(message("3")).await.expect("send");
    assert_eq!(
        disconnects.try_recv().ok(),
        Some(StreamEvent::ClientDisconnected("c-1".to_string()))
    );
    assert_eq!(conn.fail_attempts(), Some(0));

    conn.send(message("4")).await.expect("send");
    assert_eq!(conn.fail_attempts(), Some(1));
    assert!(disconnects.try_recv().is_err());
}

#[tokio::test]
async fn test_misses_after_forced_disconnect_force_another() {
    let harness = Harness::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;

    for i in 0..6 {
        conn.send(message(&i.to_string())).await.expect("send");
    }

    for _ in 0..2 {
        assert_eq!(
            disconnects.try_recv().ok(),
            Some(StreamEvent::ClientDisconnected("c-1".to_string()))
        );
    }
    assert!(disconnects.try_recv().is_err());
    assert_eq!(conn.fail_attempts(), Some(0));

    // Back to back disconnects with no miss in between still publish once.
    conn.disconnect(None).await.expect("disconnect");
    assert!(disconnects.try_recv().is_err());
}

#[tokio::test]
async fn test_attempts_limit_is_configurable() {
    let config = BackplaneConfig::builder()
        .max_fail_attempts(1)
        .build()
        .expect("valid config");
    let harness = Harness::with_config(config);
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;

    conn.send(message("only")).await.expect("send");

    assert!(disconnects.try_recv().is_ok());
    assert_eq!(conn.fail_attempts(), Some(0));
}

#[tokio::test]
async fn test_successful_send_resets_counter() {
    let harness = Harness::new();
    let (server, mut inbox) = harness.start_server().await;
    let conn = harness.connection("c-1");

    conn.send(message("miss")).await.expect("send");
    conn.send(message("miss")).await.expect("send");
    assert_eq!(conn.fail_attempts(), Some(2));

    conn.connect(server.id()).await.expect("connect");
    conn.send(message("hit")).await.expect("send");

    assert_eq!(next_event(&mut inbox).await.payload, message("hit"));
    assert_eq!(conn.fail_attempts(), Some(0));
}

#[tokio::test]
async fn test_disconnect_cleans_up_once() {
    let harness = Harness::new();
    let (server, _inbox) = harness.start_server().await;
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;

    conn.connect(server.id()).await.expect("connect");
    conn.disconnect(Some("client-closed")).await.expect("disconnect");
    conn.disconnect(Some("client-closed")).await.expect("disconnect again");

    assert_eq!(
        disconnects.try_recv().ok(),
        Some(StreamEvent::ClientDisconnected("c-1".to_string()))
    );
    assert!(disconnects.try_recv().is_err());
    assert_eq!(harness.stored_record("c-1").await, None);
    assert_eq!(harness.disconnect_subscriptions(server.id()), 0);
    assert_eq!(conn.server_id().await.expect("server id"), None);
}

#[tokio::test]
async fn test_disconnect_without_connect_still_notifies() {
    let harness = Harness::new();
    let conn = harness.connection("never-connected");
    let mut disconnects = harness
        .observe(Topic::client_disconnect("never-connected"))
        .await;

    conn.disconnect(None).await.expect("disconnect");

    assert!(disconnects.try_recv().is_ok());
    assert_eq!(harness.stored_record("never-connected").await, None);
}

#[tokio::test]
async fn test_connect_after_disconnect() {
    let harness = Harness::new();
    let (server, mut inbox) = harness.start_server().await;
    let conn = harness.connection("c-1");

    conn.connect(server.id()).await.expect("connect");
    conn.disconnect(None).await.expect("disconnect");
    conn.connect(server.id()).await.expect("connect again");
    conn.send(message("back")).await.expect("send");

    assert_eq!(next_event(&mut inbox).await.payload, message("back"));
    assert_eq!(harness.disconnect_subscriptions(server.id()), 1);
}

#[tokio::test]
async fn test_server_shutdown_disconnects_bound_clients() {
    let harness = Harness::new();
    let (server, _inbox) = harness.start_server().await;
    let (other, _other_inbox) = harness.start_server().await;
    let alice = harness.connection("alice");
    let bob = harness.connection("bob");
    let carol = harness.connection("carol");
    let mut alice_gone = harness.observe(Topic::client_disconnect("alice")).await;
    let mut bob_gone = harness.observe(Topic::client_disconnect("bob")).await;
    let mut carol_gone = harness.observe(Topic::client_disconnect("carol")).await;

    alice.connect(server.id()).await.expect("connect");
    bob.connect(server.id()).await.expect("connect");
    carol.connect(other.id()).await.expect("connect");
    let server_id = server.id();

    server.shutdown().await.expect("shutdown");

    assert_eq!(
        next_event(&mut alice_gone).await,
        StreamEvent::ClientDisconnected("alice".to_string())
    );
    assert_eq!(
        next_event(&mut bob_gone).await,
        StreamEvent::ClientDisconnected("bob".to_string())
    );

    // Queued behind the event, so the record is cleared by now.
    alice.disconnect(None).await.expect("disconnect");
    bob.disconnect(None).await.expect("disconnect");
    assert!(alice_gone.try_recv().is_err());
    assert!(bob_gone.try_recv().is_err());
    assert_eq!(harness.stored_record("alice").await, None);
    assert_eq!(harness.stored_record("bob").await, None);
    assert_eq!(harness.disconnect_subscriptions(server_id), 0);

    assert!(carol_gone.try_recv().is_err());
    assert_eq!(carol.server_id().await.expect("server id"), Some(other.id()));

    alice.send(message("late")).await.expect("send");
    assert_eq!(alice.fail_attempts(), Some(1));
}
