//! Routing sends to the bound server.

use hub_backplane::{BackplaneError, ConnectionRecord, ServerId, StreamEvent, Topic};

use crate::common::{key, message, next_event, Harness};

#[tokio::test]
async fn test_send_reaches_bound_server() {
    let harness = Harness::new();
    let (server, mut inbox) = harness.start_server().await;
    let conn = harness.connection("c-1");

    conn.connect(server.id()).await.expect("connect");
    conn.send(message("hello")).await.expect("send");

    let delivered = next_event(&mut inbox).await;
    assert_eq!(delivered.hub_name, "ChatHub");
    assert_eq!(delivered.connection_id, "c-1");
    assert_eq!(delivered.payload, message("hello"));
    assert_eq!(conn.fail_attempts(), Some(0));
}

#[tokio::test]
async fn test_send_one_way_reaches_bound_server() {
    let harness = Harness::new();
    let (server, mut inbox) = harness.start_server().await;
    let conn = harness.connection("c-1");

    conn.connect(server.id()).await.expect("connect");
    conn.send_one_way(message("fire")).await.expect("send");

    assert_eq!(next_event(&mut inbox).await.payload, message("fire"));
}

#[tokio::test]
async fn test_connect_persists_binding_and_subscribes() {
    let harness = Harness::new();
    let server_id = ServerId::new();
    let conn = harness.connection("c-1");

    conn.connect(server_id).await.expect("connect");

    assert_eq!(
        harness.stored_record("c-1").await,
        Some(ConnectionRecord {
            server_id: Some(server_id)
        })
    );
    assert_eq!(harness.disconnect_subscriptions(server_id), 1);
    assert_eq!(conn.server_id().await.expect("server id"), Some(server_id));
}

#[tokio::test]
async fn test_connect_rejects_nil_server() {
    let harness = Harness::new();
    let conn = harness.connection("c-1");

    let result = conn.connect(ServerId::nil()).await;

    assert!(matches!(result, Err(BackplaneError::InvalidServerId)));
    assert_eq!(harness.stored_record("c-1").await, None);
    assert_eq!(conn.server_id().await.expect("server id"), None);
}

#[tokio::test]
async fn test_reconnect_moves_to_new_server() {
    let harness = Harness::new();
    let (first, mut first_inbox) = harness.start_server().await;
    let (second, mut second_inbox) = harness.start_server().await;
    let conn = harness.connection("c-1");

    conn.connect(first.id()).await.expect("connect");
    conn.connect(second.id()).await.expect("reconnect");

    assert_eq!(harness.disconnect_subscriptions(first.id()), 0);
    assert_eq!(harness.disconnect_subscriptions(second.id()), 1);

    conn.send(message("moved")).await.expect("send");
    assert_eq!(next_event(&mut second_inbox).await.payload, message("moved"));
    assert!(first_inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_old_server_disconnection_is_ignored_after_rebind() {
    let harness = Harness::new();
    let first = ServerId::new();
    let second = ServerId::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;

    conn.connect(first).await.expect("connect");
    conn.connect(second).await.expect("reconnect");

    conn.server_disconnected(first).await;

    // Connect is queued behind the event, so it has been handled by now.
    conn.connect(second).await.expect("rebind");

    assert!(disconnects.try_recv().is_err());
    assert_eq!(conn.server_id().await.expect("server id"), Some(second));
}

#[tokio::test]
async fn test_failed_rebind_keeps_watching_previous_server() {
    let harness = Harness::new();
    let first = ServerId::new();
    let second = ServerId::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;

    conn.connect(first).await.expect("connect");
    harness.faults.fail_writes(true);
    let result = conn.connect(second).await;
    assert!(
        matches!(result, Err(BackplaneError::State(_))),
        "{:?}",
        result
    );
    harness.faults.fail_writes(false);

    assert_eq!(conn.server_id().await.expect("server id"), Some(first));
    assert_eq!(
        harness.stored_record("c-1").await,
        Some(ConnectionRecord {
            server_id: Some(first)
        })
    );
    assert_eq!(harness.disconnect_subscriptions(first), 1);
    assert_eq!(harness.disconnect_subscriptions(second), 0);

    // The first server dying is still noticed.
    harness.announce_server_disconnected(first).await;
    assert_eq!(
        next_event(&mut disconnects).await,
        StreamEvent::ClientDisconnected("c-1".to_string())
    );

    assert!(harness.catalog.deactivate(&key("c-1")).await);
    assert_eq!(harness.stored_record("c-1").await, None);
    assert_eq!(harness.disconnect_subscriptions(first), 0);
}

#[tokio::test]
async fn test_connections_are_isolated() {
    let harness = Harness::new();
    let (server, mut inbox) = harness.start_server().await;
    let bound = harness.connection("bound");
    let unbound = harness.connection("unbound");

    bound.connect(server.id()).await.expect("connect");
    unbound.send(message("lost")).await.expect("send");
    bound.send(message("kept")).await.expect("send");

    let delivered = next_event(&mut inbox).await;
    assert_eq!(delivered.connection_id, "bound");
    assert_eq!(unbound.fail_attempts(), Some(1));
    assert_eq!(bound.fail_attempts(), Some(0));
    assert_eq!(harness.catalog.active_count(), 2);
}
