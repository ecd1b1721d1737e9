//! Store and fabric failures during connect, disconnect and send.
//!
//! A failed operation reports its error and leaves the binding, the record
//! and the disconnection subscription as they were.

use hub_backplane::{BackplaneError, ConnectionRecord, ServerId, StreamEvent, Topic};

use crate::common::{key, message, next_event, Harness};

fn bound_to(server_id: ServerId) -> Option<ConnectionRecord> {
    Some(ConnectionRecord {
        server_id: Some(server_id),
    })
}

#[tokio::test]
async fn test_failed_connect_leaves_connection_unbound() {
    let harness = Harness::new();
    let server_id = ServerId::new();
    let conn = harness.connection("c-1");

    harness.faults.fail_writes(true);
    let result = conn.connect(server_id).await;
    assert!(
        matches!(result, Err(BackplaneError::State(_))),
        "{:?}",
        result
    );

    assert_eq!(conn.server_id().await.expect("server id"), None);
    assert_eq!(harness.stored_record("c-1").await, None);
    assert_eq!(harness.disconnect_subscriptions(server_id), 0);

    harness.faults.heal();
    conn.connect(server_id).await.expect("connect");
    assert_eq!(harness.stored_record("c-1").await, bound_to(server_id));
    assert_eq!(harness.disconnect_subscriptions(server_id), 1);
}

#[tokio::test]
async fn test_failed_clear_keeps_binding() {
    let harness = Harness::new();
    let server_id = ServerId::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;
    conn.connect(server_id).await.expect("connect");

    harness.faults.fail_clears(true);
    let result = conn.disconnect(Some("client-closed")).await;
    assert!(
        matches!(result, Err(BackplaneError::State(_))),
        "{:?}",
        result
    );

    assert_eq!(conn.server_id().await.expect("server id"), Some(server_id));
    assert_eq!(harness.stored_record("c-1").await, bound_to(server_id));
    assert_eq!(harness.disconnect_subscriptions(server_id), 1);

    // Retrying notifies again, then completes.
    harness.faults.heal();
    conn.disconnect(Some("client-closed"))
        .await
        .expect("disconnect");
    for _ in 0..2 {
        assert_eq!(
            disconnects.try_recv().ok(),
            Some(StreamEvent::ClientDisconnected("c-1".to_string()))
        );
    }
    assert_eq!(conn.server_id().await.expect("server id"), None);
    assert_eq!(harness.stored_record("c-1").await, None);
    assert_eq!(harness.disconnect_subscriptions(server_id), 0);
}

#[tokio::test]
async fn test_failed_publish_keeps_binding() {
    let harness = Harness::new();
    let server_id = ServerId::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;
    conn.connect(server_id).await.expect("connect");

    harness.faults.fail_publishes(true);
    let result = conn.disconnect(None).await;
    assert!(
        matches!(result, Err(BackplaneError::PubSub(_))),
        "{:?}",
        result
    );

    assert!(disconnects.try_recv().is_err());
    assert_eq!(conn.server_id().await.expect("server id"), Some(server_id));
    assert_eq!(harness.stored_record("c-1").await, bound_to(server_id));
    assert_eq!(harness.disconnect_subscriptions(server_id), 1);

    harness.faults.heal();
    conn.disconnect(None).await.expect("disconnect");
    assert!(disconnects.try_recv().is_ok());
    assert_eq!(harness.disconnect_subscriptions(server_id), 0);
}

#[tokio::test]
async fn test_failed_server_disconnection_is_retried_by_next_event() {
    let harness = Harness::new();
    let server_id = ServerId::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;
    conn.connect(server_id).await.expect("connect");

    harness.faults.fail_clears(true);
    harness.announce_server_disconnected(server_id).await;
    next_event(&mut disconnects).await;
    // Deactivation is queued behind the event, so it has been handled.
    assert!(harness.catalog.deactivate(&key("c-1")).await);

    assert_eq!(harness.stored_record("c-1").await, bound_to(server_id));
    assert_eq!(harness.disconnect_subscriptions(server_id), 1);

    harness.faults.heal();
    harness.announce_server_disconnected(server_id).await;
    next_event(&mut disconnects).await;
    assert!(harness.catalog.deactivate(&key("c-1")).await);

    assert_eq!(harness.stored_record("c-1").await, None);
    assert_eq!(harness.disconnect_subscriptions(server_id), 0);
}

#[tokio::test]
async fn test_failed_forced_disconnect_is_retried_by_next_miss() {
    let harness = Harness::new();
    let conn = harness.connection("c-1");
    let mut disconnects = harness.observe(Topic::client_disconnect("c-1")).await;

    conn.send(message("1")).await.expect("send");
    conn.send(message("2")).await.expect("send");

    harness.faults.fail_publishes(true);
    let result = conn.send(message("3")).await;
    assert!(
        matches!(result, Err(BackplaneError::PubSub(_))),
        "{:?}",
        result
    );
    assert_eq!(conn.fail_attempts(), Some(3));
    assert!(disconnects.try_recv().is_err());

    harness.faults.heal();
    conn.send(message("4")).await.expect("send");
    assert_eq!(
        disconnects.try_recv().ok(),
        Some(StreamEvent::ClientDisconnected("c-1".to_string()))
    );
    assert_eq!(conn.fail_attempts(), Some(0));
}

#[tokio::test]
async fn test_failed_routing_is_reported_and_not_counted() {
    let harness = Harness::new();
    let (server, mut inbox) = harness.start_server().await;
    let conn = harness.connection("c-1");
    conn.connect(server.id()).await.expect("connect");

    harness.faults.fail_publishes(true);
    let result = conn.send(message("lost")).await;
    assert!(
        matches!(result, Err(BackplaneError::PubSub(_))),
        "{:?}",
        result
    );
    assert_eq!(conn.fail_attempts(), Some(0));
    assert!(inbox.try_recv().is_err());

    harness.faults.heal();
    conn.send(message("kept")).await.expect("send");
    assert_eq!(next_event(&mut inbox).await.payload, message("kept"));
}
