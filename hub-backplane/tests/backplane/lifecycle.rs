//! Activation eviction and catalog shutdown, on a paused clock.

use std::time::Duration;

use hub_backplane::{BackplaneConfig, ServerId};

use crate::common::{key, message, Harness};

fn short_idle() -> BackplaneConfig {
    BackplaneConfig::builder()
        .idle_timeout(Duration::from_secs(60))
        .deactivation_delay(Duration::from_secs(1))
        .build()
        .expect("valid config")
}

#[tokio::test(start_paused = true)]
async fn test_idle_activation_is_evicted() {
    let harness = Harness::with_config(short_idle());
    let conn = harness.connection("c-1");

    conn.connect(ServerId::new()).await.expect("connect");
    assert_eq!(harness.catalog.active_count(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.catalog.active_count(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(harness.catalog.active_count(), 0);
    assert!(harness.stored_record("c-1").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_activation_lingers_briefly() {
    let harness = Harness::with_config(short_idle());
    let conn = harness.connection("c-1");

    conn.connect(ServerId::new()).await.expect("connect");
    conn.disconnect(None).await.expect("disconnect");
    assert_eq!(harness.catalog.active_count(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.catalog.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sends_keep_activation_alive() {
    let harness = Harness::with_config(short_idle());
    let conn = harness.connection("c-1");
    conn.connect(ServerId::new()).await.expect("connect");

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(25)).await;
        conn.send(message("ping")).await.expect("send");
    }
    assert!(harness.catalog.is_active(&key("c-1")));

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(!harness.catalog.is_active(&key("c-1")));
}

#[tokio::test(start_paused = true)]
async fn test_evicted_connection_comes_back_bound() {
    let harness = Harness::with_config(short_idle());
    let server_id = ServerId::new();
    let conn = harness.connection("c-1");

    conn.connect(server_id).await.expect("connect");
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(harness.catalog.active_count(), 0);

    assert_eq!(conn.server_id().await.expect("server id"), Some(server_id));
    assert_eq!(harness.disconnect_subscriptions(server_id), 1);
}

#[tokio::test]
async fn test_shutdown_keeps_records() {
    let harness = Harness::new();
    let server_id = ServerId::new();
    for id in ["a", "b", "c"] {
        harness
            .connection(id)
            .connect(server_id)
            .await
            .expect("connect");
    }
    assert_eq!(harness.catalog.active_count(), 3);

    harness.catalog.shutdown().await;

    assert_eq!(harness.catalog.active_count(), 0);
    assert_eq!(harness.store.len(), 3);
    assert_eq!(harness.disconnect_subscriptions(server_id), 3);
}

#[tokio::test]
async fn test_deactivate_unknown_connection() {
    let harness = Harness::new();
    assert!(!harness.catalog.deactivate(&key("nobody")).await);
}
