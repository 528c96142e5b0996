mod common;

use std::time::Duration;

use chat_client::manager::ConnectionManager;
use chat_client::stomp::SocketOptions;
use common::{make_message, Broker};
use sikboo_common::{group_buying_topic, websocket_url, ChatMessageCreate};

fn test_options() -> SocketOptions {
    SocketOptions {
        reconnect_delay: Duration::from_millis(100),
        handshake_timeout: Duration::from_secs(2),
        ..SocketOptions::default()
    }
}

async fn wait_connected(manager: &ConnectionManager, want: bool) {
    let mut state = manager.state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.borrow_and_update().is_connected != want {
            state.changed().await.unwrap();
        }
    })
    .await
    .expect("connection state change timed out");
}

#[tokio::test]
async fn connect_is_idempotent() {
    let broker = Broker::start().await;
    let manager = ConnectionManager::with_options(websocket_url(&broker.base_url()), test_options());

    manager.connect();
    wait_connected(&manager, true).await;
    manager.connect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(broker.upgrade_count(), 1);
    assert!(manager.is_connected());

    manager.disconnect();
}

#[tokio::test]
async fn subscribe_before_connect_is_inert() {
    let broker = Broker::start().await;
    let manager = ConnectionManager::with_options(websocket_url(&broker.base_url()), test_options());

    let mut subscription = manager.subscribe(&group_buying_topic(1));

    assert_eq!(manager.subscription_count(), 0);
    assert_eq!(broker.upgrade_count(), 0);
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn send_while_disconnected_returns_false() {
    let broker = Broker::start().await;
    let manager = ConnectionManager::with_options(websocket_url(&broker.base_url()), test_options());

    let body = ChatMessageCreate {
        group_buying_id: 1,
        member_id: 3,
        message: "hello".to_string(),
    };
    assert!(!manager.send("/app/chat.send", &body));
    assert_eq!(broker.send_count(), 0);
}

#[tokio::test]
async fn unsubscribe_removes_registry_entry_once() {
    let broker = Broker::start().await;
    let manager = ConnectionManager::with_options(websocket_url(&broker.base_url()), test_options());

    manager.connect();
    wait_connected(&manager, true).await;

    let subscription = manager.subscribe(&group_buying_topic(7));
    assert_eq!(manager.subscription_count(), 1);

    subscription.unsubscribe();
    assert_eq!(manager.subscription_count(), 0);

    // Disconnect after an explicit unsubscribe must not replay the
    // UNSUBSCRIBE frame for the already-removed entry.
    manager.disconnect();
    wait_connected(&manager, false).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.unsubscribe_count(), 1);
}

#[tokio::test]
async fn resubscribing_a_destination_displaces_the_old_subscription() {
    let broker = Broker::start().await;
    let manager = ConnectionManager::with_options(websocket_url(&broker.base_url()), test_options());

    manager.connect();
    wait_connected(&manager, true).await;

    let topic = group_buying_topic(9);
    let first = manager.subscribe(&topic);
    let second = manager.subscribe(&topic);
    assert_eq!(manager.subscription_count(), 1);

    // The displaced receiver is closed.
    let (mut first_rx, first_cancel) = first.into_parts();
    assert!(first_rx.recv().await.is_none());

    // Cancelling the stale handle must not tear down the live successor.
    first_cancel.cancel();
    assert_eq!(manager.subscription_count(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let message = make_message(9, 1, 3, "still here");
    broker.inject(&topic, &serde_json::to_string(&message).unwrap());

    let (mut second_rx, _second_cancel) = second.into_parts();
    let delivered = tokio::time::timeout(Duration::from_secs(5), second_rx.recv())
        .await
        .expect("delivery timed out")
        .expect("successor channel closed");
    assert_eq!(delivered["messageId"], 1);

    manager.disconnect();
}

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    let broker = Broker::start().await;
    let manager = ConnectionManager::with_options(websocket_url(&broker.base_url()), test_options());

    manager.connect();
    wait_connected(&manager, true).await;

    let topic = group_buying_topic(5);
    let mut subscription = manager.subscribe(&topic);

    broker.drop_connections();
    wait_connected(&manager, false).await;
    wait_connected(&manager, true).await;
    assert_eq!(broker.upgrade_count(), 2);

    // SUBSCRIBE is replayed before the connected state flips, but give
    // the broker a beat to register it before injecting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let message = make_message(5, 11, 3, "after reconnect");
    broker.inject(&topic, &serde_json::to_string(&message).unwrap());

    let delivered = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("delivery timed out")
        .expect("subscription closed");
    assert_eq!(delivered["messageId"], 11);
    assert_eq!(delivered["message"], "after reconnect");

    manager.disconnect();
}
