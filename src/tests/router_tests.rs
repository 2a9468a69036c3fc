// Router Tests - per-user subscription and MESSAGE decoding

use crate::protocol::{Command, Frame};
use crate::router::*;
use crate::tests::helpers::*;
use crate::{ConnectionError, Error};
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

const TEMPLATE: &str = "/user/{user_id}/queue/messages";

#[tokio::test]
async fn test_subscribe_requires_connection() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    let mut router = SubscriptionRouter::new(manager, TEMPLATE);

    assert!(matches!(
        router.subscribe(1),
        Err(Error::Connection(ConnectionError::NotConnected))
    ));
    assert!(router.active().is_none());
}

#[tokio::test]
async fn test_destination_for_user() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    let router = SubscriptionRouter::new(manager, TEMPLATE);

    assert_eq!(router.destination_for(42), "/user/42/queue/messages");
}

#[tokio::test]
async fn test_subscribe_once_per_user() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    let mut router = SubscriptionRouter::new(manager, TEMPLATE);

    assert!(router.subscribe(1).unwrap());
    assert!(!router.subscribe(1).unwrap());

    let active = router.active().unwrap();
    assert_eq!(active.id, "sub-1");
    assert_eq!(active.user_id, 1);
    assert_eq!(active.destination, "/user/1/queue/messages");

    assert!(wait_until(|| broker.sent(Command::Subscribe).len() == 1).await);
    let subscribe = &broker.sent(Command::Subscribe)[0];
    assert_eq!(subscribe.get_header("id"), Some("sub-1"));
    assert_eq!(
        subscribe.get_header("destination"),
        Some("/user/1/queue/messages")
    );
}

#[tokio::test]
async fn test_subscribe_other_user_replaces_binding() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    let mut router = SubscriptionRouter::new(manager, TEMPLATE);

    router.subscribe(1).unwrap();
    router.subscribe(5).unwrap();

    assert_eq!(router.active().unwrap().id, "sub-2");
    assert!(wait_until(|| broker.frames().len() == 4).await);

    let commands: Vec<Command> = broker.frames().iter().map(|f| f.command).collect();
    assert_eq!(
        commands,
        vec![
            Command::Connect,
            Command::Subscribe,
            Command::Unsubscribe,
            Command::Subscribe
        ]
    );
    assert_eq!(
        broker.sent(Command::Unsubscribe)[0].get_header("id"),
        Some("sub-1")
    );
}

#[tokio::test]
async fn test_unsubscribe() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    let mut router = SubscriptionRouter::new(manager.clone(), TEMPLATE);

    assert!(!router.unsubscribe());

    router.subscribe(1).unwrap();
    manager.disconnect();
    // Releasing after the link is gone still clears the binding
    assert!(router.unsubscribe());
    assert!(router.active().is_none());
}

#[tokio::test]
async fn test_resubscribe_replays_binding() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    let mut router = SubscriptionRouter::new(manager, TEMPLATE);

    assert!(!router.resubscribe().unwrap());

    router.subscribe(1).unwrap();
    assert!(router.resubscribe().unwrap());

    assert!(wait_until(|| broker.sent(Command::Subscribe).len() == 2).await);
    let ids: Vec<_> = broker
        .sent(Command::Subscribe)
        .iter()
        .map(|f| f.get_header("id").unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, vec!["sub-1", "sub-1"]);
}

#[tokio::test]
async fn test_messages_reach_only_subscribed_links() {
    let broker = MockBroker::accepting();
    let (manager, mut deliveries) = manager_for(&broker);
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    let mut router = SubscriptionRouter::new(manager.clone(), TEMPLATE);
    router.subscribe(1).unwrap();
    assert!(wait_until(|| broker.subscription().as_deref() == Some("sub-1")).await);

    // A fresh link carries no subscription until the binding is replayed
    manager.disconnect();
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    assert_eq!(broker.subscription(), None);
    assert!(!broker.deliver_body("{}"));

    assert!(router.resubscribe().unwrap());
    assert!(wait_until(|| broker.subscription().as_deref() == Some("sub-1")).await);
    assert!(broker.deliver_body("{}"));

    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.get_header("subscription"), Some("sub-1"));
}

#[tokio::test]
async fn test_route_filters_frames() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    let mut router = SubscriptionRouter::new(manager, TEMPLATE);

    let body = serde_json::to_string(&message(2, 1, "hi")).unwrap();
    let delivery = Frame::new(Command::Message)
        .header("subscription", "sub-1")
        .with_body(body.clone());

    // Nothing is routed before subscribing
    assert!(router.route(&delivery).is_none());

    router.subscribe(1).unwrap();

    let routed = router.route(&delivery).unwrap().unwrap();
    assert_eq!(routed.sender_id, 2);
    assert_eq!(routed.content, "hi");

    let other_subscription = Frame::new(Command::Message)
        .header("subscription", "sub-9")
        .with_body(body.clone());
    assert!(router.route(&other_subscription).is_none());

    let receipt = Frame::new(Command::Receipt).header("subscription", "sub-1");
    assert!(router.route(&receipt).is_none());
}

#[tokio::test]
async fn test_route_malformed_body() {
    let broker = MockBroker::accepting();
    let (manager, _deliveries) = manager_for(&broker);
    assert_ok!(manager.connect(&alice(), &CancellationToken::new()).await);
    let mut router = SubscriptionRouter::new(manager, TEMPLATE);
    router.subscribe(1).unwrap();

    for body in ["not json", "{\"content\":\"missing ids\"}", ""] {
        let frame = Frame::new(Command::Message)
            .header("subscription", "sub-1")
            .with_body(body);
        assert!(
            matches!(router.route(&frame), Some(Err(Error::MalformedMessage(_)))),
            "body {:?} should be malformed",
            body
        );
    }
}
