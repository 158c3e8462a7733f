//! Integration tests for the message bus
//!
//! These tests verify delivery, request/reply and expiry in realistic
//! multi-subscriber setups.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskweave::domain::bus::{HistoryFilter, MessageHandler};
use taskweave::{BoxError, BusConfig, Message, MessageBus, MessageType, Priority, Target};

fn counting_handler(count: Arc<AtomicUsize>) -> impl MessageHandler + 'static {
    move |_message: Message| {
        let count = Arc::clone(&count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    }
}

#[tokio::test]
async fn test_publish_reaches_exactly_current_subscribers() {
    let bus = MessageBus::default();
    let counts: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    for (i, count) in counts.iter().enumerate() {
        bus.subscribe(
            format!("agent-{i}"),
            ["research"],
            counting_handler(Arc::clone(count)),
        )
        .unwrap();
    }
    bus.unsubscribe("agent-3");

    let delivered = bus
        .publish(Message::event("research", "planner", "new-finding", json!({"id": 1})))
        .await
        .unwrap();

    assert_eq!(delivered, 3);
    for count in &counts[..3] {
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
    assert_eq!(counts[3].load(Ordering::SeqCst), 0);
    assert_eq!(
        bus.topic_subscribers("research"),
        vec!["agent-0", "agent-1", "agent-2"]
    );
}

#[tokio::test]
async fn test_request_timeout_leaves_no_subscription() {
    let bus = MessageBus::default();
    let before = bus.subscriber_count();

    let started = Instant::now();
    let response = bus
        .query(
            Target::Topic("nobody-home".into()),
            "ping",
            json!(null),
            "tester",
            Duration::from_millis(200),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(response.is_none());
    assert!(elapsed >= Duration::from_millis(190), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned too late: {elapsed:?}");
    assert_eq!(bus.subscriber_count(), before);
    assert!(bus.subscribers().is_empty());
}

#[tokio::test]
async fn test_dropped_request_cleans_up() {
    let bus = MessageBus::default();
    let request = bus.request(
        Message::new(MessageType::Query, "tester", "slow", json!(null)).with_topic("void"),
        Duration::from_secs(30),
    );

    // abandon the request long before its timeout
    let abandoned = tokio::time::timeout(Duration::from_millis(20), request).await;
    assert!(abandoned.is_err());
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_expired_message_never_delivered() {
    let bus = MessageBus::default();
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe("listener", ["alerts"], counting_handler(Arc::clone(&count)))
        .unwrap();

    let expired = Message::event("alerts", "monitor", "disk-full", json!(null))
        .with_expiry(chrono::Utc::now() - chrono::Duration::seconds(5));
    let delivered = bus.publish(expired).await.unwrap();

    assert_eq!(delivered, 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(bus.history_len(), 0);
}

#[tokio::test]
async fn test_query_to_recipient_gets_correlated_reply() {
    let bus = Arc::new(MessageBus::new(BusConfig::default()));

    let responder = Arc::clone(&bus);
    bus.subscribe("calculator", ["*"], move |query: Message| {
        let bus = Arc::clone(&responder);
        async move {
            if query.message_type != MessageType::Query {
                return Ok::<(), BoxError>(());
            }
            let a = query.payload["a"].as_i64().unwrap_or_default();
            let b = query.payload["b"].as_i64().unwrap_or_default();
            bus.publish(query.reply("calculator", "sum", json!(a + b)))
                .await
                .map(|_| ())
                .map_err(BoxError::from)
        }
    })
    .unwrap();

    let response = bus
        .query(
            Target::Recipient("calculator".into()),
            "add",
            json!({"a": 2, "b": 40}),
            "client",
            bus.default_timeout(),
        )
        .await
        .unwrap()
        .expect("calculator should answer");

    assert_eq!(response.payload, json!(42));
    assert_eq!(response.message_type, MessageType::Response);
    assert!(response.correlation_id.is_some());
    assert_eq!(bus.subscribers(), vec!["calculator"]);

    // query first, then response, newest first
    let history = bus.history(&HistoryFilter::default(), 10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message_type, MessageType::Response);
    assert_eq!(history[1].message_type, MessageType::Query);
    assert_eq!(history[0].correlation_id, Some(history[1].id));
}

#[tokio::test]
async fn test_commands_bypass_topics() {
    let bus = MessageBus::default();
    let worker = Arc::new(AtomicUsize::new(0));
    let bystander = Arc::new(AtomicUsize::new(0));
    bus.subscribe("worker", ["*"], counting_handler(Arc::clone(&worker)))
        .unwrap();
    bus.subscribe("bystander", ["*"], counting_handler(Arc::clone(&bystander)))
        .unwrap();

    bus.send_command("worker", "compact", json!({}), "admin", Priority::Critical)
        .await
        .unwrap();

    assert_eq!(worker.load(Ordering::SeqCst), 1);
    assert_eq!(bystander.load(Ordering::SeqCst), 0);

    let commands = bus.history(
        &HistoryFilter::default()
            .sender("admin")
            .message_type(MessageType::Command),
        5,
    );
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].priority, Priority::Critical);
}

#[tokio::test]
async fn test_slow_handler_cannot_stretch_request_timeout() {
    let bus = MessageBus::default();
    bus.subscribe("sleeper", ["questions"], |_message: Message| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok::<(), BoxError>(())
    })
    .unwrap();

    let started = Instant::now();
    let response = bus
        .query(
            Target::Topic("questions".into()),
            "anyone?",
            json!(null),
            "asker",
            Duration::from_millis(200),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(response.is_none());
    assert!(elapsed < Duration::from_secs(1), "request overran its timeout: {elapsed:?}");
    assert_eq!(bus.subscribers(), vec!["sleeper"]);
}
