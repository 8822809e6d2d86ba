use std::time::Duration;

use application::{CallStateStore, EventPublisher, EventSubscriber};
use chrono::Utc;
use domain::{CallId, CallRecord, CallState, CallType, ConversationId, UserId};
use infrastructure::redis::SubscriberSettings;
use infrastructure::{RedisCallStateStore, RedisEventPublisher, RedisEventSubscriber};

fn enabled() -> bool {
    std::env::var("REDIS_INTEGRATION_TEST").is_ok()
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

#[tokio::test]
async fn test_pattern_subscription_receives_published_message() {
    if !enabled() {
        return;
    }
    let subscriber = RedisEventSubscriber::new(&redis_url(), SubscriberSettings::default()).unwrap();
    let publisher = RedisEventPublisher::connect(&redis_url()).await.unwrap();

    let mut rx = subscriber
        .subscribe(&["conversation:*".to_string()])
        .await
        .unwrap();

    let channel = format!("conversation:{}", ConversationId::new());
    publisher.publish(&channel, r#"{"ok":true}"#).await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message in time")
        .expect("channel open");
    assert_eq!(message.channel, channel);
    assert_eq!(message.payload, r#"{"ok":true}"#);

    subscriber.shutdown();
    let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("closed in time");
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_call_state_put_get_delete() {
    if !enabled() {
        return;
    }
    let client = redis::Client::open(redis_url()).unwrap();
    let store = RedisCallStateStore::new(client.get_connection_manager().await.unwrap())
        .with_key_prefix(format!("test:{}:", uuid::Uuid::new_v4()));

    let alice = UserId::new();
    let bob = UserId::new();
    let record = CallRecord {
        id: CallId::new(),
        conversation_id: ConversationId::new(),
        initiator_id: alice,
        call_type: CallType::Audio,
        participant_ids: vec![alice, bob],
        created_at: Utc::now(),
    };
    let state = CallState::ringing(&record);

    store.put(&state, Duration::from_secs(30)).await.unwrap();
    assert_eq!(store.get(record.id).await.unwrap(), Some(state));

    store.delete(record.id).await.unwrap();
    assert!(store.get(record.id).await.unwrap().is_none());
}
