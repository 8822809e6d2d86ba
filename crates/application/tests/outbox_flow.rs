mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use application::realtime::{ClientHandle, PubSubBridge};
use application::commands::MarkMessageReadCommand;
use application::{ApplicationError, Clock, Command, OutboxRepository, OutboxWorkerConfig};
use domain::{Channel, EventEnvelope, MessageId, OutboxEvent, OutboxStatus, UserId};
use serde_json::Value;
use support::{send_message, Harness};
use uuid::Uuid;

#[tokio::test]
async fn test_send_message_reaches_subscribed_client() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;
    let channel = Channel::Conversation(conversation.id);

    let (handle, mut rx) = ClientHandle::new(bob, 16);
    let client_id = handle.id;
    harness.hub.register(handle).await.unwrap();
    harness.hub.subscribe(client_id, channel.clone()).await.unwrap();

    let bridge = Arc::new(PubSubBridge::new(
        Arc::new(harness.pubsub.clone()),
        harness.hub.clone(),
    ));
    let bridge_task = bridge.start().await.unwrap();

    let result = harness
        .execute(send_message(alice, conversation.id, "hi", None))
        .await
        .unwrap();
    assert_eq!(result.command_type, "send_message");
    assert_eq!(result.aggregate_type, "message");

    let rows = harness.store.outbox_events().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, OutboxStatus::Pending);
    assert_eq!(rows[0].aggregate_id, result.aggregate_id);

    let worker = harness.worker(OutboxWorkerConfig::default());
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.completed, 1);

    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("frame delivered in time")
        .expect("queue open");
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "event");
    assert_eq!(value["channel"], channel.to_string());
    assert_eq!(value["event"]["event_type"], "message.created");
    assert_eq!(value["event"]["payload"]["message"]["content"], "hi");

    let row = harness.store.find_by_id(rows[0].id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Completed);
    assert!(row.processed_at.is_some());

    bridge_task.stop().await;
}

#[tokio::test]
async fn test_idempotent_replay_executes_once() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;

    let first = harness
        .execute(send_message(alice, conversation.id, "hello", Some("msg-1")))
        .await
        .unwrap();
    let second = harness
        .execute(send_message(alice, conversation.id, "hello", Some("msg-1")))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.store.messages().await.len(), 1);
    assert_eq!(harness.store.outbox_events().await.len(), 1);
    assert_eq!(harness.store.command_logs().await.len(), 1);
}

#[tokio::test]
async fn test_read_receipt_for_message_in_other_conversation_is_rejected() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let carol = UserId::new();
    let ours = harness.conversation(alice, &[bob]).await;
    let theirs = harness.conversation(carol, &[alice]).await;

    let sent = harness
        .execute(send_message(carol, theirs.id, "private", None))
        .await
        .unwrap();
    let foreign_message = MessageId::from(sent.aggregate_id);
    let events_before = harness.store.outbox_events().await.len();

    let err = harness
        .execute(Command::MarkMessageRead(MarkMessageReadCommand {
            actor_id: bob,
            conversation_id: ours.id,
            message_id: foreign_message,
            idempotency_key: None,
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, ApplicationError::NotFound(_)));
    assert!(harness.store.read_receipts().await.is_empty());
    assert_eq!(harness.store.outbox_events().await.len(), events_before);
}

#[tokio::test]
async fn test_empty_idempotency_key_is_not_deduplicated() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;

    for _ in 0..2 {
        harness
            .execute(send_message(alice, conversation.id, "hello", Some("")))
            .await
            .unwrap();
    }

    assert_eq!(harness.store.messages().await.len(), 2);
    assert!(harness.store.command_logs().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_idempotent_executions_share_one_result() {
    let harness = Arc::new(Harness::new());
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let harness = harness.clone();
            tokio::spawn(async move {
                harness
                    .execute(send_message(alice, conversation.id, "race", Some("race-key")))
                    .await
            })
        })
        .collect();

    let mut results = HashSet::new();
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        results.insert(result.aggregate_id);
    }

    assert_eq!(results.len(), 1);
    assert_eq!(harness.store.messages().await.len(), 1);
    assert_eq!(harness.store.outbox_events().await.len(), 1);
}

#[tokio::test]
async fn test_outbox_write_failure_rolls_back_domain_write() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;

    harness.store.fail_next_outbox_insert();
    let err = harness
        .execute(send_message(alice, conversation.id, "lost", Some("k")))
        .await
        .unwrap_err();

    assert!(matches!(err, ApplicationError::Repository(_)));
    assert!(harness.store.messages().await.is_empty());
    assert!(harness.store.outbox_events().await.is_empty());
    assert!(harness.store.command_logs().await.is_empty());

    harness
        .execute(send_message(alice, conversation.id, "kept", Some("k")))
        .await
        .unwrap();
    assert_eq!(harness.store.messages().await.len(), 1);
}

#[tokio::test]
async fn test_always_failing_publish_dead_letters_after_ceiling() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;
    harness
        .execute(send_message(alice, conversation.id, "doomed", None))
        .await
        .unwrap();
    let id = harness.store.outbox_events().await[0].id;

    harness.pubsub.set_fail_publish(true);
    let worker = harness.worker(OutboxWorkerConfig {
        max_retries: 9,
        ..OutboxWorkerConfig::default()
    });

    for attempt in 1..=9 {
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.retried, 1);
        let row = harness.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, attempt);
    }

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    let row = harness.store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.retry_count, 10);
    assert!(row.error.is_some());

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.fetched, 0);
    assert!(harness.pubsub.published().is_empty());
}

#[tokio::test]
async fn test_retry_backoff_delays_next_attempt() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;
    harness
        .execute(send_message(alice, conversation.id, "later", None))
        .await
        .unwrap();

    harness.pubsub.set_fail_publish(true);
    let worker = harness.worker(OutboxWorkerConfig {
        retry_backoff: Some(application::Backoff::fixed(Duration::from_secs(10))),
        ..OutboxWorkerConfig::default()
    });
    assert_eq!(worker.run_once().await.unwrap().retried, 1);

    harness.pubsub.set_fail_publish(false);
    assert_eq!(worker.run_once().await.unwrap().fetched, 0);

    harness.clock.advance(chrono::Duration::seconds(10));
    assert_eq!(worker.run_once().await.unwrap().completed, 1);
}

#[tokio::test]
async fn test_undecodable_event_fails_immediately() {
    let harness = Harness::new();
    let bogus = OutboxEvent::pending(
        "message.exploded",
        "message",
        Uuid::new_v4(),
        "{}",
        harness.clock.now(),
    );
    harness.store.seed_outbox_event(bogus.clone()).await;

    let worker = harness.worker(OutboxWorkerConfig::default());
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let row = harness.store.find_by_id(bogus.id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.retry_count, 0);

    let notices = harness.pubsub.published_on(Channel::SYSTEM_OUTBOX);
    assert_eq!(notices.len(), 1);
    let envelope = EventEnvelope::from_json(&notices[0].payload).unwrap();
    assert_eq!(envelope.event_type, "outbox.dead_lettered");
    assert_eq!(envelope.payload["event_type"], "message.exploded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_never_double_publish() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;
    for i in 0..60 {
        harness
            .execute(send_message(alice, conversation.id, &format!("m{i}"), None))
            .await
            .unwrap();
    }

    let config = OutboxWorkerConfig {
        batch_size: 20,
        ..OutboxWorkerConfig::default()
    };
    let first = Arc::new(harness.worker(config.clone()));
    let second = Arc::new(harness.worker(config));

    let mut completed = 0;
    for _ in 0..10 {
        let (a, b) = tokio::join!(
            tokio::spawn({
                let worker = first.clone();
                async move { worker.run_once().await }
            }),
            tokio::spawn({
                let worker = second.clone();
                async move { worker.run_once().await }
            })
        );
        completed += a.unwrap().unwrap().completed + b.unwrap().unwrap().completed;
    }

    assert_eq!(completed, 60);
    let published = harness.pubsub.published();
    assert_eq!(published.len(), 60);
    let distinct: HashSet<Uuid> = published
        .iter()
        .map(|message| EventEnvelope::from_json(&message.payload).unwrap().aggregate_id)
        .collect();
    assert_eq!(distinct.len(), 60);
    assert!(harness
        .store
        .outbox_events()
        .await
        .iter()
        .all(|row| row.status == OutboxStatus::Completed));
}

#[tokio::test]
async fn test_stale_claim_is_swept_back_to_pending() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;
    harness
        .execute(send_message(alice, conversation.id, "stuck", None))
        .await
        .unwrap();
    let id = harness.store.outbox_events().await[0].id;

    // 模拟认领后崩溃的 Worker
    assert!(harness.store.claim(id, harness.clock.now()).await.unwrap());

    let worker = harness.worker(OutboxWorkerConfig::default());
    assert_eq!(worker.sweep_stale_claims().await.unwrap(), 0);
    assert_eq!(worker.run_once().await.unwrap().fetched, 0);

    harness.clock.advance(chrono::Duration::seconds(31));
    assert_eq!(worker.sweep_stale_claims().await.unwrap(), 1);
    assert_eq!(worker.run_once().await.unwrap().completed, 1);
}

#[tokio::test]
async fn test_requeued_failed_event_is_delivered() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;
    harness
        .execute(send_message(alice, conversation.id, "again", None))
        .await
        .unwrap();

    harness.pubsub.set_fail_publish(true);
    let worker = harness.worker(OutboxWorkerConfig {
        max_retries: 0,
        ..OutboxWorkerConfig::default()
    });
    assert_eq!(worker.run_once().await.unwrap().failed, 1);

    let failed = harness.store.list_failed(10).await.unwrap();
    assert_eq!(failed.len(), 1);

    harness.pubsub.set_fail_publish(false);
    assert!(harness
        .store
        .requeue_failed(failed[0].id, harness.clock.now())
        .await
        .unwrap());
    assert!(!harness
        .store
        .requeue_failed(failed[0].id, harness.clock.now())
        .await
        .unwrap());

    assert_eq!(worker.run_once().await.unwrap().completed, 1);
    let row = harness.store.find_by_id(failed[0].id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Completed);
    assert_eq!(row.retry_count, 0);
}

#[tokio::test]
async fn test_worker_start_and_stop() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let conversation = harness.conversation(alice, &[bob]).await;
    harness
        .execute(send_message(alice, conversation.id, "bg", None))
        .await
        .unwrap();

    let worker = Arc::new(harness.worker(OutboxWorkerConfig {
        poll_interval: Duration::from_millis(10),
        ..OutboxWorkerConfig::default()
    }));
    let task = worker.start();

    let mut delivered = false;
    for _ in 0..100 {
        if !harness.pubsub.published().is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    task.stop().await;
    task.stop().await;

    assert!(delivered);
    assert_eq!(
        harness.store.outbox_events().await[0].status,
        OutboxStatus::Completed
    );
}
