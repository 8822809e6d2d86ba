mod support;

use application::calls::{CallStateStore, Signal, SignalKind};
use application::commands::InitiateCallCommand;
use application::{ApplicationError, Command, OutboxWorkerConfig};
use domain::{CallId, CallStatus, CallType, Channel, EventEnvelope, ParticipantState, UserId};
use serde_json::json;
use support::Harness;

async fn start_call(harness: &Harness, initiator: UserId, members: &[UserId]) -> CallId {
    let conversation = harness.conversation(initiator, members).await;
    let result = harness
        .execute(Command::InitiateCall(InitiateCallCommand {
            actor_id: initiator,
            conversation_id: conversation.id,
            call_type: CallType::Video,
            idempotency_key: None,
        }))
        .await
        .unwrap();
    assert_eq!(result.aggregate_type, "call");
    CallId::from(result.aggregate_id)
}

#[tokio::test]
async fn test_initiate_call_stores_ringing_state_and_notifies_callees() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let call_id = start_call(&harness, alice, &[bob]).await;

    let state = harness.call_states.get(call_id).await.unwrap().unwrap();
    assert_eq!(state.status, CallStatus::Ringing);
    assert_eq!(state.participants[&bob], ParticipantState::Invited);

    harness
        .worker(OutboxWorkerConfig::default())
        .run_once()
        .await
        .unwrap();
    let to_bob = harness.pubsub.published_on(&Channel::User(bob).to_string());
    assert_eq!(to_bob.len(), 1);
    let envelope = EventEnvelope::from_json(&to_bob[0].payload).unwrap();
    assert_eq!(envelope.event_type, "call.initiated");
    assert!(harness
        .pubsub
        .published_on(&Channel::User(alice).to_string())
        .is_empty());
}

#[tokio::test]
async fn test_offer_is_relayed_to_recipient_without_outbox() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let call_id = start_call(&harness, alice, &[bob]).await;
    let outbox_rows = harness.store.outbox_events().await.len();

    harness
        .relay
        .relay(Signal {
            kind: SignalKind::Offer,
            call_id,
            from: alice,
            to: bob,
            data: json!({"sdp": "v=0"}),
        })
        .await
        .unwrap();

    assert_eq!(harness.store.outbox_events().await.len(), outbox_rows);
    let to_bob = harness.pubsub.published_on(&Channel::User(bob).to_string());
    assert_eq!(to_bob.len(), 1);
    let envelope = EventEnvelope::from_json(&to_bob[0].payload).unwrap();
    assert_eq!(envelope.event_type, "call.offer");
    assert_eq!(envelope.payload["data"]["sdp"], "v=0");
}

#[tokio::test]
async fn test_answer_connects_call() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let call_id = start_call(&harness, alice, &[bob]).await;

    harness
        .relay
        .relay(Signal {
            kind: SignalKind::Answer,
            call_id,
            from: bob,
            to: alice,
            data: json!({"sdp": "answer"}),
        })
        .await
        .unwrap();

    let state = harness.call_states.get(call_id).await.unwrap().unwrap();
    assert_eq!(state.status, CallStatus::Connected);
    assert_eq!(state.participants[&bob], ParticipantState::Joined);
    assert!(state.connected_at.is_some());
}

#[tokio::test]
async fn test_initiator_answer_leaves_call_ringing() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let call_id = start_call(&harness, alice, &[bob]).await;

    let err = harness
        .relay
        .relay(Signal {
            kind: SignalKind::Answer,
            call_id,
            from: alice,
            to: bob,
            data: json!({"sdp": "answer"}),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Conflict(_)));

    let state = harness.call_states.get(call_id).await.unwrap().unwrap();
    assert_eq!(state.status, CallStatus::Ringing);
    assert!(state.connected_at.is_none());
    assert_eq!(state.participants[&bob], ParticipantState::Invited);
    assert!(harness
        .pubsub
        .published_on(&Channel::User(bob).to_string())
        .is_empty());
}

#[tokio::test]
async fn test_failed_answer_publish_keeps_call_ringing() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let call_id = start_call(&harness, alice, &[bob]).await;

    harness.pubsub.set_fail_publish(true);
    let err = harness
        .relay
        .relay(Signal {
            kind: SignalKind::Answer,
            call_id,
            from: bob,
            to: alice,
            data: json!({"sdp": "answer"}),
        })
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let state = harness.call_states.get(call_id).await.unwrap().unwrap();
    assert_eq!(state.status, CallStatus::Ringing);
    assert_eq!(state.participants[&bob], ParticipantState::Invited);
}

#[tokio::test]
async fn test_signal_from_outsider_is_rejected() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let mallory = UserId::new();
    let call_id = start_call(&harness, alice, &[bob]).await;

    let err = harness
        .relay
        .relay(Signal {
            kind: SignalKind::IceCandidate,
            call_id,
            from: mallory,
            to: bob,
            data: json!({}),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Authorization(_)));

    let err = harness
        .relay
        .relay(Signal {
            kind: SignalKind::Offer,
            call_id: CallId::new(),
            from: alice,
            to: bob,
            data: json!({}),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::NotFound(_)));
}

#[tokio::test]
async fn test_end_call_notifies_everyone_and_removes_state() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let call_id = start_call(&harness, alice, &[bob]).await;

    harness.relay.end(call_id, bob).await.unwrap();

    assert!(harness.call_states.get(call_id).await.unwrap().is_none());
    for channel in [
        Channel::Call(call_id),
        Channel::User(alice),
        Channel::User(bob),
    ] {
        let messages = harness.pubsub.published_on(&channel.to_string());
        assert_eq!(messages.len(), 1, "channel {channel}");
        let envelope = EventEnvelope::from_json(&messages[0].payload).unwrap();
        assert_eq!(envelope.event_type, "call.ended");
    }

    let err = harness.relay.end(call_id, bob).await.unwrap_err();
    assert!(matches!(err, ApplicationError::NotFound(_)));
}

#[tokio::test]
async fn test_decline_by_last_invitee_ends_call() {
    let harness = Harness::new();
    let alice = UserId::new();
    let bob = UserId::new();
    let carol = UserId::new();
    let call_id = start_call(&harness, alice, &[bob, carol]).await;

    harness.relay.decline(call_id, bob).await.unwrap();
    let state = harness.call_states.get(call_id).await.unwrap().unwrap();
    assert_eq!(state.participants[&bob], ParticipantState::Declined);
    assert_eq!(
        harness
            .pubsub
            .published_on(&Channel::User(alice).to_string())
            .len(),
        1
    );

    harness.relay.decline(call_id, carol).await.unwrap();
    assert!(harness.call_states.get(call_id).await.unwrap().is_none());
    let ended = harness.pubsub.published_on(&Channel::Call(call_id).to_string());
    let last = EventEnvelope::from_json(&ended.last().unwrap().payload).unwrap();
    assert_eq!(last.event_type, "call.ended");
}
