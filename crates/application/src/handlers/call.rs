use std::sync::Arc;

use async_trait::async_trait;
use domain::{CallId, CallInitiated, CallRecord, CallState, RealtimeEvent};
use tracing::warn;

use super::mismatched;
use crate::bus::CommandHandler;
use crate::calls::CallSignalingRelay;
use crate::commands::{Command, CommandContext, CommandResult};
use crate::error::{ApplicationError, ApplicationResult};
use crate::outbox::OutboxEmitter;
use crate::repository::ConversationRepository;

/// 发起通话：持久化通话记录并写 `call.initiated`，提交后写入振铃状态
pub struct InitiateCallHandler {
    emitter: Arc<OutboxEmitter>,
    conversations: Arc<dyn ConversationRepository>,
    relay: Arc<CallSignalingRelay>,
}

impl InitiateCallHandler {
    pub fn new(
        emitter: Arc<OutboxEmitter>,
        conversations: Arc<dyn ConversationRepository>,
        relay: Arc<CallSignalingRelay>,
    ) -> Self {
        Self {
            emitter,
            conversations,
            relay,
        }
    }
}

#[async_trait]
impl CommandHandler for InitiateCallHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let Command::InitiateCall(cmd) = command else {
            return Err(mismatched(command));
        };
        if let Some(result) = self.emitter.replay(command).await? {
            return Ok(result);
        }

        let conversation = self
            .conversations
            .find_by_id(cmd.conversation_id)
            .await?
            .ok_or_else(|| {
                ApplicationError::not_found(format!("会话不存在: {}", cmd.conversation_id))
            })?;

        let record = CallRecord {
            id: CallId::new(),
            conversation_id: conversation.id,
            initiator_id: cmd.actor_id,
            call_type: cmd.call_type,
            participant_ids: conversation.participant_ids.clone(),
            created_at: self.emitter.now(),
        };
        let state = CallState::ringing(&record);

        let mut tx = self.emitter.begin().await?;
        tx.insert_call(&record).await?;

        let event = RealtimeEvent::CallInitiated(CallInitiated { call: record });
        let emission = self.emitter.commit(tx, command, &event).await?;

        if emission.is_committed() {
            if let Err(err) = self.relay.begin(&state).await {
                warn!(call_id = %state.call_id, error = %err, "写入振铃状态失败");
            }
        }
        Ok(emission.into_result())
    }
}
