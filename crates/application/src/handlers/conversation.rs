use std::sync::Arc;

use async_trait::async_trait;
use domain::{Conversation, ConversationCreated, ConversationId, ParticipantRemoved, RealtimeEvent};

use super::mismatched;
use crate::bus::CommandHandler;
use crate::commands::{Command, CommandContext, CommandResult};
use crate::error::{ApplicationError, ApplicationResult};
use crate::outbox::OutboxEmitter;
use crate::repository::ConversationRepository;

/// 创建会话
pub struct CreateConversationHandler {
    emitter: Arc<OutboxEmitter>,
}

impl CreateConversationHandler {
    pub fn new(emitter: Arc<OutboxEmitter>) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl CommandHandler for CreateConversationHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let Command::CreateConversation(cmd) = command else {
            return Err(mismatched(command));
        };
        if let Some(result) = self.emitter.replay(command).await? {
            return Ok(result);
        }

        let conversation = Conversation::new(
            ConversationId::new(),
            cmd.title.clone(),
            cmd.actor_id,
            &cmd.participant_ids,
            self.emitter.now(),
        )?;

        let mut tx = self.emitter.begin().await?;
        tx.insert_conversation(&conversation).await?;

        let event = RealtimeEvent::ConversationCreated(ConversationCreated { conversation });
        Ok(self.emitter.commit(tx, command, &event).await?.into_result())
    }
}

/// 移除参与者：会话创建者可以移除任何人，其他人只能移除自己（退出）
pub struct RemoveParticipantHandler {
    emitter: Arc<OutboxEmitter>,
    conversations: Arc<dyn ConversationRepository>,
}

impl RemoveParticipantHandler {
    pub fn new(
        emitter: Arc<OutboxEmitter>,
        conversations: Arc<dyn ConversationRepository>,
    ) -> Self {
        Self {
            emitter,
            conversations,
        }
    }
}

#[async_trait]
impl CommandHandler for RemoveParticipantHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let Command::RemoveParticipant(cmd) = command else {
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

        if cmd.actor_id != conversation.created_by && cmd.actor_id != cmd.user_id {
            return Err(ApplicationError::authorization(
                "只有会话创建者可以移除其他参与者",
            ));
        }
        if !conversation.is_participant(cmd.user_id) {
            return Err(ApplicationError::validation(format!(
                "用户 {} 不是会话参与者",
                cmd.user_id
            )));
        }

        let mut tx = self.emitter.begin().await?;
        tx.remove_participant(cmd.conversation_id, cmd.user_id)
            .await?;

        let event = RealtimeEvent::ParticipantRemoved(ParticipantRemoved {
            conversation_id: cmd.conversation_id,
            user_id: cmd.user_id,
            removed_by: cmd.actor_id,
        });
        Ok(self.emitter.commit(tx, command, &event).await?.into_result())
    }
}
