use std::sync::Arc;

use async_trait::async_trait;
use domain::{Message, MessageCreated, MessageId, MessageRead, ReadReceipt, RealtimeEvent};

use super::mismatched;
use crate::bus::CommandHandler;
use crate::commands::{Command, CommandContext, CommandResult};
use crate::error::ApplicationResult;
use crate::outbox::OutboxEmitter;

/// 发送消息
pub struct SendMessageHandler {
    emitter: Arc<OutboxEmitter>,
}

impl SendMessageHandler {
    pub fn new(emitter: Arc<OutboxEmitter>) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl CommandHandler for SendMessageHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let Command::SendMessage(cmd) = command else {
            return Err(mismatched(command));
        };
        if let Some(result) = self.emitter.replay(command).await? {
            return Ok(result);
        }

        let message = Message::new(
            MessageId::new(),
            cmd.conversation_id,
            cmd.actor_id,
            cmd.message_type,
            cmd.content.clone(),
            self.emitter.now(),
        )?;

        let mut tx = self.emitter.begin().await?;
        tx.insert_message(&message).await?;

        let event = RealtimeEvent::MessageCreated(MessageCreated { message });
        Ok(self.emitter.commit(tx, command, &event).await?.into_result())
    }
}

/// 标记消息已读
pub struct MarkMessageReadHandler {
    emitter: Arc<OutboxEmitter>,
}

impl MarkMessageReadHandler {
    pub fn new(emitter: Arc<OutboxEmitter>) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl CommandHandler for MarkMessageReadHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let Command::MarkMessageRead(cmd) = command else {
            return Err(mismatched(command));
        };
        if let Some(result) = self.emitter.replay(command).await? {
            return Ok(result);
        }

        let receipt = ReadReceipt {
            message_id: cmd.message_id,
            conversation_id: cmd.conversation_id,
            user_id: cmd.actor_id,
            read_at: self.emitter.now(),
        };

        let mut tx = self.emitter.begin().await?;
        tx.insert_read_receipt(&receipt).await?;

        let event = RealtimeEvent::MessageRead(MessageRead { receipt });
        Ok(self.emitter.commit(tx, command, &event).await?.into_result())
    }
}
