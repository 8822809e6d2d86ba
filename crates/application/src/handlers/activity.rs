use std::sync::Arc;

use async_trait::async_trait;
use domain::{PresenceChanged, PresenceRecord, PresenceStatus, RealtimeEvent, TypingChanged};

use super::mismatched;
use crate::bus::CommandHandler;
use crate::commands::{Command, CommandContext, CommandResult};
use crate::error::ApplicationResult;
use crate::outbox::OutboxEmitter;

/// 正在输入提示，只写 Outbox 行
pub struct SetTypingHandler {
    emitter: Arc<OutboxEmitter>,
}

impl SetTypingHandler {
    pub fn new(emitter: Arc<OutboxEmitter>) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl CommandHandler for SetTypingHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let Command::SetTyping(cmd) = command else {
            return Err(mismatched(command));
        };

        let payload = TypingChanged {
            conversation_id: cmd.conversation_id,
            user_id: cmd.actor_id,
        };
        let event = if cmd.is_typing {
            RealtimeEvent::TypingStarted(payload)
        } else {
            RealtimeEvent::TypingStopped(payload)
        };

        let tx = self.emitter.begin().await?;
        Ok(self.emitter.commit(tx, command, &event).await?.into_result())
    }
}

/// 更新在线状态
pub struct SetPresenceHandler {
    emitter: Arc<OutboxEmitter>,
}

impl SetPresenceHandler {
    pub fn new(emitter: Arc<OutboxEmitter>) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl CommandHandler for SetPresenceHandler {
    async fn handle(
        &self,
        _ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let Command::SetPresence(cmd) = command else {
            return Err(mismatched(command));
        };

        let now = self.emitter.now();
        let record = PresenceRecord {
            user_id: cmd.actor_id,
            status: cmd.status,
            last_seen_at: now,
        };

        let mut tx = self.emitter.begin().await?;
        tx.upsert_presence(&record).await?;

        let payload = PresenceChanged {
            user_id: cmd.actor_id,
            at: now,
        };
        let event = match cmd.status {
            PresenceStatus::Online => RealtimeEvent::PresenceOnline(payload),
            PresenceStatus::Offline => RealtimeEvent::PresenceOffline(payload),
        };
        Ok(self.emitter.commit(tx, command, &event).await?.into_result())
    }
}
