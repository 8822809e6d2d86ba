//! 内置授权代理

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::AuthorizationProxy;
use crate::commands::{Command, CommandContext};
use crate::error::{ApplicationError, ApplicationResult};
use crate::repository::ConversationRepository;

/// 调用者必须就是命令声明的执行者
#[derive(Debug, Default)]
pub struct PrincipalProxy;

#[async_trait]
impl AuthorizationProxy for PrincipalProxy {
    fn name(&self) -> &'static str {
        "principal"
    }

    async fn authorize(&self, ctx: &CommandContext, command: &Command) -> ApplicationResult<()> {
        if ctx.principal != command.actor_id() {
            return Err(ApplicationError::authorization(
                "调用者与命令执行者不一致",
            ));
        }
        Ok(())
    }
}

/// 会话内命令要求执行者是该会话的当前参与者
pub struct ConversationAccessProxy {
    conversations: Arc<dyn ConversationRepository>,
}

impl ConversationAccessProxy {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }
}

#[async_trait]
impl AuthorizationProxy for ConversationAccessProxy {
    fn name(&self) -> &'static str {
        "conversation_access"
    }

    async fn authorize(&self, _ctx: &CommandContext, command: &Command) -> ApplicationResult<()> {
        let Some(conversation_id) = command.conversation_scope() else {
            return Ok(());
        };

        let allowed = self
            .conversations
            .is_participant(conversation_id, command.actor_id())
            .await?;
        if !allowed {
            return Err(ApplicationError::authorization(format!(
                "用户不是会话 {conversation_id} 的参与者"
            )));
        }
        Ok(())
    }
}
