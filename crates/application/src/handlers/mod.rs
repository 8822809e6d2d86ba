//! 命令处理器
//!
//! 每个处理器只负责一种命令：幂等重放检查、事务内写领域数据，
//! 然后交给 `OutboxEmitter` 写 Outbox 行并提交。

mod activity;
mod call;
mod conversation;
mod message;

use std::sync::Arc;

pub use activity::{SetPresenceHandler, SetTypingHandler};
pub use call::InitiateCallHandler;
pub use conversation::{CreateConversationHandler, RemoveParticipantHandler};
pub use message::{MarkMessageReadHandler, SendMessageHandler};

use crate::bus::CommandBus;
use crate::calls::CallSignalingRelay;
use crate::commands::{command_types, Command};
use crate::error::{ApplicationError, ApplicationResult};
use crate::outbox::OutboxEmitter;
use crate::repository::ConversationRepository;

/// 处理器依赖
#[derive(Clone)]
pub struct HandlerDependencies {
    pub emitter: Arc<OutboxEmitter>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub relay: Arc<CallSignalingRelay>,
}

/// 注册全部内置命令处理器
pub fn register_default_handlers(
    bus: &mut CommandBus,
    deps: HandlerDependencies,
) -> ApplicationResult<()> {
    let HandlerDependencies {
        emitter,
        conversations,
        relay,
    } = deps;

    bus.register(
        command_types::SEND_MESSAGE,
        Arc::new(SendMessageHandler::new(emitter.clone())),
    )?;
    bus.register(
        command_types::MARK_MESSAGE_READ,
        Arc::new(MarkMessageReadHandler::new(emitter.clone())),
    )?;
    bus.register(
        command_types::CREATE_CONVERSATION,
        Arc::new(CreateConversationHandler::new(emitter.clone())),
    )?;
    bus.register(
        command_types::REMOVE_PARTICIPANT,
        Arc::new(RemoveParticipantHandler::new(
            emitter.clone(),
            conversations.clone(),
        )),
    )?;
    bus.register(
        command_types::INITIATE_CALL,
        Arc::new(InitiateCallHandler::new(emitter.clone(), conversations, relay)),
    )?;
    bus.register(
        command_types::SET_TYPING,
        Arc::new(SetTypingHandler::new(emitter.clone())),
    )?;
    bus.register(
        command_types::SET_PRESENCE,
        Arc::new(SetPresenceHandler::new(emitter)),
    )?;
    Ok(())
}

fn mismatched(command: &Command) -> ApplicationError {
    ApplicationError::validation(format!(
        "处理器与命令类型不匹配: {}",
        command.command_type()
    ))
}
