//! 领域实体定义
//!
//! 包含会话、消息、通话、在线状态、广播列表，以及 Outbox 与命令日志记录。

pub mod broadcast_list;
pub mod call;
pub mod command_log;
pub mod conversation;
pub mod message;
pub mod outbox;
pub mod presence;

pub use broadcast_list::BroadcastList;
pub use call::{CallRecord, CallState, CallStatus, CallType, ParticipantState};
pub use command_log::{CommandLog, CommandStatus};
pub use conversation::Conversation;
pub use message::{Message, MessageType, ReadReceipt, MAX_MESSAGE_LENGTH};
pub use outbox::{OutboxEvent, OutboxStatus};
pub use presence::{PresenceRecord, PresenceStatus};
