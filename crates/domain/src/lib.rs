//! 实时消息系统核心领域模型
//!
//! 包含会话、消息、通话等实体，频道与实时事件定义，以及 Outbox 与命令日志记录。

pub mod channel;
pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

pub use channel::{Channel, ChannelKind};
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use value_objects::*;
