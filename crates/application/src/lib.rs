//! 应用层实现。
//!
//! 命令总线与处理器、事务内的 Outbox 写入、Outbox Worker、
//! WebSocket Hub 与 Pub/Sub 桥接、频道授权以及通话信令转发。
//! 外部依赖（数据库、Pub/Sub、通话状态存储）都通过 trait 注入。

pub mod bus;
pub mod calls;
pub mod clock;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod memory;
pub mod outbox;
pub mod proxies;
pub mod realtime;
pub mod repository;
pub mod retry;
pub mod transport;

pub use bus::{AuthorizationProxy, CommandBus, CommandHandler};
pub use calls::{CallSignalingRelay, CallStateStore, Signal, SignalKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{Command, CommandContext, CommandResult};
pub use error::{ApplicationError, ApplicationResult};
pub use handlers::{register_default_handlers, HandlerDependencies};
pub use lifecycle::BackgroundTask;
pub use outbox::{BatchReport, Emission, OutboxEmitter, OutboxWorker, OutboxWorkerConfig};
pub use proxies::{ConversationAccessProxy, PrincipalProxy};
pub use realtime::{
    ChannelAuthorizer, ClientFrame, ClientHandle, ClientId, Hub, PubSubBridge,
    RepositoryChannelAuthorizer, ServerFrame, SubscriptionService,
};
pub use repository::{
    BroadcastListRepository, CallRepository, CommandLogRepository, ConversationRepository,
    OutboxRepository, Transaction, UnitOfWork,
};
pub use retry::Backoff;
pub use transport::{EventPublisher, EventSubscriber, TransportError, TransportMessage};
