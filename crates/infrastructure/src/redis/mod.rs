//! Redis 模块
//!
//! Pub/Sub 发布与模式订阅，以及带过期时间的通话状态存储。

pub mod call_state;
pub mod error;
pub mod publisher;
pub mod subscriber;

pub use call_state::RedisCallStateStore;
pub use error::{RedisError, RedisResult};
pub use publisher::RedisEventPublisher;
pub use subscriber::{RedisEventSubscriber, SubscriberSettings};
