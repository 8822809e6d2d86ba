//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储（事务、Outbox、命令日志）以及 Redis Pub/Sub
//! 与通话状态存储，实现应用层定义的接口。

pub mod postgres;
pub mod redis;

pub use self::postgres::{create_pg_pool, PgOutboxRepository, PgStore, MIGRATOR};
pub use self::redis::{
    RedisCallStateStore, RedisError, RedisEventPublisher, RedisEventSubscriber, RedisResult,
    SubscriberSettings,
};
