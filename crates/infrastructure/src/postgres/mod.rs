//! PostgreSQL 适配器
//!
//! `PgStore` 提供事务与只读仓储，`PgOutboxRepository` 提供 Worker 使用的
//! Outbox 状态机操作。所有时间列均为 `TIMESTAMPTZ`，映射为 `DateTime<Utc>`。

mod outbox;
mod store;

pub use outbox::PgOutboxRepository;
pub use store::{PgStore, PgTransaction};

use domain::{
    CommandLog, CommandLogId, CommandStatus, OutboxEvent, OutboxEventId, OutboxStatus,
    RepositoryError, Timestamp, UserId,
};
use sqlx::migrate::Migrator;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

/// 仓库根目录下的迁移脚本
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// 唯一约束冲突映射为 `Conflict`，外键缺失映射为 `NotFound`，其余归为存储错误
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub(crate) const OUTBOX_COLUMNS: &str = "id, event_type, aggregate_type, aggregate_id, payload, \
     status, retry_count, error, created_at, updated_at, processed_at, next_retry_at, claimed_at";

#[derive(Debug, FromRow)]
pub(crate) struct OutboxRecord {
    id: Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: Uuid,
    payload: String,
    status: String,
    retry_count: i32,
    error: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
    processed_at: Option<Timestamp>,
    next_retry_at: Option<Timestamp>,
    claimed_at: Option<Timestamp>,
}

impl TryFrom<OutboxRecord> for OutboxEvent {
    type Error = RepositoryError;

    fn try_from(value: OutboxRecord) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse::<OutboxStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(OutboxEvent {
            id: OutboxEventId::from(value.id),
            event_type: value.event_type,
            aggregate_type: value.aggregate_type,
            aggregate_id: value.aggregate_id,
            payload: value.payload,
            status,
            retry_count: value.retry_count,
            error: value.error,
            created_at: value.created_at,
            updated_at: value.updated_at,
            processed_at: value.processed_at,
            next_retry_at: value.next_retry_at,
            claimed_at: value.claimed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct CommandLogRecord {
    id: Uuid,
    command_type: String,
    actor_id: Uuid,
    aggregate_type: String,
    aggregate_id: Uuid,
    payload: String,
    idempotency_key: Option<String>,
    status: String,
    created_at: Timestamp,
    executed_at: Option<Timestamp>,
    error: Option<String>,
}

impl TryFrom<CommandLogRecord> for CommandLog {
    type Error = RepositoryError;

    fn try_from(value: CommandLogRecord) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse::<CommandStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(CommandLog {
            id: CommandLogId::from(value.id),
            command_type: value.command_type,
            actor_id: UserId::from(value.actor_id),
            aggregate_type: value.aggregate_type,
            aggregate_id: value.aggregate_id,
            payload: value.payload,
            idempotency_key: value.idempotency_key,
            status,
            created_at: value.created_at,
            executed_at: value.executed_at,
            error: value.error,
        })
    }
}
