use application::repository::OutboxRepository;
use async_trait::async_trait;
use domain::{OutboxEvent, OutboxEventId, OutboxStatus, RepositoryError, Timestamp};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{invalid_data, map_sqlx_err, OutboxRecord, OUTBOX_COLUMNS};

/// Outbox 状态机的数据库实现
///
/// 所有状态转换都是带状态条件的单条 `UPDATE`，多个 Worker 并发时
/// 只有一方能让 `rows_affected` 为 1。
#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_events(records: Vec<OutboxRecord>) -> Result<Vec<OutboxEvent>, RepositoryError> {
    records.into_iter().map(OutboxEvent::try_from).collect()
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn fetch_pending(
        &self,
        limit: i64,
        now: Timestamp,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE status = 'PENDING' AND (next_retry_at IS NULL OR next_retry_at <= $1) \
             ORDER BY created_at ASC LIMIT $2"
        );
        let records = sqlx::query_as::<_, OutboxRecord>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        into_events(records)
    }

    async fn claim(&self, id: OutboxEventId, now: Timestamp) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PROCESSING', claimed_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(Uuid::from(id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, id: OutboxEventId, now: Timestamp) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'COMPLETED', processed_at = $2, updated_at = $2,
                claimed_at = NULL, error = NULL
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(Uuid::from(id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            warn!(event_id = %id, "标记完成时事件已不在 PROCESSING 状态");
            return Err(RepositoryError::Conflict);
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: OutboxEventId,
        error: &str,
        max_retries: i32,
        next_retry_at: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<OutboxStatus, RepositoryError> {
        let status = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                error = $2,
                claimed_at = NULL,
                updated_at = $5,
                status = CASE WHEN retry_count + 1 > $3 THEN 'FAILED' ELSE 'PENDING' END,
                next_retry_at = CASE WHEN retry_count + 1 > $3 THEN NULL ELSE $4 END
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING status
            "#,
        )
        .bind(Uuid::from(id))
        .bind(error)
        .bind(max_retries)
        .bind(next_retry_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::Conflict)?;

        status
            .parse::<OutboxStatus>()
            .map_err(|err| invalid_data(err.to_string()))
    }

    async fn mark_failed(
        &self,
        id: OutboxEventId,
        error: &str,
        now: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'FAILED', error = $2, claimed_at = NULL,
                next_retry_at = NULL, updated_at = $3
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(Uuid::from(id))
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict);
        }
        Ok(())
    }

    async fn reset_stale_claims(
        &self,
        claimed_before: Timestamp,
        now: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING', claimed_at = NULL, updated_at = $2
            WHERE status = 'PROCESSING' AND (claimed_at IS NULL OR claimed_at < $1)
            "#,
        )
        .bind(claimed_before)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let reset = result.rows_affected();
        if reset > 0 {
            debug!(reset, "回收超时认领的 outbox 事件");
        }
        Ok(reset)
    }

    async fn list_failed(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE status = 'FAILED' ORDER BY updated_at DESC LIMIT $1"
        );
        let records = sqlx::query_as::<_, OutboxRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        into_events(records)
    }

    async fn requeue_failed(&self, id: OutboxEventId, now: Timestamp) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING', retry_count = 0, error = NULL,
                next_retry_at = NULL, updated_at = $2
            WHERE id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(Uuid::from(id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, RepositoryError> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE id = $1");
        let record = sqlx::query_as::<_, OutboxRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record.map(OutboxEvent::try_from).transpose()
    }

    async fn find_by_aggregate(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE aggregate_type = $1 AND aggregate_id = $2 ORDER BY created_at ASC"
        );
        let records = sqlx::query_as::<_, OutboxRecord>(&sql)
            .bind(aggregate_type)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        into_events(records)
    }
}
