use application::repository::{
    BroadcastListRepository, CallRepository, CommandLogRepository, ConversationRepository,
    Transaction, UnitOfWork,
};
use async_trait::async_trait;
use domain::{
    BroadcastListId, CallId, CallRecord, CallType, CommandLog, Conversation, ConversationId, Message,
    OutboxEvent, PresenceRecord, ReadReceipt, RepositoryError, Timestamp, UserId,
};
use sqlx::{FromRow, PgPool, Postgres};
use tracing::debug;
use uuid::Uuid;

use super::{invalid_data, map_sqlx_err, CommandLogRecord};

/// 基于连接池的仓储实现，同时提供事务入口
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// 一次数据库事务，提交前的写入对其他连接不可见
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert_conversation(
        &mut self,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_by, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(conversation.title.as_deref())
        .bind(Uuid::from(conversation.created_by))
        .bind(conversation.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, position, joined_at)
            SELECT $1, p.user_id, p.ord::INTEGER, $3
            FROM UNNEST($2::UUID[]) WITH ORDINALITY AS p(user_id, ord)
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(uuids(&conversation.participant_ids))
        .bind(conversation.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn remove_participant(
        &mut self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn insert_message(&mut self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, message_type, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// 消息必须属于回执中的会话，否则视为不存在
    async fn insert_read_receipt(&mut self, receipt: &ReadReceipt) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reads (message_id, user_id, conversation_id, read_at)
            SELECT m.id, $2, m.conversation_id, $4
            FROM messages m
            WHERE m.id = $1 AND m.conversation_id = $3
            ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = EXCLUDED.read_at
            "#,
        )
        .bind(Uuid::from(receipt.message_id))
        .bind(Uuid::from(receipt.user_id))
        .bind(Uuid::from(receipt.conversation_id))
        .bind(receipt.read_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn insert_call(&mut self, call: &CallRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO calls (id, conversation_id, initiator_id, call_type, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::from(call.id))
        .bind(Uuid::from(call.conversation_id))
        .bind(Uuid::from(call.initiator_id))
        .bind(call.call_type.as_str())
        .bind(call.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO call_participants (call_id, user_id, position)
            SELECT $1, p.user_id, p.ord::INTEGER
            FROM UNNEST($2::UUID[]) WITH ORDINALITY AS p(user_id, ord)
            "#,
        )
        .bind(Uuid::from(call.id))
        .bind(uuids(&call.participant_ids))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn upsert_presence(&mut self, presence: &PresenceRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO user_presence (user_id, status, last_seen_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET status = EXCLUDED.status, last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(Uuid::from(presence.user_id))
        .bind(presence.status.as_str())
        .bind(presence.last_seen_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                id, event_type, aggregate_type, aggregate_id, payload, status,
                retry_count, error, created_at, updated_at, processed_at, next_retry_at, claimed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Uuid::from(event.id))
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retry_count)
        .bind(event.error.as_deref())
        .bind(event.created_at)
        .bind(event.updated_at)
        .bind(event.processed_at)
        .bind(event.next_retry_at)
        .bind(event.claimed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn insert_command_log(&mut self, log: &CommandLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO command_logs (
                id, command_type, actor_id, aggregate_type, aggregate_id, payload,
                idempotency_key, status, created_at, executed_at, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(log.id))
        .bind(&log.command_type)
        .bind(Uuid::from(log.actor_id))
        .bind(&log.aggregate_type)
        .bind(log.aggregate_id)
        .bind(&log.payload)
        .bind(log.idempotency_key.as_deref())
        .bind(log.status.as_str())
        .bind(log.created_at)
        .bind(log.executed_at)
        .bind(log.error.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await.map_err(map_sqlx_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await.map_err(map_sqlx_err)
    }
}

#[async_trait]
impl UnitOfWork for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, RepositoryError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        debug!("开启数据库事务");
        Ok(Box::new(PgTransaction { tx }))
    }
}

#[async_trait]
impl CommandLogRepository for PgStore {
    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<CommandLog>, RepositoryError> {
        let record = sqlx::query_as::<_, CommandLogRecord>(
            r#"
            SELECT id, command_type, actor_id, aggregate_type, aggregate_id, payload,
                   idempotency_key, status, created_at, executed_at, error
            FROM command_logs
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(CommandLog::try_from).transpose()
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    title: Option<String>,
    created_by: Uuid,
    created_at: Timestamp,
    participant_ids: Vec<Uuid>,
}

impl From<ConversationRecord> for Conversation {
    fn from(value: ConversationRecord) -> Self {
        Conversation {
            id: ConversationId::from(value.id),
            title: value.title,
            created_by: UserId::from(value.created_by),
            participant_ids: value.participant_ids.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
        }
    }
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.title, c.created_by, c.created_at,
                   COALESCE(
                       ARRAY_AGG(p.user_id ORDER BY p.position) FILTER (WHERE p.user_id IS NOT NULL),
                       '{}'
                   ) AS participant_ids
            FROM conversations c
            LEFT JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE c.id = $1
            GROUP BY c.id
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Conversation::from))
    }

    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM conversation_participants
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn share_conversation(&self, a: UserId, b: UserId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM conversation_participants pa
                JOIN conversation_participants pb ON pb.conversation_id = pa.conversation_id
                WHERE pa.user_id = $1 AND pb.user_id = $2
            )
            "#,
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Debug, FromRow)]
struct CallRecordRow {
    id: Uuid,
    conversation_id: Uuid,
    initiator_id: Uuid,
    call_type: String,
    created_at: Timestamp,
    participant_ids: Vec<Uuid>,
}

impl TryFrom<CallRecordRow> for CallRecord {
    type Error = RepositoryError;

    fn try_from(value: CallRecordRow) -> Result<Self, Self::Error> {
        let call_type = value
            .call_type
            .parse::<CallType>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(CallRecord {
            id: CallId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            initiator_id: UserId::from(value.initiator_id),
            call_type,
            participant_ids: value.participant_ids.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
        })
    }
}

#[async_trait]
impl CallRepository for PgStore {
    async fn find_by_id(&self, id: CallId) -> Result<Option<CallRecord>, RepositoryError> {
        let record = sqlx::query_as::<_, CallRecordRow>(
            r#"
            SELECT c.id, c.conversation_id, c.initiator_id, c.call_type, c.created_at,
                   COALESCE(
                       ARRAY_AGG(p.user_id ORDER BY p.position) FILTER (WHERE p.user_id IS NOT NULL),
                       '{}'
                   ) AS participant_ids
            FROM calls c
            LEFT JOIN call_participants p ON p.call_id = c.id
            WHERE c.id = $1
            GROUP BY c.id
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(CallRecord::try_from).transpose()
    }

    async fn is_participant(&self, call_id: CallId, user_id: UserId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM call_participants WHERE call_id = $1 AND user_id = $2)",
        )
        .bind(Uuid::from(call_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[async_trait]
impl BroadcastListRepository for PgStore {
    async fn is_member(
        &self,
        list_id: BroadcastListId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM broadcast_lists WHERE id = $1 AND owner_id = $2
                UNION ALL
                SELECT 1 FROM broadcast_recipients WHERE list_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(Uuid::from(list_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}
