//! 持久化抽象
//!
//! 命令处理器通过 `UnitOfWork::begin` 打开一个事务，在事务内写领域数据、
//! Outbox 行以及命令日志，最后一次性提交。其余仓储接口只做读取，
//! Outbox 仓储由 Worker 使用。

use async_trait::async_trait;
use domain::{
    BroadcastListId, CallId, CallRecord, CommandLog, Conversation, ConversationId, Message,
    OutboxEvent, OutboxEventId, OutboxStatus, PresenceRecord, ReadReceipt, RepositoryError,
    Timestamp, UserId,
};
use uuid::Uuid;

/// 事务内的写操作
#[async_trait]
pub trait Transaction: Send {
    async fn insert_conversation(&mut self, conversation: &Conversation)
        -> Result<(), RepositoryError>;
    async fn remove_participant(
        &mut self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), RepositoryError>;
    async fn insert_message(&mut self, message: &Message) -> Result<(), RepositoryError>;
    async fn insert_read_receipt(&mut self, receipt: &ReadReceipt) -> Result<(), RepositoryError>;
    async fn insert_call(&mut self, call: &CallRecord) -> Result<(), RepositoryError>;
    async fn upsert_presence(&mut self, presence: &PresenceRecord) -> Result<(), RepositoryError>;
    async fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<(), RepositoryError>;
    /// 幂等键冲突时返回 `RepositoryError::Conflict`
    async fn insert_command_log(&mut self, log: &CommandLog) -> Result<(), RepositoryError>;
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, RepositoryError>;
}

#[async_trait]
pub trait CommandLogRepository: Send + Sync {
    async fn find_by_idempotency_key(&self, key: &str)
        -> Result<Option<CommandLog>, RepositoryError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// 按创建时间取出到期的 PENDING 行
    async fn fetch_pending(
        &self,
        limit: i64,
        now: Timestamp,
    ) -> Result<Vec<OutboxEvent>, RepositoryError>;

    /// 条件更新 PENDING → PROCESSING，返回是否抢占成功
    async fn claim(&self, id: OutboxEventId, now: Timestamp) -> Result<bool, RepositoryError>;

    async fn mark_completed(&self, id: OutboxEventId, now: Timestamp)
        -> Result<(), RepositoryError>;

    /// 记录一次发布失败：`retry_count += 1`，超过上限则置为 FAILED，否则回到 PENDING。
    /// 返回写入后的状态。
    async fn record_failure(
        &self,
        id: OutboxEventId,
        error: &str,
        max_retries: i32,
        next_retry_at: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<OutboxStatus, RepositoryError>;

    /// 直接置为 FAILED（负载无法解码）
    async fn mark_failed(
        &self,
        id: OutboxEventId,
        error: &str,
        now: Timestamp,
    ) -> Result<(), RepositoryError>;

    /// 将认领时间早于 `claimed_before` 的 PROCESSING 行放回 PENDING
    async fn reset_stale_claims(
        &self,
        claimed_before: Timestamp,
        now: Timestamp,
    ) -> Result<u64, RepositoryError>;

    async fn list_failed(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepositoryError>;

    /// FAILED → PENDING 并清零重试次数，返回是否有行被更新
    async fn requeue_failed(&self, id: OutboxEventId, now: Timestamp)
        -> Result<bool, RepositoryError>;

    async fn find_by_id(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, RepositoryError>;

    async fn find_by_aggregate(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Vec<OutboxEvent>, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;
    /// 两个用户是否至少共同在一个会话中
    async fn share_conversation(&self, a: UserId, b: UserId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn find_by_id(&self, id: CallId) -> Result<Option<CallRecord>, RepositoryError>;
    async fn is_participant(&self, call_id: CallId, user_id: UserId)
        -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BroadcastListRepository: Send + Sync {
    /// 所有者或接收者
    async fn is_member(&self, list_id: BroadcastListId, user_id: UserId)
        -> Result<bool, RepositoryError>;
}
