//! 内存存储
//!
//! 实现全部仓储接口。事务先暂存写操作，提交时在同一把写锁下一次性应用，
//! 未提交的事务被丢弃即等价于回滚。幂等键唯一约束在提交时检查。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    BroadcastList, BroadcastListId, CallId, CallRecord, CommandLog, Conversation, ConversationId,
    Message, MessageId, OutboxEvent, OutboxEventId, OutboxStatus, PresenceRecord, ReadReceipt,
    RepositoryError, Timestamp, UserId,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::{
    BroadcastListRepository, CallRepository, CommandLogRepository, ConversationRepository,
    OutboxRepository, Transaction, UnitOfWork,
};

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, Message>,
    read_receipts: Vec<ReadReceipt>,
    calls: HashMap<CallId, CallRecord>,
    presence: HashMap<UserId, PresenceRecord>,
    broadcast_lists: HashMap<BroadcastListId, BroadcastList>,
    /// 按插入顺序保存
    outbox: Vec<OutboxEvent>,
    command_logs: Vec<CommandLog>,
}

impl MemoryState {
    fn outbox_mut(&mut self, id: OutboxEventId) -> Result<&mut OutboxEvent, RepositoryError> {
        self.outbox
            .iter_mut()
            .find(|event| event.id == id)
            .ok_or(RepositoryError::NotFound)
    }

    fn has_idempotency_key(&self, key: &str) -> bool {
        self.command_logs
            .iter()
            .any(|log| log.idempotency_key.as_deref() == Some(key))
    }
}

enum StagedWrite {
    InsertConversation(Conversation),
    RemoveParticipant(ConversationId, UserId),
    InsertMessage(Message),
    InsertReadReceipt(ReadReceipt),
    InsertCall(CallRecord),
    UpsertPresence(PresenceRecord),
    InsertOutbox(OutboxEvent),
    InsertCommandLog(CommandLog),
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    fail_next_outbox_insert: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让下一次 Outbox 写入失败，用于验证回滚
    pub fn fail_next_outbox_insert(&self) {
        self.fail_next_outbox_insert.store(true, Ordering::SeqCst);
    }

    pub async fn seed_conversation(&self, conversation: Conversation) {
        self.state
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation);
    }

    pub async fn seed_call(&self, call: CallRecord) {
        self.state.write().await.calls.insert(call.id, call);
    }

    pub async fn seed_broadcast_list(&self, list: BroadcastList) {
        self.state
            .write()
            .await
            .broadcast_lists
            .insert(list.id, list);
    }

    pub async fn seed_outbox_event(&self, event: OutboxEvent) {
        self.state.write().await.outbox.push(event);
    }

    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state.read().await.outbox.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.messages.values().cloned().collect()
    }

    pub async fn command_logs(&self) -> Vec<CommandLog> {
        self.state.read().await.command_logs.clone()
    }

    pub async fn presence(&self, user_id: UserId) -> Option<PresenceRecord> {
        self.state.read().await.presence.get(&user_id).cloned()
    }

    pub async fn read_receipts(&self) -> Vec<ReadReceipt> {
        self.state.read().await.read_receipts.clone()
    }
}

pub struct MemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    fail_outbox_insert: bool,
    staged: Vec<StagedWrite>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert_conversation(
        &mut self,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        self.staged
            .push(StagedWrite::InsertConversation(conversation.clone()));
        Ok(())
    }

    async fn remove_participant(
        &mut self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), RepositoryError> {
        let state = self.state.read().await;
        let conversation = state
            .conversations
            .get(&conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        if !conversation.is_participant(user_id) {
            return Err(RepositoryError::NotFound);
        }
        drop(state);
        self.staged
            .push(StagedWrite::RemoveParticipant(conversation_id, user_id));
        Ok(())
    }

    async fn insert_message(&mut self, message: &Message) -> Result<(), RepositoryError> {
        if !self
            .state
            .read()
            .await
            .conversations
            .contains_key(&message.conversation_id)
        {
            return Err(RepositoryError::NotFound);
        }
        self.staged.push(StagedWrite::InsertMessage(message.clone()));
        Ok(())
    }

    async fn insert_read_receipt(&mut self, receipt: &ReadReceipt) -> Result<(), RepositoryError> {
        let known = self
            .state
            .read()
            .await
            .messages
            .get(&receipt.message_id)
            .map(|message| message.conversation_id == receipt.conversation_id)
            .unwrap_or(false);
        if !known {
            return Err(RepositoryError::NotFound);
        }
        self.staged
            .push(StagedWrite::InsertReadReceipt(receipt.clone()));
        Ok(())
    }

    async fn insert_call(&mut self, call: &CallRecord) -> Result<(), RepositoryError> {
        self.staged.push(StagedWrite::InsertCall(call.clone()));
        Ok(())
    }

    async fn upsert_presence(&mut self, presence: &PresenceRecord) -> Result<(), RepositoryError> {
        self.staged
            .push(StagedWrite::UpsertPresence(presence.clone()));
        Ok(())
    }

    async fn insert_outbox_event(&mut self, event: &OutboxEvent) -> Result<(), RepositoryError> {
        if self.fail_outbox_insert {
            return Err(RepositoryError::storage("注入的 outbox 写入失败"));
        }
        self.staged.push(StagedWrite::InsertOutbox(event.clone()));
        Ok(())
    }

    async fn insert_command_log(&mut self, log: &CommandLog) -> Result<(), RepositoryError> {
        self.staged.push(StagedWrite::InsertCommandLog(log.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let MemoryTransaction { state, staged, .. } = *self;
        let mut state = state.write().await;

        for write in &staged {
            if let StagedWrite::InsertCommandLog(log) = write {
                if let Some(key) = log.idempotency_key.as_deref() {
                    if state.has_idempotency_key(key) {
                        return Err(RepositoryError::Conflict);
                    }
                }
            }
        }

        for write in staged {
            match write {
                StagedWrite::InsertConversation(conversation) => {
                    state.conversations.insert(conversation.id, conversation);
                }
                StagedWrite::RemoveParticipant(conversation_id, user_id) => {
                    if let Some(conversation) = state.conversations.get_mut(&conversation_id) {
                        conversation.participant_ids.retain(|id| *id != user_id);
                    }
                }
                StagedWrite::InsertMessage(message) => {
                    state.messages.insert(message.id, message);
                }
                StagedWrite::InsertReadReceipt(receipt) => state.read_receipts.push(receipt),
                StagedWrite::InsertCall(call) => {
                    state.calls.insert(call.id, call);
                }
                StagedWrite::UpsertPresence(presence) => {
                    state.presence.insert(presence.user_id, presence);
                }
                StagedWrite::InsertOutbox(event) => state.outbox.push(event),
                StagedWrite::InsertCommandLog(log) => state.command_logs.push(log),
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, RepositoryError> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            fail_outbox_insert: self.fail_next_outbox_insert.swap(false, Ordering::SeqCst),
            staged: Vec::new(),
        }))
    }
}

#[async_trait]
impl CommandLogRepository for InMemoryStore {
    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<CommandLog>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .command_logs
            .iter()
            .find(|log| log.idempotency_key.as_deref() == Some(key))
            .cloned())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn fetch_pending(
        &self,
        limit: i64,
        now: Timestamp,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let state = self.state.read().await;
        let mut due: Vec<OutboxEvent> = state
            .outbox
            .iter()
            .filter(|event| event.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|event| event.created_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn claim(&self, id: OutboxEventId, now: Timestamp) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let event = state.outbox_mut(id)?;
        if event.status != OutboxStatus::Pending {
            return Ok(false);
        }
        event.status = OutboxStatus::Processing;
        event.claimed_at = Some(now);
        event.updated_at = now;
        Ok(true)
    }

    async fn mark_completed(
        &self,
        id: OutboxEventId,
        now: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let event = state.outbox_mut(id)?;
        if event.status != OutboxStatus::Processing {
            return Err(RepositoryError::Conflict);
        }
        event.status = OutboxStatus::Completed;
        event.processed_at = Some(now);
        event.claimed_at = None;
        event.updated_at = now;
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
        let mut state = self.state.write().await;
        let event = state.outbox_mut(id)?;
        if event.status != OutboxStatus::Processing {
            return Err(RepositoryError::Conflict);
        }
        event.retry_count += 1;
        event.error = Some(error.to_string());
        event.claimed_at = None;
        event.updated_at = now;
        if event.retry_count > max_retries {
            event.status = OutboxStatus::Failed;
            event.next_retry_at = None;
        } else {
            event.status = OutboxStatus::Pending;
            event.next_retry_at = next_retry_at;
        }
        Ok(event.status)
    }

    async fn mark_failed(
        &self,
        id: OutboxEventId,
        error: &str,
        now: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let event = state.outbox_mut(id)?;
        if event.status != OutboxStatus::Processing {
            return Err(RepositoryError::Conflict);
        }
        event.status = OutboxStatus::Failed;
        event.error = Some(error.to_string());
        event.claimed_at = None;
        event.updated_at = now;
        Ok(())
    }

    async fn reset_stale_claims(
        &self,
        claimed_before: Timestamp,
        now: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut reset = 0;
        for event in state.outbox.iter_mut() {
            let stale = event.status == OutboxStatus::Processing
                && event.claimed_at.map(|at| at < claimed_before).unwrap_or(true);
            if stale {
                event.status = OutboxStatus::Pending;
                event.claimed_at = None;
                event.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn list_failed(&self, limit: i64) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|event| event.status == OutboxStatus::Failed)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn requeue_failed(
        &self,
        id: OutboxEventId,
        now: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Ok(event) = state.outbox_mut(id) else {
            return Ok(false);
        };
        if event.status != OutboxStatus::Failed {
            return Ok(false);
        }
        event.status = OutboxStatus::Pending;
        event.retry_count = 0;
        event.error = None;
        event.next_retry_at = None;
        event.updated_at = now;
        Ok(true)
    }

    async fn find_by_id(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.outbox.iter().find(|event| event.id == id).cloned())
    }

    async fn find_by_aggregate(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|event| {
                event.aggregate_type == aggregate_type && event.aggregate_id == aggregate_id
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn is_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map(|conversation| conversation.is_participant(user_id))
            .unwrap_or(false))
    }

    async fn share_conversation(&self, a: UserId, b: UserId) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .conversations
            .values()
            .any(|conversation| conversation.is_participant(a) && conversation.is_participant(b)))
    }
}

#[async_trait]
impl CallRepository for InMemoryStore {
    async fn find_by_id(&self, id: CallId) -> Result<Option<CallRecord>, RepositoryError> {
        Ok(self.state.read().await.calls.get(&id).cloned())
    }

    async fn is_participant(&self, call_id: CallId, user_id: UserId) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .calls
            .get(&call_id)
            .map(|call| call.is_participant(user_id))
            .unwrap_or(false))
    }
}

#[async_trait]
impl BroadcastListRepository for InMemoryStore {
    async fn is_member(
        &self,
        list_id: BroadcastListId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .broadcast_lists
            .get(&list_id)
            .map(|list| list.has_member(user_id))
            .unwrap_or(false))
    }
}
