//! 事务内的 Outbox 写入
//!
//! 处理器的固定流程：先按幂等键查找命令日志，命中则直接返回首次执行的结果；
//! 否则开启事务写领域数据，再由 `commit` 在同一事务里写一条 Outbox 行和
//! （带幂等键时）一条命令日志，最后提交。事务在提交前被丢弃即回滚。

use std::sync::Arc;

use domain::{
    CommandLog, CommandLogId, CommandStatus, OutboxEvent, RealtimeEvent, RepositoryError,
    Timestamp,
};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::commands::{Command, CommandResult};
use crate::error::{ApplicationError, ApplicationResult};
use crate::repository::{CommandLogRepository, Transaction, UnitOfWork};

/// 提交结果
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// 本次执行写入并提交了数据
    Committed(CommandResult),
    /// 幂等重放，返回首次执行的结果，没有任何写入
    Replayed(CommandResult),
}

impl Emission {
    pub fn is_committed(&self) -> bool {
        matches!(self, Emission::Committed(_))
    }

    pub fn into_result(self) -> CommandResult {
        match self {
            Emission::Committed(result) | Emission::Replayed(result) => result,
        }
    }
}

pub struct OutboxEmitter {
    uow: Arc<dyn UnitOfWork>,
    command_logs: Arc<dyn CommandLogRepository>,
    clock: Arc<dyn Clock>,
}

impl OutboxEmitter {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        command_logs: Arc<dyn CommandLogRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            uow,
            command_logs,
            clock,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// 幂等键命中时返回已记录的结果
    pub async fn replay(&self, command: &Command) -> ApplicationResult<Option<CommandResult>> {
        let Some(key) = command.idempotency_key() else {
            return Ok(None);
        };

        let log = self.command_logs.find_by_idempotency_key(key).await?;
        Ok(log.map(|log| {
            debug!(idempotency_key = key, "命中幂等键，返回已记录结果");
            result_from_log(&log)
        }))
    }

    pub async fn begin(&self) -> ApplicationResult<Box<dyn Transaction>> {
        Ok(self.uow.begin().await?)
    }

    /// 在事务中写入 Outbox 行与命令日志并提交
    pub async fn commit(
        &self,
        mut tx: Box<dyn Transaction>,
        command: &Command,
        event: &RealtimeEvent,
    ) -> ApplicationResult<Emission> {
        let now = self.clock.now();
        let (aggregate_type, aggregate_id) = event.aggregate();

        let outbox = OutboxEvent::pending(
            event.event_type(),
            aggregate_type,
            aggregate_id,
            event.payload_json()?,
            now,
        );
        tx.insert_outbox_event(&outbox).await?;

        let result = CommandResult::new(command.command_type(), aggregate_type, aggregate_id);

        if let Some(key) = command.idempotency_key() {
            let log = CommandLog {
                id: CommandLogId::new(),
                command_type: command.command_type().to_string(),
                actor_id: command.actor_id(),
                aggregate_type: aggregate_type.to_string(),
                aggregate_id,
                payload: command.to_json()?,
                idempotency_key: Some(key.to_string()),
                status: CommandStatus::Executed,
                created_at: now,
                executed_at: Some(now),
                error: None,
            };
            match tx.insert_command_log(&log).await {
                Ok(()) => {}
                Err(RepositoryError::Conflict) => {
                    drop(tx);
                    return self.resolve_race(key).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        match tx.commit().await {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                if let Some(key) = command.idempotency_key() {
                    return self.resolve_race(key).await;
                }
                return Err(RepositoryError::Conflict.into());
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            event_id = %outbox.id,
            event_type = %outbox.event_type,
            aggregate_id = %aggregate_id,
            "领域变更与 outbox 事件已提交"
        );
        Ok(Emission::Committed(result))
    }

    /// 并发执行同一幂等键时，失败方返回胜出方的结果
    async fn resolve_race(&self, key: &str) -> ApplicationResult<Emission> {
        match self.command_logs.find_by_idempotency_key(key).await? {
            Some(log) => {
                info!(idempotency_key = key, "幂等键并发冲突，返回先提交者的结果");
                Ok(Emission::Replayed(result_from_log(&log)))
            }
            None => Err(ApplicationError::Conflict(format!(
                "幂等键冲突但未找到命令日志: {key}"
            ))),
        }
    }
}

fn result_from_log(log: &CommandLog) -> CommandResult {
    CommandResult {
        command_type: log.command_type.clone(),
        aggregate_type: log.aggregate_type.clone(),
        aggregate_id: log.aggregate_id,
    }
}
