//! 命令日志
//!
//! 带幂等键的命令在同一事务内写入一条日志，用于重放时返回首次执行的结果。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::value_objects::{CommandLogId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Executed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Executed => "EXECUTED",
            CommandStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CommandStatus::Pending),
            "EXECUTED" => Ok(CommandStatus::Executed),
            "FAILED" => Ok(CommandStatus::Failed),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("未知的命令状态: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLog {
    pub id: CommandLogId,
    pub command_type: String,
    pub actor_id: UserId,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// 序列化后的命令 JSON
    pub payload: String,
    pub idempotency_key: Option<String>,
    pub status: CommandStatus,
    pub created_at: Timestamp,
    pub executed_at: Option<Timestamp>,
    pub error: Option<String>,
}
