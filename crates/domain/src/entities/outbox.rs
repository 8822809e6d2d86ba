//! Outbox 事件记录
//!
//! 与领域变更在同一事务内写入，之后只由 Outbox Worker（以及运维重新入队）修改。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::value_objects::{OutboxEventId, Timestamp};

/// Outbox 事件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Completed => "COMPLETED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    /// 状态机允许的转换
    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        matches!(
            (self, next),
            (OutboxStatus::Pending, OutboxStatus::Processing)
                | (OutboxStatus::Processing, OutboxStatus::Completed)
                | (OutboxStatus::Processing, OutboxStatus::Pending)
                | (OutboxStatus::Processing, OutboxStatus::Failed)
                | (OutboxStatus::Failed, OutboxStatus::Pending)
        )
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "COMPLETED" => Ok(OutboxStatus::Completed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("未知的 outbox 状态: {other}"),
            )),
        }
    }
}

/// Outbox 事件行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// JSON 文本
    pub payload: String,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub next_retry_at: Option<Timestamp>,
    /// 被 Worker 认领的时间，用于回收超时的认领
    pub claimed_at: Option<Timestamp>,
}

impl OutboxEvent {
    /// 新建待处理事件
    pub fn pending(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        payload: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: OutboxEventId::new(),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            payload: payload.into(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            next_retry_at: None,
            claimed_at: None,
        }
    }

    /// 是否到了可以被拉取的时间
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == OutboxStatus::Pending
            && self.next_retry_at.map(|at| at <= now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_status_transitions() {
        use OutboxStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Pending));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_status_parse() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Completed,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn test_is_due_respects_next_retry_at() {
        let now = Utc::now();
        let mut event = OutboxEvent::pending("message.created", "message", Uuid::new_v4(), "{}", now);
        assert!(event.is_due(now));

        event.next_retry_at = Some(now + Duration::seconds(5));
        assert!(!event.is_due(now));
        assert!(event.is_due(now + Duration::seconds(5)));
    }
}
