//! WebSocket 帧格式（JSON，按 `type` 字段区分）

use std::sync::Arc;

use domain::{CallId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calls::SignalKind;
use crate::error::{ApplicationError, ApplicationResult};
use crate::realtime::hub::OutboundFrame;

/// 服务端 → 客户端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Event { channel: String, event: Value },
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Error { code: String, message: String },
    Pong,
}

impl ServerFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 根据应用错误生成错误帧
    pub fn from_error(err: &ApplicationError) -> Self {
        let code = match err {
            ApplicationError::Validation(_) | ApplicationError::Domain(_) => "invalid_request",
            ApplicationError::Authorization(_) => "forbidden",
            ApplicationError::NotFound(_) => "not_found",
            ApplicationError::Conflict(_) => "conflict",
            _ => "internal_error",
        };
        Self::error(code, err.to_string())
    }

    pub fn encode(&self) -> ApplicationResult<OutboundFrame> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(|e| ApplicationError::permanent(e.to_string()))
    }
}

/// 客户端 → 服务端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Signal {
        kind: SignalKind,
        call_id: CallId,
        to: UserId,
        #[serde(default)]
        data: Value,
    },
    EndCall {
        call_id: CallId,
    },
    DeclineCall {
        call_id: CallId,
    },
    Ping,
}
