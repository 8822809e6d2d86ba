//! 领域模型错误定义
//!
//! 定义了领域层可能出现的错误类型，以及仓储层共享的错误。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 非法的状态转换
    #[error("非法状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// 频道格式无效
    #[error("频道格式无效: {0}")]
    InvalidChannel(String),

    /// 未知事件类型
    #[error("未知事件类型: {0}")]
    UnknownEventType(String),

    /// 事件负载无法解析
    #[error("事件负载无效: {0}")]
    InvalidEventPayload(String),

    /// 用户不是参与者
    #[error("用户不是参与者: {0}")]
    NotParticipant(String),
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建状态转换错误
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// 记录不存在
    #[error("记录不存在")]
    NotFound,

    /// 唯一约束冲突
    #[error("记录冲突")]
    Conflict,

    /// 存储层错误
    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
