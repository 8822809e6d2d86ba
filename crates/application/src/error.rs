use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no handler registered for command type `{0}`")]
    HandlerNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// 可重试的基础设施错误
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    /// 不可重试的错误（解码失败、超过重试上限）
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

impl ApplicationError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        ApplicationError::Authorization(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApplicationError::NotFound(message.into())
    }

    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ApplicationError::Permanent(message.into())
    }

    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        match self {
            ApplicationError::Infrastructure(_) => true,
            ApplicationError::Repository(RepositoryError::Storage { .. }) => true,
            _ => false,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound("记录不存在".to_string()),
            RepositoryError::Conflict => ApplicationError::Conflict("记录冲突".to_string()),
            other => ApplicationError::Repository(other),
        }
    }
}

impl From<validator::ValidationErrors> for ApplicationError {
    fn from(value: validator::ValidationErrors) -> Self {
        ApplicationError::Validation(value.to_string())
    }
}
