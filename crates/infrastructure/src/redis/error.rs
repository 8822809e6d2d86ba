//! Redis 错误类型定义

use application::{ApplicationError, TransportError};
use thiserror::Error;

/// Redis 操作错误
#[derive(Error, Debug)]
pub enum RedisError {
    /// 连接错误
    #[error("Redis 连接错误: {message}")]
    ConnectionError { message: String },

    /// 发布错误
    #[error("Redis 发布错误: {message}")]
    PublishError { message: String },

    /// 订阅错误
    #[error("Redis 订阅错误: {message}")]
    SubscribeError { message: String },

    /// 序列化错误
    #[error("序列化错误: {message}")]
    SerializationError { message: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },
}

/// Redis 结果类型
pub type RedisResult<T> = Result<T, RedisError>;

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => RedisError::ConfigError {
                message: err.to_string(),
            },
            _ => RedisError::ConnectionError {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        RedisError::SerializationError {
            message: err.to_string(),
        }
    }
}

impl From<RedisError> for TransportError {
    fn from(err: RedisError) -> Self {
        match err {
            RedisError::PublishError { message } => TransportError::Publish(message),
            RedisError::SubscribeError { message } => TransportError::Subscribe(message),
            other => TransportError::Connection(other.to_string()),
        }
    }
}

impl From<RedisError> for ApplicationError {
    fn from(err: RedisError) -> Self {
        ApplicationError::Infrastructure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_maps_to_transport_publish() {
        let err = RedisError::PublishError {
            message: "broken pipe".to_string(),
        };
        assert_eq!(
            TransportError::from(err),
            TransportError::Publish("broken pipe".to_string())
        );
    }

    #[test]
    fn test_serialization_error_is_infrastructure() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ApplicationError = RedisError::from(json_err).into();
        assert!(matches!(err, ApplicationError::Infrastructure(_)));
    }
}
