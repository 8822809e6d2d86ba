use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, reason),
            ),
            AppErr::Domain(DomainError::NotParticipant(message)) => {
                ApiError::new(StatusCode::FORBIDDEN, "NOT_PARTICIPANT", message)
            }
            AppErr::Domain(other) => {
                ApiError::new(StatusCode::BAD_REQUEST, "DOMAIN_ERROR", other.to_string())
            }
            AppErr::Validation(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            AppErr::HandlerNotFound(command_type) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "UNKNOWN_COMMAND",
                format!("unsupported command type `{}`", command_type),
            ),
            AppErr::Authorization(message) => ApiError::forbidden(message),
            AppErr::NotFound(message) => ApiError::not_found(message),
            AppErr::Conflict(message) => ApiError::new(StatusCode::CONFLICT, "CONFLICT", message),
            AppErr::Infrastructure(message) => {
                tracing::error!(error = %message, "基础设施不可用");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "temporarily unavailable, retry later",
                )
            }
            AppErr::Permanent(message) => {
                tracing::error!(error = %message, "命令执行失败");
                ApiError::internal_server_error("internal error")
            }
            AppErr::Repository(RepositoryError::NotFound) => ApiError::not_found("record not found"),
            AppErr::Repository(RepositoryError::Conflict) => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", "record conflict")
            }
            AppErr::Repository(RepositoryError::Storage { message }) => {
                tracing::error!(error = %message, "存储层错误");
                ApiError::internal_server_error("storage error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_errors_map_to_status_codes() {
        let cases = [
            (ApplicationError::validation("bad"), StatusCode::BAD_REQUEST),
            (ApplicationError::authorization("no"), StatusCode::FORBIDDEN),
            (ApplicationError::not_found("gone"), StatusCode::NOT_FOUND),
            (
                ApplicationError::Conflict("dup".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                ApplicationError::infrastructure("redis down"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApplicationError::permanent("boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApplicationError::HandlerNotFound("noop".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApplicationError::Domain(DomainError::NotParticipant("x".to_string())),
                StatusCode::FORBIDDEN,
            ),
            (
                ApplicationError::Domain(DomainError::invalid_argument("content", "empty")),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn test_storage_error_hides_details() {
        let err = ApiError::from(ApplicationError::Repository(RepositoryError::storage(
            "connection reset by peer",
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.message, "storage error");
    }
}
