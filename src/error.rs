//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 非操作性错误对外统一展示的消息
pub const GENERIC_ERROR_MESSAGE: &str = "Something went very wrong!";

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Token is invalid or has expired")]
    InvalidOrExpiredToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 请求在进入业务逻辑前被拒绝（413、415 等），保留原状态码
    #[error("Request rejected ({0}): {1}")]
    RequestRejected(StatusCode, String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) | AppError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RequestRejected(status, _) => *status,
            AppError::Delivery(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 操作性错误（预期内、可安全展示）
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_)
        )
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthenticated(msg)
            | AppError::Forbidden(msg)
            | AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::RequestRejected(_, msg)
            | AppError::Delivery(msg) => msg.clone(),
            AppError::InvalidOrExpiredToken => "Token is invalid or has expired".to_string(),
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                GENERIC_ERROR_MESSAGE.to_string()
            }
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 4xx 为 fail，5xx 为 error
    pub fn status_label(&self) -> &'static str {
        if self.status_code().is_client_error() {
            "fail"
        } else {
            "error"
        }
    }

    // 便捷方法
    pub fn unauthenticated(msg: &str) -> Self {
        AppError::Unauthenticated(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }

    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn internal_error(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            status: self.status_label(),
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        // 非操作性错误记录完整细节，操作性错误只记 debug
        if self.is_operational() {
            tracing::debug!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        } else {
            tracing::error!(
                code = self.code(),
                error = ?self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 validator 校验错误转换，取第一条可读消息
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| "Invalid input data".to_string());
        AppError::Validation(message)
    }
}

/// 请求体解析失败：语法/结构错误归为 400，其余客户端错误保留原状态码
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                AppError::Validation(rejection.body_text())
            }
            status if status.is_client_error() => {
                AppError::RequestRejected(status, rejection.body_text())
            }
            _ => AppError::Internal(rejection.body_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::unauthenticated("x").code(), 401);
        assert_eq!(AppError::Forbidden("x".to_string()).code(), 403);
        assert_eq!(AppError::validation("x").code(), 400);
        assert_eq!(AppError::InvalidOrExpiredToken.code(), 400);
        assert_eq!(AppError::not_found("x").code(), 404);
        assert_eq!(AppError::Delivery("x".to_string()).code(), 500);
        assert_eq!(
            AppError::RequestRejected(StatusCode::PAYLOAD_TOO_LARGE, "x".to_string()).code(),
            413
        );
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let message = error.user_message();
        assert_eq!(message, GENERIC_ERROR_MESSAGE);
        assert!(!message.contains("sqlx"));
        assert!(!error.is_operational());
    }

    #[test]
    fn test_operational_errors_keep_message() {
        let error = AppError::unauthenticated("You are not logged in!");
        assert!(error.is_operational());
        assert_eq!(error.user_message(), "You are not logged in!");
        assert_eq!(error.status_label(), "fail");
        assert_eq!(AppError::internal_error("boom").status_label(), "error");
    }
}
