//! HTTP 中间件
//! 应用状态与请求追踪

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::{PasswordHasher, TokenIssuer},
    config::AppConfig,
    error::AppError,
    notification::NotificationGateway,
    repository::IdentityRepository,
    services::AuthService,
};

/// 应用状态
///
/// 启动时构建一次，之后所有请求共享（Arc 拷贝）
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub identities: Arc<dyn IdentityRepository>,
    pub token_issuer: Arc<TokenIssuer>,
    pub auth_service: Arc<AuthService>,
}

impl AppState {
    /// 由配置和外部协作者组装所有认证组件
    pub fn new(
        config: AppConfig,
        identities: Arc<dyn IdentityRepository>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Result<Self, AppError> {
        let hasher = PasswordHasher::from_config(&config)?;
        let token_issuer = Arc::new(TokenIssuer::from_config(&config)?);
        let auth_service = Arc::new(AuthService::new(
            &config,
            identities.clone(),
            hasher,
            token_issuer.clone(),
            notifier,
        )?);

        Ok(Self {
            config,
            identities,
            token_issuer,
            auth_service,
        })
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    // 只记录路径，避免把 resetPassword/<token> 之外的查询参数写进日志
    let path = redact_path(req.uri().path());

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();

        // 记录指标 - 使用静态字符串
        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_code = match status {
            200 => "200",
            201 => "201",
            204 => "204",
            400 => "400",
            401 => "401",
            403 => "403",
            404 => "404",
            500 => "500",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_code)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            path = %path,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        // 在响应头中添加 trace_id
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 重置令牌出现在路径中，日志里替换掉
fn redact_path(path: &str) -> String {
    const RESET_PREFIX: &str = "/api/v1/users/resetPassword/";
    match path.strip_prefix(RESET_PREFIX) {
        Some(_) => format!("{}[redacted]", RESET_PREFIX),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_or_generate_trace_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());

        let trace_id = extract_or_generate_trace_id(&headers);
        assert_eq!(trace_id, "test-trace-123");

        let headers = HeaderMap::new();
        let trace_id = extract_or_generate_trace_id(&headers);
        assert!(!trace_id.is_empty());
        assert_ne!(trace_id, "test-trace-123");
    }

    #[test]
    fn test_reset_token_redacted_from_path() {
        assert_eq!(
            redact_path("/api/v1/users/resetPassword/abcdef"),
            "/api/v1/users/resetPassword/[redacted]"
        );
        assert_eq!(redact_path("/api/v1/users/me"), "/api/v1/users/me");
    }
}
