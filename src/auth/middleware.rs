//! JWT 认证中间件
//!
//! `NO_TOKEN -> TOKEN_PRESENT -> TOKEN_VALID -> IDENTITY_RESOLVED -> NOT_STALE -> AUTHORIZED`.
//! Any failing transition rejects the request with 401.

use crate::{
    auth::jwt::{TokenError, VerifiedToken},
    error::AppError,
    middleware::AppState,
    models::identity::Identity,
    telemetry,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

pub const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";
pub const IDENTITY_GONE: &str = "The user belonging to this token no longer exists.";
pub const PASSWORD_CHANGED: &str = "User recently changed password! Please log in again.";

/// The identity resolved for this request (附加到请求扩展)
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

// 实现 FromRequestParts 以便在 handler 中直接提取 CurrentIdentity
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentIdentity>()
            .cloned()
            .ok_or_else(|| AppError::unauthenticated(NOT_LOGGED_IN))
    }
}

/// Why a request failed to authenticate
#[derive(Debug)]
pub enum AccessDenied {
    NoToken,
    BadToken(TokenError),
    IdentityGone,
    StaleToken,
    Lookup(AppError),
}

impl AccessDenied {
    fn metric_reason(&self) -> &'static str {
        match self {
            AccessDenied::NoToken => "no_token",
            AccessDenied::BadToken(TokenError::Expired) => "expired_token",
            AccessDenied::BadToken(_) => "invalid_token",
            AccessDenied::IdentityGone => "identity_gone",
            AccessDenied::StaleToken => "stale_token",
            AccessDenied::Lookup(_) => "lookup_failed",
        }
    }
}

impl From<AccessDenied> for AppError {
    fn from(denied: AccessDenied) -> Self {
        match denied {
            AccessDenied::NoToken => AppError::unauthenticated(NOT_LOGGED_IN),
            AccessDenied::BadToken(e) => e.into(),
            AccessDenied::IdentityGone => AppError::unauthenticated(IDENTITY_GONE),
            AccessDenied::StaleToken => AppError::unauthenticated(PASSWORD_CHANGED),
            AccessDenied::Lookup(e) => e,
        }
    }
}

/// 从 Authorization 头或会话 cookie 提取令牌，头部优先
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Walk the access-control states for one request
pub async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, AccessDenied> {
    let token = extract_token(headers, &state.config.security.cookie_name)
        .ok_or(AccessDenied::NoToken)?;

    let VerifiedToken {
        subject_id,
        issued_at,
    } = state.token_issuer.verify(&token).map_err(AccessDenied::BadToken)?;

    // 令牌签发后身份被删除或停用
    let identity = state
        .identities
        .find_by_id(subject_id)
        .await
        .map_err(AccessDenied::Lookup)?
        .ok_or(AccessDenied::IdentityGone)?;

    if identity.changed_password_after(issued_at) {
        return Err(AccessDenied::StaleToken);
    }

    Ok(identity)
}

/// JWT 认证中间件 - 必须认证
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match resolve_identity(&state, req.headers()).await {
        Ok(identity) => identity,
        Err(denied) => {
            telemetry::record_auth_rejection(denied.metric_reason());
            match &denied {
                AccessDenied::NoToken => tracing::debug!("Request without bearer token"),
                AccessDenied::Lookup(_) => {}
                other => tracing::warn!(reason = denied.metric_reason(), ?other, "Bearer token rejected"),
            }
            return Err(denied.into());
        }
    };

    tracing::debug!(identity_id = %identity.id, role = %identity.role, "Request authenticated");

    // 附加到请求扩展
    req.extensions_mut().insert(CurrentIdentity(identity));

    Ok(next.run(req).await)
}
