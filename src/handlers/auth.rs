//! 认证相关的 HTTP 处理器

use crate::{
    auth::CurrentIdentity,
    config::SecurityConfig,
    error::AppError,
    middleware::AppState,
    models::auth::*,
    services::{auth_service::RESET_TOKEN_SENT, Session},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// 登出后 cookie 的存活时间（秒）
const LOGGED_OUT_COOKIE_MAX_AGE: u64 = 10;

/// 会话 cookie，浏览器客户端不必自己保存令牌
pub fn session_cookie(security: &SecurityConfig, token: &str, secure: bool) -> String {
    let max_age = security.cookie_expires_in_days * 24 * 60 * 60;
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        security.cookie_name, token, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// 覆盖会话 cookie 的占位值，短时间后过期
pub fn logged_out_cookie(security: &SecurityConfig, secure: bool) -> String {
    let mut cookie = format!(
        "{}=loggedout; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        security.cookie_name, LOGGED_OUT_COOKIE_MAX_AGE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// 令牌同时放在响应体和 Set-Cookie 中
fn send_session(state: &AppState, status: StatusCode, session: Session) -> impl IntoResponse {
    let cookie = session_cookie(
        &state.config.security,
        &session.token,
        state.config.server.is_production(),
    );
    let body = AuthResponse::new(session.token, session.identity.into());

    (status, [(header::SET_COOKIE, cookie)], Json(body))
}

/// 注册
pub async fn signup(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let session = state.auth_service.signup(req).await?;

    Ok(send_session(&state, StatusCode::CREATED, session))
}

/// 登录
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let session = state.auth_service.login(req).await?;

    Ok(send_session(&state, StatusCode::OK, session))
}

/// 登出：令牌本身无状态，只清掉浏览器里的 cookie
pub async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cookie = logged_out_cookie(&state.config.security, state.config.server.is_production());

    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "status": "success" })),
    )
}

/// 忘记密码
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    state.auth_service.forgot_password(req).await?;

    Ok(Json(MessageResponse::success(RESET_TOKEN_SENT)))
}

/// 通过重置令牌设置新密码
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let session = state.auth_service.reset_password(&token, req).await?;

    Ok(send_session(&state, StatusCode::OK, session))
}

/// 已登录用户修改密码
pub async fn update_my_password(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(current): CurrentIdentity,
    payload: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let session = state.auth_service.update_password(&current, req).await?;

    Ok(send_session(&state, StatusCode::OK, session))
}
