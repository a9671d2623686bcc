//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    http::Uri,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};

use crate::{
    auth::{require_auth, restrict_to, role_guard, RoleGuard},
    error::AppError,
    handlers,
    middleware::{request_tracking_middleware, AppState},
    models::identity::Role,
};

/// 请求体上限
const BODY_LIMIT_BYTES: usize = 10 * 1024;

const ADMIN_ONLY: RoleGuard = restrict_to(&[Role::Admin]);

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 认证路由（无需登录）
    let auth_routes = Router::new()
        .route("/api/v1/users/signup", post(handlers::auth::signup))
        .route("/api/v1/users/login", post(handlers::auth::login))
        .route("/api/v1/users/logout", get(handlers::auth::logout))
        .route("/api/v1/users/forgotPassword", post(handlers::auth::forgot_password))
        .route(
            "/api/v1/users/resetPassword/{token}",
            patch(handlers::auth::reset_password),
        );

    // 需要登录的路由
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/users/updateMyPassword",
            patch(handlers::auth::update_my_password),
        )
        .route("/api/v1/users/me", get(handlers::user::me))
        .route("/api/v1/users/updateMe", patch(handlers::user::update_me))
        .route("/api/v1/users/deleteMe", axum::routing::delete(handlers::user::delete_me))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    // 用户管理（仅管理员）；role_guard 在 require_auth 之后执行
    let admin_routes = Router::new()
        .route("/api/v1/users", get(handlers::user::list_users))
        .route(
            "/api/v1/users/{id}",
            get(handlers::user::get_user).delete(handlers::user::delete_user),
        )
        .route_layer(from_fn_with_state(ADMIN_ONLY, role_guard))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(admin_routes)
        .fallback(route_not_found)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(CompressionLayer::new())
        .layer(from_fn(request_tracking_middleware))
        .with_state(state)
}

async fn route_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("Can't find {} on this server!", uri.path()))
}
