//! 用户资料与管理的 HTTP 处理器

use crate::{
    auth::CurrentIdentity,
    error::AppError,
    middleware::AppState,
    models::{auth::UpdateMeRequest, identity::IdentityResponse},
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const NO_IDENTITY_WITH_ID: &str = "No user found with that ID";

/// 分页参数
#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    100
}

impl Pagination {
    fn limit(&self) -> i64 {
        self.limit.clamp(1, 1000)
    }

    fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit()
    }
}

fn user_payload(user: IdentityResponse) -> serde_json::Value {
    json!({
        "status": "success",
        "data": { "user": user }
    })
}

/// 当前用户信息
pub async fn me(CurrentIdentity(current): CurrentIdentity) -> impl IntoResponse {
    Json(user_payload(current.into()))
}

/// 更新当前用户资料
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(current): CurrentIdentity,
    payload: Result<Json<UpdateMeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;
    let updated = state.auth_service.update_profile(&current, req).await?;

    Ok(Json(user_payload(updated.into())))
}

/// 停用当前账户
pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(current): CurrentIdentity,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.deactivate(&current).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 列出用户（管理员）
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let users: Vec<IdentityResponse> = state
        .identities
        .list(pagination.limit(), pagination.offset())
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({
        "status": "success",
        "results": users.len(),
        "data": { "users": users }
    })))
}

/// 获取用户详情（管理员）
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .identities
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(NO_IDENTITY_WITH_ID))?;

    Ok(Json(user_payload(user.into())))
}

/// 删除用户（管理员）
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(admin): CurrentIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.identities.delete(id).await? {
        return Err(AppError::not_found(NO_IDENTITY_WITH_ID));
    }

    tracing::info!(identity_id = %id, admin_id = %admin.id, "Identity deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offsets() {
        let p = Pagination { page: 3, limit: 20 };
        assert_eq!(p.limit(), 20);
        assert_eq!(p.offset(), 40);

        let p = Pagination { page: 0, limit: 0 };
        assert_eq!(p.limit(), 1);
        assert_eq!(p.offset(), 0);
    }
}
