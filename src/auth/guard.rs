//! Route-level role authorization
//!
//! Must be layered inside [`require_auth`](super::middleware::require_auth):
//! it only reads the identity that middleware attached.

use super::middleware::CurrentIdentity;
use crate::{error::AppError, models::identity::Role, telemetry};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

pub const PERMISSION_DENIED: &str = "You do not have permission to perform this action";

/// A fixed set of roles chosen at route-registration time
#[derive(Debug, Clone, Copy)]
pub struct RoleGuard {
    allowed: &'static [Role],
}

/// `restrictTo(role, ...)`
pub const fn restrict_to(allowed: &'static [Role]) -> RoleGuard {
    RoleGuard { allowed }
}

impl RoleGuard {
    pub fn permits(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }

    pub fn authorize(&self, current: Option<&CurrentIdentity>) -> Result<(), AppError> {
        let Some(CurrentIdentity(identity)) = current else {
            // 路由注册顺序错误：guard 跑在认证之前
            return Err(AppError::internal_error(
                "role guard reached without an authenticated identity",
            ));
        };

        if !self.permits(identity.role) {
            tracing::warn!(
                identity_id = %identity.id,
                role = %identity.role,
                allowed = ?self.allowed,
                "Permission denied"
            );
            telemetry::record_auth_rejection("forbidden_role");
            return Err(AppError::Forbidden(PERMISSION_DENIED.to_string()));
        }

        Ok(())
    }
}

/// 角色守卫中间件，与 `axum::middleware::from_fn_with_state(restrict_to(..), role_guard)` 搭配
pub async fn role_guard(
    State(guard): State<RoleGuard>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard.authorize(req.extensions().get::<CurrentIdentity>())?;
    Ok(next.run(req).await)
}
