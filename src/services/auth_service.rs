//! 认证服务：注册、登录、忘记/重置密码、修改密码

use crate::{
    auth::{
        jwt::TokenIssuer,
        password::{PasswordChange, PasswordHasher},
        reset::ResetTokenManager,
    },
    config::AppConfig,
    error::AppError,
    models::{auth::*, identity::*},
    notification::NotificationGateway,
    repository::IdentityRepository,
    telemetry,
};
use std::sync::Arc;
use validator::Validate;

pub const INCORRECT_CREDENTIALS: &str = "Incorrect email or password";
pub const MISSING_CREDENTIALS: &str = "Please provide email and password!";
pub const WRONG_CURRENT_PASSWORD: &str = "Your current password is wrong.";
pub const RESET_TOKEN_SENT: &str = "Token sent to email!";

/// An identity plus the bearer token just issued for it
#[derive(Debug)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
}

pub struct AuthService {
    identities: Arc<dyn IdentityRepository>,
    hasher: PasswordHasher,
    token_issuer: Arc<TokenIssuer>,
    reset_tokens: ResetTokenManager,
    notifier: Arc<dyn NotificationGateway>,
    reset_url_base: String,
    /// 未知邮箱登录时用于比对的哈希，与真实哈希同参数
    decoy_hash: String,
}

impl AuthService {
    pub fn new(
        config: &AppConfig,
        identities: Arc<dyn IdentityRepository>,
        hasher: PasswordHasher,
        token_issuer: Arc<TokenIssuer>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Result<Self, AppError> {
        let decoy_hash = hasher.hash("decoy-password-for-unknown-identities")?;
        let reset_tokens = ResetTokenManager::new(identities.clone(), hasher.clone(), config);
        let reset_url_base = format!(
            "{}/api/v1/users/resetPassword",
            config.server.public_base_url.trim_end_matches('/')
        );

        Ok(Self {
            identities,
            hasher,
            token_issuer,
            reset_tokens,
            notifier,
            reset_url_base,
            decoy_hash,
        })
    }

    fn start_session(&self, identity: Identity) -> Result<Session, AppError> {
        let token = self.token_issuer.issue(&identity.id)?;
        Ok(Session { identity, token })
    }

    /// 用户注册
    pub async fn signup(&self, req: SignupRequest) -> Result<Session, AppError> {
        req.validate()?;
        self.hasher.validate_password_policy(&req.password)?;

        let password_hash = self.hasher.hash_async(req.password).await?;
        let identity = self
            .identities
            .create(NewIdentity {
                name: req.name.trim().to_string(),
                email: normalize_email(&req.email),
                role: Role::User,
                password_hash,
            })
            .await?;

        tracing::info!(identity_id = %identity.id, "Identity signed up");
        self.start_session(identity)
    }

    /// 用户登录
    pub async fn login(&self, req: LoginRequest) -> Result<Session, AppError> {
        if req.email.trim().is_empty() || req.password.is_empty() {
            return Err(AppError::validation(MISSING_CREDENTIALS));
        }

        let email = normalize_email(&req.email);
        let identity = self.identities.find_by_email(&email).await?;

        // 用户不存在时也完整跑一次校验，响应消息和耗时都与密码错误一致
        let verified = match &identity {
            Some(identity) => {
                self.hasher
                    .verify_async(req.password, identity.password_hash.clone())
                    .await?
            }
            None => {
                self.hasher
                    .verify_async(req.password, self.decoy_hash.clone())
                    .await?;
                false
            }
        };

        match identity {
            Some(identity) if verified => {
                tracing::info!(identity_id = %identity.id, "Login succeeded");
                self.start_session(identity)
            }
            _ => {
                tracing::warn!("Login failed");
                telemetry::record_auth_rejection("bad_credentials");
                Err(AppError::unauthenticated(INCORRECT_CREDENTIALS))
            }
        }
    }

    /// 忘记密码：签发重置令牌并投递
    ///
    /// Unknown emails get the same success response as known ones.
    pub async fn forgot_password(&self, req: ForgotPasswordRequest) -> Result<(), AppError> {
        req.validate()?;

        let Some(identity) = self.identities.find_by_email(&normalize_email(&req.email)).await? else {
            tracing::info!("Password reset requested for unknown email");
            telemetry::record_reset_request("unknown_email");
            return Ok(());
        };

        self.reset_tokens
            .issue_and_deliver(&identity, self.notifier.as_ref(), &self.reset_url_base)
            .await
    }

    /// 使用重置令牌设置新密码，并重新建立会话
    pub async fn reset_password(&self, token: &str, req: ResetPasswordRequest) -> Result<Session, AppError> {
        req.validate()?;

        let identity = self.reset_tokens.consume(token, &req.password).await?;
        self.start_session(identity)
    }

    /// 已登录用户修改密码
    pub async fn update_password(
        &self,
        current: &Identity,
        req: UpdatePasswordRequest,
    ) -> Result<Session, AppError> {
        req.validate()?;

        let verified = self
            .hasher
            .verify_async(req.password_current, current.password_hash.clone())
            .await?;
        if !verified {
            telemetry::record_auth_rejection("wrong_current_password");
            return Err(AppError::unauthenticated(WRONG_CURRENT_PASSWORD));
        }

        self.hasher.validate_password_policy(&req.password)?;
        let change = PasswordChange::new(&self.hasher, &req.password).await?;

        let identity = self
            .identities
            .update_password(current.id, &change)
            .await?
            .ok_or_else(|| AppError::unauthenticated(crate::auth::middleware::IDENTITY_GONE))?;

        tracing::info!(identity_id = %identity.id, "Password updated");
        self.start_session(identity)
    }

    /// 更新个人资料（不含密码）
    pub async fn update_profile(&self, current: &Identity, req: UpdateMeRequest) -> Result<Identity, AppError> {
        if req.touches_password() {
            return Err(AppError::validation(
                "This route is not for password updates. Please use /updateMyPassword.",
            ));
        }
        req.validate()?;

        let update = ProfileUpdate {
            name: req.name.map(|n| n.trim().to_string()),
            email: req.email.as_deref().map(normalize_email),
        };

        self.identities
            .update_profile(current.id, &update)
            .await?
            .ok_or_else(|| AppError::not_found("No identity found with that ID"))
    }

    /// 停用当前账户
    pub async fn deactivate(&self, current: &Identity) -> Result<(), AppError> {
        self.identities.deactivate(current.id).await?;
        tracing::info!(identity_id = %current.id, "Identity deactivated");
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
