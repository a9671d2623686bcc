//! Authentication and authorization module

pub mod guard;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod reset;

pub use guard::{restrict_to, role_guard, RoleGuard};
pub use jwt::{Claims, TokenError, TokenIssuer, VerifiedToken};
pub use middleware::{extract_token, require_auth, resolve_identity, AccessDenied, CurrentIdentity};
pub use password::{PasswordChange, PasswordHasher};
pub use reset::ResetTokenManager;
