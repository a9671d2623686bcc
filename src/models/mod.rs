//! 数据模型模块

pub mod auth;
pub mod identity;

pub use identity::{Identity, IdentityResponse, NewIdentity, ProfileUpdate, Role};
