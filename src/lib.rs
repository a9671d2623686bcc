//! 身份认证服务库
//! 注册、登录、密码重置与基于角色的访问控制

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
