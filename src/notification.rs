//! 外部通知投递
//! 重置密码邮件等消息通过 NotificationGateway 发出，投递可能独立失败

use crate::config::NotificationConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// 一条待投递的消息
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// 投递通道抽象
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// 开发环境使用：只写日志，不真正发送
pub struct LogNotifier {
    sender: String,
}

impl LogNotifier {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl NotificationGateway for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        // 正文里包含重置链接，只在 debug 级别输出
        tracing::info!(
            from = %self.sender,
            to = %notification.recipient,
            subject = %notification.subject,
            "Notification dispatched (log mode)"
        );
        tracing::debug!(body = %notification.body, "Notification body");
        Ok(())
    }
}

/// 以 JSON POST 方式投递到外部邮件/消息网关
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    sender: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: String, sender: String, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        Ok(Self { client, url, sender })
    }
}

#[async_trait]
impl NotificationGateway for WebhookNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            from: &self.sender,
            to: &notification.recipient,
            subject: &notification.subject,
            text: &notification.body,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected(status.as_u16()));
        }

        tracing::info!(to = %notification.recipient, "Notification delivered via webhook");
        Ok(())
    }
}

/// 根据配置构建投递通道
pub fn from_config(config: &NotificationConfig) -> Result<Arc<dyn NotificationGateway>, NotificationError> {
    match (config.mode.to_lowercase().as_str(), &config.webhook_url) {
        ("webhook", Some(url)) => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            config.sender.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => Ok(Arc::new(LogNotifier::new(config.sender.clone()))),
    }
}
