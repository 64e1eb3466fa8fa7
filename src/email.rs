use anyhow::Context;
use axum::async_trait;
use serde_json::json;

use crate::auth::repo_types::User;
use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, user: &User, url: &str) -> anyhow::Result<()>;
    async fn send_password_reset(&self, user: &User, url: &str) -> anyhow::Result<()>;
}

/// Mailer speaking the provider's JSON send API.
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn send(&self, to: &str, subject: &str, text: String) -> anyhow::Result<()> {
        let res = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from,
                "to": to,
                "subject": subject,
                "text": text,
            }))
            .send()
            .await
            .context("mail provider request")?;
        res.error_for_status().context("mail provider response")?;
        Ok(())
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_welcome(&self, user: &User, url: &str) -> anyhow::Result<()> {
        self.send(
            &user.email,
            "Welcome to Trailhead!",
            format!(
                "Hi {}, welcome aboard! Visit {} to complete your profile.",
                user.name, url
            ),
        )
        .await
    }

    async fn send_password_reset(&self, user: &User, url: &str) -> anyhow::Result<()> {
        self.send(
            &user.email,
            "Your password reset token (valid for 10 minutes)",
            format!(
                "Hi {}, forgot your password? Submit a PATCH request with your new \
                 password to {}.\nIf you didn't request this, please ignore this email.",
                user.name, url
            ),
        )
        .await
    }
}
