use std::sync::Arc;

use anyhow::Context;
use aws_config::{defaults, BehaviorVersion};
use aws_sdk_sesv2::{
    config::Region,
    types::{Body, Content, Destination, EmailContent, Message},
};
use axum::async_trait;
use tracing::{error, info};

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()>;
}

/// Sends through Amazon SES v2.
pub struct SesMailer {
    client: aws_sdk_sesv2::Client,
    from: String,
}

impl SesMailer {
    pub async fn new(cfg: &MailConfig) -> Self {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.ses_region.clone()))
            .load()
            .await;
        Self {
            client: aws_sdk_sesv2::Client::new(&shared),
            from: format!("{} <{}>", cfg.from_name, cfg.from),
        }
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        let content = |data: &str| {
            Content::builder()
                .data(data)
                .charset("UTF-8")
                .build()
                .context("build ses content")
        };

        let message = Message::builder()
            .subject(content(&email.subject)?)
            .body(
                Body::builder()
                    .text(content(&email.text)?)
                    .html(content(&email.html)?)
                    .build(),
            )
            .build();

        self.client
            .send_email()
            .from_email_address(&self.from)
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .context("ses send_email")?;
        Ok(())
    }
}

/// Writes the message to the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.text, "email (log backend)");
        Ok(())
    }
}

/// Delivers on a detached task; failures are only logged.
pub fn send_in_background(mailer: Arc<dyn Mailer>, email: OutgoingEmail) {
    tokio::spawn(async move {
        match mailer.send(&email).await {
            Ok(()) => info!(to = %email.to, subject = %email.subject, "email sent"),
            Err(e) => error!(error = ?e, to = %email.to, "email could not be sent"),
        }
    });
}

pub fn confirmation_email(to: &str, username: &str, base_url: &str, token: &str) -> OutgoingEmail {
    let link = format!("{}/api/auth/confirm_email/{}", base_url.trim_end_matches('/'), token);
    OutgoingEmail {
        to: to.to_string(),
        subject: "Confirm Your Email".into(),
        text: format!(
            "Hi {username},\n\nThanks for signing up. Confirm your email address by opening:\n\n{link}\n"
        ),
        html: format!(
            "<p>Hi {username},</p>\
             <p>Thanks for signing up. Confirm your email address by following the link below.</p>\
             <p><a href=\"{link}\">Confirm email</a></p>"
        ),
    }
}

pub fn password_reset_email(to: &str, username: &str, base_url: &str, token: &str) -> OutgoingEmail {
    let endpoint = format!("{}/api/auth/password-reset/confirm", base_url.trim_end_matches('/'));
    OutgoingEmail {
        to: to.to_string(),
        subject: "Password Reset Request".into(),
        text: format!(
            "Hi {username},\n\nWe received a request to reset your password. \
             Send this token together with your new password to {endpoint}:\n\n{token}\n\n\
             If you did not ask for a reset you can ignore this email.\n"
        ),
        html: format!(
            "<p>Hi {username},</p>\
             <p>We received a request to reset your password. Send this token together with \
             your new password to <code>{endpoint}</code>:</p>\
             <pre>{token}</pre>\
             <p>If you did not ask for a reset you can ignore this email.</p>"
        ),
    }
}

/// Keeps every message; used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<OutgoingEmail>>,
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}
