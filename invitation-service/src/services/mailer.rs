use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use service_core::error::AppError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::metrics;
use super::token_store::PendingTokenStore;
use crate::models::Invitation;

#[async_trait]
pub trait InvitationMailer: Send + Sync {
    async fn send_invitation_email(
        &self,
        invitation: &Invitation,
        institution_name: &str,
        raw_token: &str,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    accept_url: String,
}

impl SmtpMailer {
    pub fn new(config: &crate::config::SmtpConfig, accept_url: &str) -> Result<Self, AppError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("SMTP_HOST is not set")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)));

        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        tracing::info!(host = %host, port = config.port, "Invitation mailer initialized");

        Ok(Self {
            mailer: builder.build(),
            from_email: config.from.clone(),
            accept_url: accept_url.to_string(),
        })
    }
}

fn accept_link(accept_url: &str, raw_token: &str) -> String {
    format!("{}?token={}", accept_url, raw_token)
}

#[async_trait]
impl InvitationMailer for SmtpMailer {
    async fn send_invitation_email(
        &self,
        invitation: &Invitation,
        institution_name: &str,
        raw_token: &str,
    ) -> Result<(), AppError> {
        let link = accept_link(&self.accept_url, raw_token);
        let expires = invitation.expires_at.format("%B %-d, %Y");

        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>You have been invited to {institution}</h2>
        <p>You have been invited to join {institution} as {role}.</p>
        <p>
            <a href="{link}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                Accept invitation
            </a>
        </p>
        <p style="color: #666; font-size: 12px;">
            This invitation expires on {expires}. If you were not expecting it, you can ignore this email.
        </p>
    </body>
</html>
"###,
            institution = institution_name,
            role = invitation.role,
            link = link,
            expires = expires,
        );

        let plain_body = format!(
            "You have been invited to join {} as {}.\n\nAccept the invitation here:\n{}\n\nThis invitation expires on {}.",
            institution_name, invitation.role, link, expires
        );

        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(invitation
                .email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .subject(format!("Invitation to {}", institution_name))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        match self.mailer.send(email).await {
            Ok(_) => {
                tracing::info!(
                    invitation_id = %invitation.id,
                    token_preview = %invitation.token_preview,
                    "Invitation email sent"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    invitation_id = %invitation.id,
                    "Failed to send invitation email"
                );
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

/// Message captured by [`MockMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentInvitation {
    pub to: String,
    pub institution_name: String,
    pub raw_token: String,
}

/// Records messages instead of sending them.
#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<SentInvitation>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentInvitation> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InvitationMailer for MockMailer {
    async fn send_invitation_email(
        &self,
        invitation: &Invitation,
        institution_name: &str,
        raw_token: &str,
    ) -> Result<(), AppError> {
        tracing::info!(invitation_id = %invitation.id, "Mock invitation email captured");
        self.sent
            .lock()
            .map_err(|_| AppError::EmailError("mock mailer lock poisoned".to_string()))?
            .push(SentInvitation {
                to: invitation.email.clone(),
                institution_name: institution_name.to_string(),
                raw_token: raw_token.to_string(),
            });
        Ok(())
    }
}

/// Deliver one invitation: read the raw token back from the pending store
/// (refreshing its TTL), then hand it to the mailer. Runs detached from the
/// request; every failure ends here as a log line.
pub async fn deliver_invitation(
    store: Arc<dyn PendingTokenStore>,
    mailer: Arc<dyn InvitationMailer>,
    invitation: Invitation,
    institution_name: String,
    ttl_seconds: u64,
) {
    let raw_token = match store
        .take_for_delivery(&invitation.hashed_token, ttl_seconds)
        .await
    {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            tracing::warn!(
                invitation_id = %invitation.id,
                token_preview = %invitation.token_preview,
                "Pending token missing; invitation email not sent"
            );
            metrics::record_mail_delivery("token_missing");
            return;
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                invitation_id = %invitation.id,
                "Failed to read pending token; invitation email not sent"
            );
            metrics::record_mail_delivery("store_error");
            return;
        }
    };

    match mailer
        .send_invitation_email(&invitation, &institution_name, &raw_token)
        .await
    {
        Ok(()) => metrics::record_mail_delivery("sent"),
        Err(e) => {
            tracing::error!(error = %e, invitation_id = %invitation.id, "Invitation delivery failed");
            metrics::record_mail_delivery("failed");
        }
    }
}
