use service_core::error::AppError;
use thiserror::Error;

use crate::utils::TOKEN_PREVIEW_LEN;

/// Typed outcome of invitation operations. Handlers map each variant to a
/// status; nothing relies on infrastructure errors leaking through.
#[derive(Error, Debug)]
pub enum InvitationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Maximum {max} pending invitations reached for this email")]
    RateLimitExceeded { max: u32 },

    #[error("Access denied")]
    AuthorizationDenied,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for InvitationError {
    fn from(err: sqlx::Error) -> Self {
        InvitationError::Internal(anyhow::Error::new(err))
    }
}

impl From<InvitationError> for AppError {
    fn from(err: InvitationError) -> Self {
        match err {
            InvitationError::Validation(msg) => AppError::UnprocessableEntity(anyhow::anyhow!(msg)),
            InvitationError::RateLimitExceeded { max } => AppError::TooManyRequests(
                format!("Maximum {} pending invitations reached for this email", max),
                None,
            ),
            InvitationError::AuthorizationDenied => {
                AppError::Forbidden(anyhow::anyhow!("Access denied"))
            }
            InvitationError::InvalidOrExpiredToken => {
                AppError::UnprocessableEntity(anyhow::anyhow!("Invalid or expired token"))
            }
            InvitationError::NotFound(what) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            InvitationError::Internal(e) => AppError::InternalError(e),
        }
    }
}

/// Reason codes recorded with `token_validation_failure` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFailureReason {
    Malformed,
    NotFound,
    AlreadyUsed,
    Revoked,
    Expired,
    EmailMismatch,
    Internal,
}

impl TokenFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenFailureReason::Malformed => "malformed",
            TokenFailureReason::NotFound => "not_found",
            TokenFailureReason::AlreadyUsed => "already_used",
            TokenFailureReason::Revoked => "revoked",
            TokenFailureReason::Expired => "expired",
            TokenFailureReason::EmailMismatch => "email_mismatch",
            TokenFailureReason::Internal => "internal_error",
        }
    }
}

/// Preview safe to write into audit details: at most the public prefix.
pub fn audit_preview(raw_token: &str) -> String {
    raw_token.chars().take(TOKEN_PREVIEW_LEN).collect()
}
