//! Invitation model - single-use institution invitations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::InstitutionRole;

/// Derived invitation status; only `Pending` invitations can be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

/// Invitation entity.
///
/// The raw token is never stored here: `hashed_token` is its SHA-256 digest
/// and `token_preview` its first 8 characters.
#[derive(Debug, Clone, FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: InstitutionRole,
    pub hashed_token: String,
    pub token_preview: String,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
}

impl Invitation {
    /// Create a new pending invitation sent at `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        institution_id: Uuid,
        email: String,
        role: InstitutionRole,
        hashed_token: String,
        token_preview: String,
        now: DateTime<Utc>,
        expires_in: Duration,
        created_by: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            institution_id,
            email,
            role,
            hashed_token,
            token_preview,
            sent_at: now,
            expires_at: now + expires_in,
            used_at: None,
            revoked_at: None,
            created_by,
        }
    }

    /// Active means not consumed and not yet expired at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> InvitationStatus {
        match (self.revoked_at, self.used_at) {
            (Some(_), _) => InvitationStatus::Revoked,
            (None, Some(_)) => InvitationStatus::Accepted,
            (None, None) if self.expires_at <= now => InvitationStatus::Expired,
            (None, None) => InvitationStatus::Pending,
        }
    }
}

/// Invitation response for API. Carries the preview, never the digest.
#[derive(Debug, Serialize)]
pub struct InvitationResponse {
    pub id: Uuid,
    pub institution_id: Uuid,
    pub email: String,
    pub role: InstitutionRole,
    pub token_preview: String,
    pub status: InvitationStatus,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
}

impl From<Invitation> for InvitationResponse {
    fn from(i: Invitation) -> Self {
        let status = i.status_at(Utc::now());
        Self {
            id: i.id,
            institution_id: i.institution_id,
            email: i.email,
            role: i.role,
            token_preview: i.token_preview,
            status,
            sent_at: i.sent_at,
            expires_at: i.expires_at,
            used_at: i.used_at,
            created_by: i.created_by,
        }
    }
}
