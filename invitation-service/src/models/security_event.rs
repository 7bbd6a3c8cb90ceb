//! Security event model - append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Security event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Access to an institution the caller does not manage
    UnauthorizedInstitutionAccess,
    /// Caller is known but lacks the role for the action
    InsufficientPrivileges,
    /// Invitation quota hit for an (email, institution) pair
    RateLimitExceeded,
    /// Invitation token not found, expired, used, or otherwise rejected
    TokenValidationFailure,
    InstitutionCreated,
    InstitutionUpdated,
    InstitutionDeleted,
    SecurityEventsExported,
    InvitationCreated,
    InvitationAccepted,
    InvitationRevoked,
}

impl SecurityEventType {
    pub const ALL: [SecurityEventType; 11] = [
        SecurityEventType::UnauthorizedInstitutionAccess,
        SecurityEventType::InsufficientPrivileges,
        SecurityEventType::RateLimitExceeded,
        SecurityEventType::TokenValidationFailure,
        SecurityEventType::InstitutionCreated,
        SecurityEventType::InstitutionUpdated,
        SecurityEventType::InstitutionDeleted,
        SecurityEventType::SecurityEventsExported,
        SecurityEventType::InvitationCreated,
        SecurityEventType::InvitationAccepted,
        SecurityEventType::InvitationRevoked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::UnauthorizedInstitutionAccess => "unauthorized_institution_access",
            SecurityEventType::InsufficientPrivileges => "insufficient_privileges",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::TokenValidationFailure => "token_validation_failure",
            SecurityEventType::InstitutionCreated => "institution_created",
            SecurityEventType::InstitutionUpdated => "institution_updated",
            SecurityEventType::InstitutionDeleted => "institution_deleted",
            SecurityEventType::SecurityEventsExported => "security_events_exported",
            SecurityEventType::InvitationCreated => "invitation_created",
            SecurityEventType::InvitationAccepted => "invitation_accepted",
            SecurityEventType::InvitationRevoked => "invitation_revoked",
        }
    }

    /// Severity used for the structured log line mirroring each event.
    pub fn severity(&self) -> &'static str {
        match self {
            SecurityEventType::UnauthorizedInstitutionAccess
            | SecurityEventType::InsufficientPrivileges => "critical",
            SecurityEventType::RateLimitExceeded | SecurityEventType::TokenValidationFailure => {
                "warning"
            }
            _ => "info",
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SecurityEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecurityEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid security event type: {}", s))
    }
}

impl TryFrom<String> for SecurityEventType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Security event entity. Never updated or deleted once written.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub event_type: SecurityEventType,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        user_id: Option<Uuid>,
        ip_address: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            user_id,
            ip_address,
            details,
            created_at: Utc::now(),
        }
    }

    /// Institution ids this event concerns, read from its details.
    pub fn institution_refs(&self) -> impl Iterator<Item = &str> {
        ["institution_id", "attempted_institution_id"]
            .into_iter()
            .filter_map(|key| self.details.get(key).and_then(|v| v.as_str()))
    }
}
