//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{InstitutionRole, InstitutionSummary, SecurityEventType};
use crate::services::repository::EventFilter;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    pub institution_id: Uuid,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub role: InstitutionRole,
}

#[derive(Debug, Deserialize)]
pub struct ListInvitationsQuery {
    pub institution_id: Uuid,
    #[serde(default)]
    pub show_used: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateTokenQuery {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcceptInvitationRequest {
    #[validate(length(min = 1, max = 256, message = "Token is required"))]
    pub token: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptInvitationResponse {
    pub institution: InstitutionSummary,
    pub role: InstitutionRole,
}

/// Filters shared by the list and export endpoints.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SecurityEventsQuery {
    pub user_id: Option<Uuid>,
    pub event_type: Option<SecurityEventType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Clamped to 1..=1000 by the event log.
    pub limit: Option<i64>,
    #[validate(range(min = 0, message = "offset must not be negative"))]
    pub offset: Option<i64>,
}

impl SecurityEventsQuery {
    pub fn filter(&self) -> EventFilter {
        EventFilter {
            user_id: self.user_id,
            event_type: self.event_type,
            from: self.from,
            to: self.to,
            audience: None,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct TemplatesQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_fails_to_deserialize() {
        let body = r#"{"institution_id":"7f0c1c4e-8f57-4d2b-9a43-6f3ab0a7c111","email":"a@b.co","role":"owner"}"#;
        assert!(serde_json::from_str::<CreateInvitationRequest>(body).is_err());
    }

    #[test]
    fn create_request_validates_email() {
        let req = CreateInvitationRequest {
            institution_id: Uuid::new_v4(),
            email: "nope".to_string(),
            role: InstitutionRole::CohortAdmin,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn event_query_rejects_negative_offset() {
        let query = SecurityEventsQuery {
            limit: Some(5000),
            offset: Some(-1),
            ..Default::default()
        };
        assert!(query.validate().is_err());
        assert!(SecurityEventsQuery::default().validate().is_ok());
    }
}
