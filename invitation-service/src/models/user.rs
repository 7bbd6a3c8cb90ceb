//! User model - directory view of platform users.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// User as seen by this service.
///
/// `partnership_ids` are stored partnership memberships; request-scoped
/// partnership grants travel in the access context instead.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub account_id: Option<i64>,
    pub partnership_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, account_id: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            account_id,
            partnership_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_partnerships(mut self, partnership_ids: impl IntoIterator<Item = i64>) -> Self {
        self.partnership_ids = partnership_ids.into_iter().collect();
        self
    }
}
