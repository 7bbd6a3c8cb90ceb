//! Templates and submissions: authorization targets only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Document template owned by an account and optionally published under a
/// partnership.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub account_id: Option<i64>,
    pub partnership_id: Option<i64>,
    pub shared_account_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn new(name: impl Into<String>, account_id: Option<i64>, partnership_id: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            account_id,
            partnership_id,
            shared_account_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn shared_with(mut self, account_ids: impl IntoIterator<Item = i64>) -> Self {
        self.shared_account_ids = account_ids.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Submission {
    pub id: Uuid,
    pub template_id: Uuid,
    pub account_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(template_id: Uuid, account_id: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id,
            account_id,
            created_at: Utc::now(),
        }
    }
}
