//! Institution model and institution-scoped role grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Roles an invitation can grant on an institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionRole {
    CohortAdmin,
    CohortSuperAdmin,
}

impl InstitutionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstitutionRole::CohortAdmin => "cohort_admin",
            InstitutionRole::CohortSuperAdmin => "cohort_super_admin",
        }
    }
}

impl std::fmt::Display for InstitutionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstitutionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cohort_admin" => Ok(InstitutionRole::CohortAdmin),
            "cohort_super_admin" => Ok(InstitutionRole::CohortSuperAdmin),
            _ => Err(format!("Invalid institution role: {}", s)),
        }
    }
}

impl TryFrom<String> for InstitutionRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Institution entity. Created and edited by the platform; read here.
#[derive(Debug, Clone, FromRow)]
pub struct Institution {
    pub id: Uuid,
    pub account_id: Option<i64>,
    pub name: String,
    pub registration_number: Option<String>,
    pub contact_email: Option<String>,
    pub settings: Json<BTreeMap<String, bool>>,
    pub super_admin_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Institution {
    pub fn new(name: impl Into<String>, super_admin_id: Uuid, account_id: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: name.into(),
            registration_number: None,
            contact_email: None,
            settings: Json(BTreeMap::new()),
            super_admin_id,
            created_at: Utc::now(),
        }
    }
}

/// Role held by a user on an institution (one row per role).
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct InstitutionGrant {
    pub user_id: Uuid,
    pub institution_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: InstitutionRole,
    pub granted_at: DateTime<Utc>,
}

/// Minimal institution reference returned to accepting users.
#[derive(Debug, Clone, Serialize)]
pub struct InstitutionSummary {
    pub id: Uuid,
    pub name: String,
}

impl From<&Institution> for InstitutionSummary {
    fn from(i: &Institution) -> Self {
        Self {
            id: i.id,
            name: i.name.clone(),
        }
    }
}
