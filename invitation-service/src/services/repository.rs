//! Persistence seams. [`super::Database`] implements them over Postgres and
//! [`super::MemoryDatabase`] in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::ability::{InstitutionScope, TemplateScope};
use super::quota::{InvitationQuota, LimitReached};
use crate::models::{
    Institution, InstitutionGrant, Invitation, SecurityEvent, SecurityEventType, Submission,
    Template, User,
};

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Invitation),
    LimitReached(LimitReached),
}

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    /// Count active invitations for the pair and insert only if the quota
    /// allows, as one serialized step per (email, institution).
    async fn insert_within_quota(
        &self,
        invitation: &Invitation,
        quota: InvitationQuota,
    ) -> Result<InsertOutcome, anyhow::Error>;

    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>, anyhow::Error>;

    async fn find_by_hash(&self, hashed_token: &str) -> Result<Option<Invitation>, anyhow::Error>;

    async fn find_active_by_preview(
        &self,
        preview: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, anyhow::Error>;

    /// Consume the active invitation with this digest and email, and grant its
    /// role to `user_id`. `None` when no such active invitation exists; at most
    /// one caller ever gets `Some` for a digest.
    async fn accept(
        &self,
        hashed_token: &str,
        email: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, anyhow::Error>;

    /// Mark an active invitation revoked. `false` when it was no longer active.
    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error>;

    /// Newest first. Consumed rows only with `include_used`.
    async fn list_for_institution(
        &self,
        institution_id: Uuid,
        include_used: bool,
    ) -> Result<Vec<Invitation>, anyhow::Error>;

    async fn count_active(
        &self,
        email: &str,
        institution_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, anyhow::Error>;
}

#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, anyhow::Error>;

    async fn find_institution(&self, id: Uuid) -> Result<Option<Institution>, anyhow::Error>;

    /// The institution, only when it falls inside `scope`.
    async fn find_institution_in_scope(
        &self,
        id: Uuid,
        scope: &InstitutionScope,
    ) -> Result<Option<Institution>, anyhow::Error>;

    async fn grants_for_user(&self, user_id: Uuid) -> Result<Vec<InstitutionGrant>, anyhow::Error>;

    /// Institutions whose `super_admin_id` is the user.
    async fn super_admin_institution_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, anyhow::Error>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn list_templates(
        &self,
        scope: &TemplateScope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Template>, anyhow::Error>;

    async fn find_template(&self, id: Uuid) -> Result<Option<Template>, anyhow::Error>;

    async fn find_submission(&self, id: Uuid) -> Result<Option<Submission>, anyhow::Error>;
}

/// Who may see an event: its author, or admins of an institution it names.
///
/// With `include_unattributed`, events that name no institution at all are
/// visible too. Alert counts use this so platform-wide failures still reach
/// every security admin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventAudience {
    pub user_id: Uuid,
    pub institution_ids: Vec<Uuid>,
    pub include_unattributed: bool,
}

impl EventAudience {
    pub fn can_see(&self, event: &SecurityEvent) -> bool {
        let mut refs = event.institution_refs().peekable();
        if self.include_unattributed && refs.peek().is_none() {
            return true;
        }

        event.user_id == Some(self.user_id)
            || refs.any(|id| {
                self.institution_ids
                    .iter()
                    .any(|own| own.to_string() == id)
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub user_id: Option<Uuid>,
    pub event_type: Option<SecurityEventType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub audience: Option<EventAudience>,
}

impl EventFilter {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        self.user_id.map_or(true, |u| event.user_id == Some(u))
            && self.event_type.map_or(true, |t| event.event_type == t)
            && self.from.map_or(true, |from| event.created_at >= from)
            && self.to.map_or(true, |to| event.created_at <= to)
            && self.audience.as_ref().map_or(true, |a| a.can_see(event))
    }
}

/// Position after the last row of an export batch, newest-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl From<&SecurityEvent> for EventCursor {
    fn from(event: &SecurityEvent) -> Self {
        Self {
            created_at: event.created_at,
            id: event.id,
        }
    }
}

/// Append-only: no update or delete.
#[async_trait]
pub trait SecurityEventRepository: Send + Sync {
    async fn append_event(&self, event: &SecurityEvent) -> Result<(), anyhow::Error>;

    /// Newest first, with the total matching count.
    async fn query_events(
        &self,
        filter: &EventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SecurityEvent>, i64), anyhow::Error>;

    /// Next batch strictly after `cursor`, newest first.
    async fn events_after(
        &self,
        filter: &EventFilter,
        cursor: Option<EventCursor>,
        batch: i64,
    ) -> Result<Vec<SecurityEvent>, anyhow::Error>;

    async fn count_by_type(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<(SecurityEventType, i64)>, anyhow::Error>;
}

/// Everything the HTTP layer needs from storage.
#[async_trait]
pub trait Repositories:
    InvitationRepository + DirectoryRepository + TemplateRepository + SecurityEventRepository
{
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}
