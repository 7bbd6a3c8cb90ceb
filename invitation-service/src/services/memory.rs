//! In-process repositories for tests and local runs without Postgres.
//!
//! One mutex guards all state, which gives the same serialization the
//! Postgres implementation gets from advisory locks and conditional updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::ability::{InstitutionScope, TemplateScope};
use super::quota::InvitationQuota;
use super::repository::{
    DirectoryRepository, EventCursor, EventFilter, InsertOutcome, InvitationRepository,
    Repositories, SecurityEventRepository, TemplateRepository,
};
use crate::models::{
    Institution, InstitutionGrant, InstitutionRole, Invitation, SecurityEvent, SecurityEventType,
    Submission, Template, User,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    institutions: HashMap<Uuid, Institution>,
    grants: Vec<InstitutionGrant>,
    invitations: Vec<Invitation>,
    templates: Vec<Template>,
    submissions: HashMap<Uuid, Submission>,
    events: Vec<SecurityEvent>,
}

#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, anyhow::Error> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory database lock poisoned"))
    }

    pub fn insert_user(&self, user: User) -> Result<(), anyhow::Error> {
        self.lock()?.users.insert(user.id, user);
        Ok(())
    }

    pub fn insert_institution(&self, institution: Institution) -> Result<(), anyhow::Error> {
        self.lock()?.institutions.insert(institution.id, institution);
        Ok(())
    }

    pub fn insert_template(&self, template: Template) -> Result<(), anyhow::Error> {
        self.lock()?.templates.push(template);
        Ok(())
    }

    pub fn insert_submission(&self, submission: Submission) -> Result<(), anyhow::Error> {
        self.lock()?.submissions.insert(submission.id, submission);
        Ok(())
    }

    pub fn grant_role(
        &self,
        user_id: Uuid,
        institution_id: Uuid,
        role: InstitutionRole,
    ) -> Result<(), anyhow::Error> {
        let mut state = self.lock()?;
        upsert_grant(&mut state, user_id, institution_id, role, Utc::now());
        Ok(())
    }

    /// Snapshot of every stored invitation, oldest first.
    pub fn invitations(&self) -> Result<Vec<Invitation>, anyhow::Error> {
        Ok(self.lock()?.invitations.clone())
    }

    /// Snapshot of the event log, oldest first.
    pub fn events(&self) -> Result<Vec<SecurityEvent>, anyhow::Error> {
        Ok(self.lock()?.events.clone())
    }

    /// Move an invitation's expiry, for exercising time-based behaviour.
    pub fn set_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut state = self.lock()?;
        let invitation = state
            .invitations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| anyhow::anyhow!("invitation {} not found", id))?;
        invitation.expires_at = expires_at;
        if invitation.sent_at >= expires_at {
            invitation.sent_at = expires_at - chrono::Duration::seconds(1);
        }
        Ok(())
    }
}

fn upsert_grant(
    state: &mut MemoryState,
    user_id: Uuid,
    institution_id: Uuid,
    role: InstitutionRole,
    now: DateTime<Utc>,
) {
    let exists = state
        .grants
        .iter()
        .any(|g| g.user_id == user_id && g.institution_id == institution_id && g.role == role);
    if !exists {
        state.grants.push(InstitutionGrant {
            user_id,
            institution_id,
            role,
            granted_at: now,
        });
    }
}

fn newest_first(events: &mut [SecurityEvent]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl InvitationRepository for MemoryDatabase {
    async fn insert_within_quota(
        &self,
        invitation: &Invitation,
        quota: InvitationQuota,
    ) -> Result<InsertOutcome, anyhow::Error> {
        let mut state = self.lock()?;
        let active = state
            .invitations
            .iter()
            .filter(|i| {
                i.institution_id == invitation.institution_id
                    && i.email.eq_ignore_ascii_case(&invitation.email)
                    && i.is_active_at(invitation.sent_at)
            })
            .count() as i64;

        if let Err(limit) = quota.check(active) {
            return Ok(InsertOutcome::LimitReached(limit));
        }

        if state
            .invitations
            .iter()
            .any(|i| i.hashed_token == invitation.hashed_token)
        {
            anyhow::bail!("duplicate invitation token digest");
        }

        state.invitations.push(invitation.clone());
        Ok(InsertOutcome::Inserted(invitation.clone()))
    }

    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>, anyhow::Error> {
        Ok(self.lock()?.invitations.iter().find(|i| i.id == id).cloned())
    }

    async fn find_by_hash(&self, hashed_token: &str) -> Result<Option<Invitation>, anyhow::Error> {
        Ok(self
            .lock()?
            .invitations
            .iter()
            .find(|i| i.hashed_token == hashed_token)
            .cloned())
    }

    async fn find_active_by_preview(
        &self,
        preview: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        Ok(self
            .lock()?
            .invitations
            .iter()
            .filter(|i| i.token_preview == preview && i.is_active_at(now))
            .max_by_key(|i| i.sent_at)
            .cloned())
    }

    async fn accept(
        &self,
        hashed_token: &str,
        email: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, anyhow::Error> {
        let mut state = self.lock()?;
        let Some(invitation) = state.invitations.iter_mut().find(|i| {
            i.hashed_token == hashed_token && i.email.eq_ignore_ascii_case(email) && i.is_active_at(now)
        }) else {
            return Ok(None);
        };

        invitation.used_at = Some(now);
        let accepted = invitation.clone();
        upsert_grant(&mut state, user_id, accepted.institution_id, accepted.role, now);
        Ok(Some(accepted))
    }

    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error> {
        let mut state = self.lock()?;
        match state
            .invitations
            .iter_mut()
            .find(|i| i.id == id && i.is_active_at(now))
        {
            Some(invitation) => {
                invitation.used_at = Some(now);
                invitation.revoked_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_institution(
        &self,
        institution_id: Uuid,
        include_used: bool,
    ) -> Result<Vec<Invitation>, anyhow::Error> {
        let mut invitations: Vec<Invitation> = self
            .lock()?
            .invitations
            .iter()
            .filter(|i| i.institution_id == institution_id && (include_used || i.used_at.is_none()))
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(invitations)
    }

    async fn count_active(
        &self,
        email: &str,
        institution_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, anyhow::Error> {
        Ok(self
            .lock()?
            .invitations
            .iter()
            .filter(|i| {
                i.institution_id == institution_id
                    && i.email.eq_ignore_ascii_case(email)
                    && i.is_active_at(now)
            })
            .count() as i64)
    }
}

#[async_trait]
impl DirectoryRepository for MemoryDatabase {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, anyhow::Error> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn find_institution(&self, id: Uuid) -> Result<Option<Institution>, anyhow::Error> {
        Ok(self.lock()?.institutions.get(&id).cloned())
    }

    async fn find_institution_in_scope(
        &self,
        id: Uuid,
        scope: &InstitutionScope,
    ) -> Result<Option<Institution>, anyhow::Error> {
        Ok(self
            .lock()?
            .institutions
            .get(&id)
            .filter(|i| scope.matches(i))
            .cloned())
    }

    async fn grants_for_user(&self, user_id: Uuid) -> Result<Vec<InstitutionGrant>, anyhow::Error> {
        Ok(self
            .lock()?
            .grants
            .iter()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn super_admin_institution_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, anyhow::Error> {
        let mut ids: Vec<Uuid> = self
            .lock()?
            .institutions
            .values()
            .filter(|i| i.super_admin_id == user_id)
            .map(|i| i.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl TemplateRepository for MemoryDatabase {
    async fn list_templates(
        &self,
        scope: &TemplateScope,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Template>, anyhow::Error> {
        let mut templates: Vec<Template> = self
            .lock()?
            .templates
            .iter()
            .filter(|t| scope.matches(t))
            .cloned()
            .collect();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(templates
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_template(&self, id: Uuid) -> Result<Option<Template>, anyhow::Error> {
        Ok(self.lock()?.templates.iter().find(|t| t.id == id).cloned())
    }

    async fn find_submission(&self, id: Uuid) -> Result<Option<Submission>, anyhow::Error> {
        Ok(self.lock()?.submissions.get(&id).cloned())
    }
}

#[async_trait]
impl SecurityEventRepository for MemoryDatabase {
    async fn append_event(&self, event: &SecurityEvent) -> Result<(), anyhow::Error> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }

    async fn query_events(
        &self,
        filter: &EventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SecurityEvent>, i64), anyhow::Error> {
        let mut events: Vec<SecurityEvent> = self
            .lock()?
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        newest_first(&mut events);
        let total = events.len() as i64;
        let page = events
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn events_after(
        &self,
        filter: &EventFilter,
        cursor: Option<EventCursor>,
        batch: i64,
    ) -> Result<Vec<SecurityEvent>, anyhow::Error> {
        let mut events: Vec<SecurityEvent> = self
            .lock()?
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .filter(|e| {
                cursor.map_or(true, |c| (e.created_at, e.id) < (c.created_at, c.id))
            })
            .cloned()
            .collect();
        newest_first(&mut events);
        events.truncate(batch.max(0) as usize);
        Ok(events)
    }

    async fn count_by_type(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<(SecurityEventType, i64)>, anyhow::Error> {
        let mut counts: HashMap<SecurityEventType, i64> = HashMap::new();
        for event in self.lock()?.events.iter().filter(|e| filter.matches(e)) {
            *counts.entry(event.event_type).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        Ok(counts)
    }
}

#[async_trait]
impl Repositories for MemoryDatabase {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.lock().map(|_| ())
    }
}
