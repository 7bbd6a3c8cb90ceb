//! Ability resolution over institutions, templates and submissions.
//!
//! Every function here is pure: callers build an [`AccessContext`] once per
//! request and pass it explicitly. Template reads are an OR over several
//! independent access paths, so revoking one path never hides a template
//! still reachable through another.

use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::{Institution, InstitutionGrant, InstitutionRole, Submission, Template, User};

/// Scopes asserted by the trusted gateway for this request only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub accessible_partnership_ids: BTreeSet<i64>,
    #[serde(default)]
    pub external_account_id: Option<i64>,
    #[serde(default)]
    pub external_partnership_id: Option<i64>,
}

/// Everything ability resolution may look at for one request.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub user: Option<User>,
    pub institution_grants: Vec<InstitutionGrant>,
    pub request_context: Option<RequestContext>,
}

impl AccessContext {
    pub fn for_user(user: User, institution_grants: Vec<InstitutionGrant>) -> Self {
        Self {
            user: Some(user),
            institution_grants,
            request_context: None,
        }
    }

    pub fn with_request_context(mut self, request_context: Option<RequestContext>) -> Self {
        self.request_context = request_context;
        self
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }

    fn account_id(&self) -> Option<i64> {
        self.user.as_ref().and_then(|u| u.account_id)
    }

    fn external_account_id(&self) -> Option<i64> {
        self.request_context
            .as_ref()
            .and_then(|rc| rc.external_account_id)
    }

    fn external_partnership_id(&self) -> Option<i64> {
        self.request_context
            .as_ref()
            .and_then(|rc| rc.external_partnership_id)
    }
}

/// Deployment-wide knobs for ability resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbilityPolicy {
    /// Partnership whose templates every principal may read.
    pub global_partnership_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Manage,
}

#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Institution(&'a Institution),
    Template(&'a Template),
    Submission {
        submission: &'a Submission,
        template: Option<&'a Template>,
    },
}

pub fn resolve(resource: Resource<'_>, action: Action, ctx: &AccessContext, policy: &AbilityPolicy) -> bool {
    match resource {
        Resource::Institution(institution) => institution_scope(ctx, action).matches(institution),
        Resource::Template(template) => match action {
            Action::Read => template_scope(ctx, policy).matches(template),
            Action::Manage => can_manage_template(template, ctx),
        },
        Resource::Submission {
            submission,
            template,
        } => {
            let owned = submission.account_id.is_some()
                && (submission.account_id == ctx.account_id()
                    || submission.account_id == ctx.external_account_id());
            match action {
                Action::Manage => owned,
                Action::Read => {
                    owned
                        || template
                            .filter(|t| t.id == submission.template_id)
                            .is_some_and(|t| template_scope(ctx, policy).matches(t))
                }
            }
        }
    }
}

fn can_manage_template(template: &Template, ctx: &AccessContext) -> bool {
    let by_account = template.account_id.is_some() && template.account_id == ctx.account_id();
    let by_external_account =
        template.account_id.is_some() && template.account_id == ctx.external_account_id();
    let by_external_partnership = template.partnership_id.is_some()
        && template.partnership_id == ctx.external_partnership_id();

    by_account || by_external_account || by_external_partnership
}

/// Read filter over templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateScope {
    account_id: Option<i64>,
    external_account_id: Option<i64>,
    partnership_ids: BTreeSet<i64>,
}

pub fn template_scope(ctx: &AccessContext, policy: &AbilityPolicy) -> TemplateScope {
    let mut partnership_ids = BTreeSet::new();

    if let Some(user) = &ctx.user {
        partnership_ids.extend(user.partnership_ids.iter().copied());
    }
    if let Some(rc) = &ctx.request_context {
        partnership_ids.extend(rc.accessible_partnership_ids.iter().copied());
    }
    if let Some(global) = policy.global_partnership_id {
        partnership_ids.insert(global);
    }

    TemplateScope {
        account_id: ctx.account_id(),
        external_account_id: ctx.external_account_id(),
        partnership_ids,
    }
}

impl TemplateScope {
    pub fn matches(&self, template: &Template) -> bool {
        let by_account = self.account_id.is_some_and(|account| {
            template.account_id == Some(account) || template.shared_account_ids.contains(&account)
        });
        let by_partnership = template
            .partnership_id
            .is_some_and(|p| self.partnership_ids.contains(&p));
        let by_external_account = self
            .external_account_id
            .is_some_and(|account| template.account_id == Some(account));

        by_account || by_partnership || by_external_account
    }

    /// True when no path can ever match, so callers may skip the query.
    pub fn is_empty(&self) -> bool {
        self.account_id.is_none() && self.external_account_id.is_none() && self.partnership_ids.is_empty()
    }

    /// Append this scope as a parenthesised predicate over `templates` columns.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push("(FALSE");
        if let Some(account) = self.account_id {
            qb.push(" OR account_id = ").push_bind(account);
            qb.push(" OR ").push_bind(account).push(" = ANY(shared_account_ids)");
        }
        if !self.partnership_ids.is_empty() {
            let ids: Vec<i64> = self.partnership_ids.iter().copied().collect();
            qb.push(" OR partnership_id = ANY(").push_bind(ids).push(")");
        }
        if let Some(account) = self.external_account_id {
            qb.push(" OR account_id = ").push_bind(account);
        }
        qb.push(")");
    }
}

/// Institutions a caller may act on for a given action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstitutionScope {
    user_id: Option<Uuid>,
    institution_ids: BTreeSet<Uuid>,
}

/// Super admins may always act; granted roles widen the set: any role for
/// reads, `cohort_super_admin` for management.
pub fn institution_scope(ctx: &AccessContext, action: Action) -> InstitutionScope {
    let Some(user_id) = ctx.user_id() else {
        return InstitutionScope::default();
    };

    let required = match action {
        Action::Read => None,
        Action::Manage => Some(InstitutionRole::CohortSuperAdmin),
    };

    let institution_ids = ctx
        .institution_grants
        .iter()
        .filter(|g| g.user_id == user_id && required.map_or(true, |r| g.role == r))
        .map(|g| g.institution_id)
        .collect();

    InstitutionScope {
        user_id: Some(user_id),
        institution_ids,
    }
}

impl InstitutionScope {
    pub fn matches(&self, institution: &Institution) -> bool {
        self.user_id == Some(institution.super_admin_id)
            || self.institution_ids.contains(&institution.id)
    }

    /// Append this scope as a parenthesised predicate over `institutions` columns.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push("(FALSE");
        if let Some(user_id) = self.user_id {
            qb.push(" OR super_admin_id = ").push_bind(user_id);
        }
        if !self.institution_ids.is_empty() {
            let ids: Vec<Uuid> = self.institution_ids.iter().copied().collect();
            qb.push(" OR id = ANY(").push_bind(ids).push(")");
        }
        qb.push(")");
    }
}
