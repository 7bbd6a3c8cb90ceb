//! Invitation lifecycle: create, preview, accept, revoke.
//!
//! Raw tokens exist only in this module's locals, the pending-token store and
//! the mailer. Everything persisted or logged carries the digest or the
//! 8 character preview.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

use super::ability::{institution_scope, AccessContext, Action};
use super::error::{audit_preview, InvitationError, TokenFailureReason};
use super::mailer::{deliver_invitation, InvitationMailer};
use super::metrics;
use super::quota::InvitationQuota;
use super::repository::{DirectoryRepository, InsertOutcome, InvitationRepository, Repositories};
use super::security_events::SecurityEventLog;
use super::token_store::PendingTokenStore;
use crate::models::{
    Institution, InstitutionRole, InstitutionSummary, Invitation, SecurityEventType, User,
};
use crate::utils::{generate_raw_token, hash_token, normalize_email, token_preview};

/// Longest raw token worth hashing; anything longer is rejected as malformed.
const MAX_RAW_TOKEN_LEN: usize = 256;

/// Why an acceptance failed, and whose invitation it hit when the digest
/// matched a row. Audit only.
#[derive(Debug, Clone, Copy)]
struct RejectedToken {
    reason: TokenFailureReason,
    institution_id: Option<Uuid>,
}

impl From<TokenFailureReason> for RejectedToken {
    fn from(reason: TokenFailureReason) -> Self {
        Self {
            reason,
            institution_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvitationSettings {
    pub quota: InvitationQuota,
    pub expiry: Duration,
    pub pending_token_ttl_seconds: u64,
}

impl Default for InvitationSettings {
    fn default() -> Self {
        Self {
            quota: InvitationQuota::default(),
            expiry: Duration::days(7),
            pending_token_ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl From<&crate::config::InvitationConfig> for InvitationSettings {
    fn from(config: &crate::config::InvitationConfig) -> Self {
        Self {
            quota: InvitationQuota::new(config.max_active_per_email),
            expiry: Duration::days(config.expiry_days),
            pending_token_ttl_seconds: config.pending_token_ttl_seconds,
        }
    }
}

/// What the acceptance page may show before the user commits.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationPreview {
    pub institution: InstitutionSummary,
    pub role: InstitutionRole,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AcceptedInvitation {
    pub invitation: Invitation,
    pub institution: InstitutionSummary,
}

#[derive(Clone)]
pub struct InvitationService {
    repo: Arc<dyn Repositories>,
    token_store: Arc<dyn PendingTokenStore>,
    mailer: Arc<dyn InvitationMailer>,
    events: SecurityEventLog,
    settings: InvitationSettings,
}

impl InvitationService {
    pub fn new(
        repo: Arc<dyn Repositories>,
        token_store: Arc<dyn PendingTokenStore>,
        mailer: Arc<dyn InvitationMailer>,
        events: SecurityEventLog,
        settings: InvitationSettings,
    ) -> Self {
        Self {
            repo,
            token_store,
            mailer,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &InvitationSettings {
        &self.settings
    }

    /// Institution the caller manages. Anything else, including institutions
    /// that exist but are out of scope, is `NotFound`; out-of-scope attempts
    /// are recorded.
    pub async fn managed_institution(
        &self,
        ctx: &AccessContext,
        institution_id: Uuid,
        ip_address: Option<String>,
    ) -> Result<Institution, InvitationError> {
        let scope = institution_scope(ctx, Action::Manage);
        if let Some(institution) = self
            .repo
            .find_institution_in_scope(institution_id, &scope)
            .await?
        {
            return Ok(institution);
        }

        if self.repo.find_institution(institution_id).await?.is_some() {
            self.events
                .log(
                    SecurityEventType::UnauthorizedInstitutionAccess,
                    ctx.user_id(),
                    ip_address,
                    json!({
                        "attempted_institution_id": institution_id.to_string(),
                        "action": "manage_invitations",
                    }),
                )
                .await;
        }

        Err(InvitationError::NotFound("Institution"))
    }

    #[tracing::instrument(skip(self, email), fields(institution_id = %institution.id, role = %role))]
    pub async fn create_invitation(
        &self,
        institution: &Institution,
        email: &str,
        role: InstitutionRole,
        created_by: Uuid,
        ip_address: Option<String>,
    ) -> Result<Invitation, InvitationError> {
        let email = normalize_email(email);
        if !email.validate_email() {
            return Err(InvitationError::Validation("Invalid email address".to_string()));
        }

        let raw_token = generate_raw_token();
        let hashed_token = hash_token(&raw_token);
        let preview = token_preview(&raw_token)
            .ok_or_else(|| anyhow::anyhow!("generated token shorter than its preview"))?
            .to_string();

        let invitation = Invitation::new(
            institution.id,
            email,
            role,
            hashed_token,
            preview,
            Utc::now(),
            self.settings.expiry,
            created_by,
        );

        let invitation = match self
            .repo
            .insert_within_quota(&invitation, self.settings.quota)
            .await?
        {
            InsertOutcome::Inserted(invitation) => invitation,
            InsertOutcome::LimitReached(limit) => {
                metrics::record_invitation_created("rate_limited");
                self.events
                    .log(
                        SecurityEventType::RateLimitExceeded,
                        Some(created_by),
                        ip_address,
                        json!({
                            "email": invitation.email,
                            "institution_id": institution.id.to_string(),
                            "max": limit.max,
                            "active": limit.active,
                        }),
                    )
                    .await;
                return Err(InvitationError::RateLimitExceeded { max: limit.max });
            }
        };

        if let Err(e) = self
            .token_store
            .put(
                &invitation.hashed_token,
                &raw_token,
                self.settings.pending_token_ttl_seconds,
            )
            .await
        {
            tracing::warn!(
                error = %e,
                invitation_id = %invitation.id,
                "Failed to store pending invitation token"
            );
        }

        tokio::spawn(deliver_invitation(
            self.token_store.clone(),
            self.mailer.clone(),
            invitation.clone(),
            institution.name.clone(),
            self.settings.pending_token_ttl_seconds,
        ));

        metrics::record_invitation_created("created");
        self.events
            .log(
                SecurityEventType::InvitationCreated,
                Some(created_by),
                ip_address,
                json!({
                    "invitation_id": invitation.id.to_string(),
                    "institution_id": institution.id.to_string(),
                    "email": invitation.email,
                    "role": invitation.role.as_str(),
                    "token_preview": invitation.token_preview,
                }),
            )
            .await;

        tracing::info!(invitation_id = %invitation.id, "Invitation created");
        Ok(invitation)
    }

    /// Non-authoritative lookup by the token's preview. Never consumes.
    pub async fn validate_preview(&self, raw_token: &str) -> Result<InvitationPreview, InvitationError> {
        let preview = token_preview(raw_token.trim()).ok_or(InvitationError::InvalidOrExpiredToken)?;

        let invitation = self
            .repo
            .find_active_by_preview(preview, Utc::now())
            .await?
            .ok_or(InvitationError::InvalidOrExpiredToken)?;

        let institution = self
            .repo
            .find_institution(invitation.institution_id)
            .await?
            .ok_or(InvitationError::InvalidOrExpiredToken)?;

        Ok(InvitationPreview {
            institution: InstitutionSummary::from(&institution),
            role: invitation.role,
            expires_at: invitation.expires_at,
        })
    }

    /// Consume the invitation and grant its role. Every failure collapses to
    /// `InvalidOrExpiredToken`; the specific reason only reaches the audit log.
    #[tracing::instrument(skip(self, raw_token, email, user), fields(user_id = %user.id))]
    pub async fn accept_invitation(
        &self,
        raw_token: &str,
        email: &str,
        user: &User,
        ip_address: Option<String>,
    ) -> Result<AcceptedInvitation, InvitationError> {
        let raw_token = raw_token.trim();
        match self.try_accept(raw_token, email, user).await {
            Ok(accepted) => {
                if let Err(e) = self.token_store.remove(&accepted.invitation.hashed_token).await {
                    tracing::warn!(
                        error = %e,
                        invitation_id = %accepted.invitation.id,
                        "Failed to delete pending invitation token"
                    );
                }

                metrics::record_invitation_accepted("accepted");
                self.events
                    .log(
                        SecurityEventType::InvitationAccepted,
                        Some(user.id),
                        ip_address,
                        json!({
                            "invitation_id": accepted.invitation.id.to_string(),
                            "institution_id": accepted.institution.id.to_string(),
                            "role": accepted.invitation.role.as_str(),
                            "token_preview": accepted.invitation.token_preview,
                        }),
                    )
                    .await;
                Ok(accepted)
            }
            Err(rejected) => {
                metrics::record_invitation_accepted("rejected");
                let mut details = json!({
                    "token_preview": audit_preview(raw_token),
                    "reason": rejected.reason.as_str(),
                });
                if let Some(institution_id) = rejected.institution_id {
                    details["institution_id"] = json!(institution_id.to_string());
                }
                self.events
                    .log(
                        SecurityEventType::TokenValidationFailure,
                        Some(user.id),
                        ip_address,
                        details,
                    )
                    .await;
                Err(InvitationError::InvalidOrExpiredToken)
            }
        }
    }

    async fn try_accept(
        &self,
        raw_token: &str,
        email: &str,
        user: &User,
    ) -> Result<AcceptedInvitation, RejectedToken> {
        if token_preview(raw_token).is_none() || raw_token.len() > MAX_RAW_TOKEN_LEN {
            return Err(TokenFailureReason::Malformed.into());
        }

        let hashed_token = hash_token(raw_token);
        let email = normalize_email(email);
        let now = Utc::now();

        let accepted = self
            .repo
            .accept(&hashed_token, &email, user.id, now)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Invitation acceptance failed");
                RejectedToken::from(TokenFailureReason::Internal)
            })?;

        let Some(invitation) = accepted else {
            return Err(self.classify_failure(&hashed_token, &email, now).await);
        };

        let institution = self
            .repo
            .find_institution(invitation.institution_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Institution lookup after acceptance failed");
                RejectedToken::from(TokenFailureReason::Internal)
            })?
            .map(|i| InstitutionSummary::from(&i))
            .unwrap_or_else(|| InstitutionSummary {
                id: invitation.institution_id,
                name: String::new(),
            });

        Ok(AcceptedInvitation {
            invitation,
            institution,
        })
    }

    /// Why a consume matched nothing. Only used for the audit record.
    async fn classify_failure(
        &self,
        hashed_token: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> RejectedToken {
        let invitation = match self.repo.find_by_hash(hashed_token).await {
            Ok(Some(invitation)) => invitation,
            Ok(None) => return TokenFailureReason::NotFound.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to classify token failure");
                return TokenFailureReason::Internal.into();
            }
        };

        let reason = if invitation.revoked_at.is_some() {
            TokenFailureReason::Revoked
        } else if invitation.used_at.is_some() {
            TokenFailureReason::AlreadyUsed
        } else if invitation.expires_at <= now {
            TokenFailureReason::Expired
        } else if !invitation.email.eq_ignore_ascii_case(email) {
            TokenFailureReason::EmailMismatch
        } else {
            // Raced with a concurrent acceptance between the two queries.
            TokenFailureReason::AlreadyUsed
        };

        RejectedToken {
            reason,
            institution_id: Some(invitation.institution_id),
        }
    }

    /// Revoke an active invitation. `Ok(false)` when it was already used,
    /// revoked or expired.
    #[tracing::instrument(skip(self, invitation), fields(invitation_id = %invitation.id))]
    pub async fn revoke_invitation(
        &self,
        invitation: &Invitation,
        revoked_by: Uuid,
        ip_address: Option<String>,
    ) -> Result<bool, InvitationError> {
        let revoked = self.repo.revoke(invitation.id, Utc::now()).await?;

        if revoked {
            if let Err(e) = self.token_store.remove(&invitation.hashed_token).await {
                tracing::warn!(error = %e, "Failed to delete pending invitation token");
            }
            metrics::record_invitation_revoked();
            self.events
                .log(
                    SecurityEventType::InvitationRevoked,
                    Some(revoked_by),
                    ip_address,
                    json!({
                        "invitation_id": invitation.id.to_string(),
                        "institution_id": invitation.institution_id.to_string(),
                        "token_preview": invitation.token_preview,
                    }),
                )
                .await;
        }

        Ok(revoked)
    }

    pub async fn find_invitation(&self, id: Uuid) -> Result<Invitation, InvitationError> {
        self.repo
            .find_invitation(id)
            .await?
            .ok_or(InvitationError::NotFound("Invitation"))
    }

    /// Newest first; consumed invitations only when `show_used`.
    pub async fn list_invitations(
        &self,
        institution_id: Uuid,
        show_used: bool,
    ) -> Result<Vec<Invitation>, InvitationError> {
        Ok(self
            .repo
            .list_for_institution(institution_id, show_used)
            .await?)
    }

    pub async fn active_invitation_count(
        &self,
        email: &str,
        institution_id: Uuid,
    ) -> Result<i64, InvitationError> {
        Ok(self
            .repo
            .count_active(&normalize_email(email), institution_id, Utc::now())
            .await?)
    }
}
