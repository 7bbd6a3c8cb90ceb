//! Invitation management for institution managers.
//!
//! Institutions outside the caller's scope answer 404 exactly like missing
//! ones.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{CreateInvitationRequest, ListInvitationsQuery};
use crate::middleware::ClientIp;
use crate::models::{InvitationResponse, User};
use crate::services::AccessContext;
use crate::utils::ValidatedJson;
use crate::AppState;

fn session_user(ctx: &AccessContext) -> Result<&User, AppError> {
    ctx.user
        .as_ref()
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
}

/// Create an invitation.
///
/// POST /invitations
#[tracing::instrument(skip_all, fields(institution_id = %req.institution_id, role = %req.role))]
pub async fn create_invitation(
    State(state): State<AppState>,
    ctx: AccessContext,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), AppError> {
    let user = session_user(&ctx)?;

    let institution = state
        .invitations
        .managed_institution(&ctx, req.institution_id, ip.clone())
        .await?;

    let invitation = state
        .invitations
        .create_invitation(&institution, &req.email, req.role, user.id, ip)
        .await?;

    Ok((StatusCode::CREATED, Json(InvitationResponse::from(invitation))))
}

/// Revoke an active invitation.
///
/// DELETE /invitations/:id
#[tracing::instrument(skip_all, fields(invitation_id = %id))]
pub async fn revoke_invitation(
    State(state): State<AppState>,
    ctx: AccessContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let user = session_user(&ctx)?;

    let invitation = state.invitations.find_invitation(id).await?;
    state
        .invitations
        .managed_institution(&ctx, invitation.institution_id, ip.clone())
        .await
        .map_err(|_| AppError::NotFound(anyhow::anyhow!("Invitation not found")))?;

    if !state
        .invitations
        .revoke_invitation(&invitation, user.id, ip)
        .await?
    {
        return Err(AppError::UnprocessableEntity(anyhow::anyhow!(
            "Invitation is no longer active"
        )));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// List an institution's invitations, newest first.
///
/// GET /invitations?institution_id=&show_used=
#[tracing::instrument(skip_all, fields(institution_id = %query.institution_id))]
pub async fn list_invitations(
    State(state): State<AppState>,
    ctx: AccessContext,
    ClientIp(ip): ClientIp,
    Query(query): Query<ListInvitationsQuery>,
) -> Result<Json<Vec<InvitationResponse>>, AppError> {
    session_user(&ctx)?;

    let institution = state
        .invitations
        .managed_institution(&ctx, query.institution_id, ip)
        .await?;

    let invitations = state
        .invitations
        .list_invitations(institution.id, query.show_used)
        .await?;

    Ok(Json(
        invitations.into_iter().map(InvitationResponse::from).collect(),
    ))
}
