//! Invitation acceptance. Every token problem answers the same 422.

use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{AcceptInvitationRequest, AcceptInvitationResponse, ValidateTokenQuery};
use crate::middleware::{AuthUser, ClientIp};
use crate::services::InvitationPreview;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Preview an invitation before accepting it.
///
/// GET /invitation_acceptance/validate?token=
#[tracing::instrument(skip_all)]
pub async fn validate_token(
    State(state): State<AppState>,
    Query(query): Query<ValidateTokenQuery>,
) -> Result<Json<InvitationPreview>, AppError> {
    query.validate()?;

    let preview = state.invitations.validate_preview(&query.token).await?;
    Ok(Json(preview))
}

/// Consume an invitation for the session user.
///
/// POST /invitation_acceptance
#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn accept_invitation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<AcceptInvitationRequest>,
) -> Result<Json<AcceptInvitationResponse>, AppError> {
    let accepted = state
        .invitations
        .accept_invitation(&req.token, &req.email, &user, ip)
        .await?;

    tracing::info!(
        institution_id = %accepted.institution.id,
        role = %accepted.invitation.role,
        "Invitation accepted"
    );

    Ok(Json(AcceptInvitationResponse {
        institution: accepted.institution,
        role: accepted.invitation.role,
    }))
}
