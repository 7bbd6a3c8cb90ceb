//! Template and submission reads through ability resolution.
//!
//! Lists are filtered in the query; single reads that fail resolution answer
//! 404.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::TemplatesQuery;
use crate::models::{Submission, Template};
use crate::services::ability::{resolve, template_scope};
use crate::services::repository::TemplateRepository;
use crate::services::{AccessContext, Action, Resource};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

/// GET /templates
#[tracing::instrument(skip_all)]
pub async fn list_templates(
    State(state): State<AppState>,
    ctx: AccessContext,
    Query(query): Query<TemplatesQuery>,
) -> Result<Json<Vec<Template>>, AppError> {
    query.validate()?;

    let scope = template_scope(&ctx, &state.policy);
    let templates = state
        .repo
        .list_templates(
            &scope,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(templates))
}

/// GET /templates/:id
#[tracing::instrument(skip_all, fields(template_id = %id))]
pub async fn get_template(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Template>, AppError> {
    let template = state
        .repo
        .find_template(id)
        .await?
        .filter(|t| resolve(Resource::Template(t), Action::Read, &ctx, &state.policy))
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Template not found")))?;

    Ok(Json(template))
}

/// GET /submissions/:id
#[tracing::instrument(skip_all, fields(submission_id = %id))]
pub async fn get_submission(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Submission>, AppError> {
    let not_found = || AppError::NotFound(anyhow::anyhow!("Submission not found"));

    let submission = state.repo.find_submission(id).await?.ok_or_else(not_found)?;
    let template = state.repo.find_template(submission.template_id).await?;

    let readable = resolve(
        Resource::Submission {
            submission: &submission,
            template: template.as_ref(),
        },
        Action::Read,
        &ctx,
        &state.policy,
    );
    if !readable {
        return Err(not_found());
    }

    Ok(Json(submission))
}
