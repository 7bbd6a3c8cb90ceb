//! Security event audit endpoints.
//!
//! Callers must be super admin of at least one institution. They see events
//! they authored and events whose details name one of their institutions.

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::SecurityEventsQuery;
use crate::middleware::{AuthUser, ClientIp};
use crate::models::{SecurityEventType, User};
use crate::services::repository::{DirectoryRepository, EventAudience, EventFilter};
use crate::services::InvitationError;
use crate::services::security_events::{AlertSummary, SecurityEventPage};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 100;

async fn security_audience(
    state: &AppState,
    user: &User,
    ip: Option<String>,
    action: &str,
) -> Result<EventAudience, AppError> {
    let institution_ids = state.repo.super_admin_institution_ids(user.id).await?;

    if institution_ids.is_empty() {
        state
            .events
            .log(
                SecurityEventType::InsufficientPrivileges,
                Some(user.id),
                ip,
                json!({ "action": action }),
            )
            .await;
        return Err(InvitationError::AuthorizationDenied.into());
    }

    Ok(EventAudience {
        user_id: user.id,
        institution_ids,
        include_unattributed: false,
    })
}

fn scoped_filter(query: &SecurityEventsQuery, audience: EventAudience) -> EventFilter {
    EventFilter {
        audience: Some(audience),
        ..query.filter()
    }
}

/// Paginated audit log, newest first.
///
/// GET /security_events
#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn list_security_events(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Query(query): Query<SecurityEventsQuery>,
) -> Result<Json<SecurityEventPage>, AppError> {
    query.validate()?;
    let audience = security_audience(&state, &user, ip, "list_security_events").await?;

    let page = state
        .events
        .query(
            &scoped_filter(&query, audience),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(page))
}

/// Every matching event as a streamed CSV attachment.
///
/// GET /security_events/export
#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn export_security_events(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
    Query(query): Query<SecurityEventsQuery>,
) -> Result<Response, AppError> {
    query.validate()?;
    let audience = security_audience(&state, &user, ip.clone(), "export_security_events").await?;

    state
        .events
        .log(
            SecurityEventType::SecurityEventsExported,
            Some(user.id),
            ip,
            json!({
                "filter": {
                    "user_id": query.user_id.map(|u| u.to_string()),
                    "event_type": query.event_type.map(|t| t.as_str()),
                    "from": query.from.map(|t| t.to_rfc3339()),
                    "to": query.to.map(|t| t.to_rfc3339()),
                },
            }),
        )
        .await;

    let stream = state.events.export(scoped_filter(&query, audience));
    let filename = format!(
        "attachment; filename=\"security_events_{}.csv\"",
        Utc::now().format("%Y%m%d%H%M%S")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Per-type counts over the trailing window with threshold alerts.
///
/// GET /security_events/alerts
#[tracing::instrument(skip_all, fields(user_id = %user.id))]
pub async fn security_alerts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ClientIp(ip): ClientIp,
) -> Result<Json<AlertSummary>, AppError> {
    let audience = security_audience(&state, &user, ip, "security_alerts").await?;
    let summary = state.events.alert_summary(Some(audience), Utc::now()).await?;

    if !summary.alerts.is_empty() {
        tracing::warn!(alerts = summary.alerts.len(), "Security alert thresholds reached");
    }

    Ok(Json(summary))
}
