pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::InvitationServiceConfig;
use crate::middleware::access_context::{ACCESS_CONTEXT_HEADER, ACCESS_CONTEXT_SIGNATURE_HEADER};
use crate::services::{
    AbilityPolicy, AlertThresholds, InvitationMailer, InvitationService, InvitationSettings,
    JwtService, PendingTokenStore, Repositories, SecurityEventLog,
};

#[derive(Clone)]
pub struct AppState {
    pub config: InvitationServiceConfig,
    pub repo: Arc<dyn Repositories>,
    pub token_store: Arc<dyn PendingTokenStore>,
    pub jwt: JwtService,
    pub invitations: InvitationService,
    pub events: SecurityEventLog,
    pub policy: AbilityPolicy,
    pub acceptance_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the services over the given backends.
    pub fn new(
        config: InvitationServiceConfig,
        repo: Arc<dyn Repositories>,
        token_store: Arc<dyn PendingTokenStore>,
        mailer: Arc<dyn InvitationMailer>,
        jwt: JwtService,
    ) -> Self {
        let events = SecurityEventLog::new(repo.clone(), AlertThresholds::from(&config.alerts));
        let invitations = InvitationService::new(
            repo.clone(),
            token_store.clone(),
            mailer,
            events.clone(),
            InvitationSettings::from(&config.invitation),
        );
        let policy = AbilityPolicy {
            global_partnership_id: config.access_context.global_partnership_id,
        };
        let acceptance_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.acceptance_attempts,
            config.rate_limit.acceptance_window_seconds,
        );

        Self {
            config,
            repo,
            token_store,
            jwt,
            invitations,
            events,
            policy,
            acceptance_rate_limiter,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Manager and security-admin routes need a session
    let session_routes = Router::new()
        .route(
            "/invitations",
            post(handlers::create_invitation).get(handlers::list_invitations),
        )
        .route("/invitations/:id", delete(handlers::revoke_invitation))
        .route("/security_events", get(handlers::list_security_events))
        .route(
            "/security_events/export",
            get(handlers::export_security_events),
        )
        .route("/security_events/alerts", get(handlers::security_alerts))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Acceptance is throttled per IP; accepting also needs a session
    let acceptance_limiter = state.acceptance_rate_limiter.clone();
    let acceptance_routes = Router::new()
        .route(
            "/invitation_acceptance/validate",
            get(handlers::validate_token),
        )
        .merge(
            Router::new()
                .route("/invitation_acceptance", post(handlers::accept_invitation))
                .layer(from_fn_with_state(
                    state.clone(),
                    middleware::auth_middleware,
                )),
        )
        .layer(from_fn_with_state(
            acceptance_limiter,
            ip_rate_limit_middleware,
        ));

    // Session and gateway context are both optional here; the extractor
    // requires at least one
    let catalog_routes = Router::new()
        .route("/templates", get(handlers::list_templates))
        .route("/templates/:id", get(handlers::get_template))
        .route("/submissions/:id", get(handlers::get_submission))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::optional_auth_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::access_context_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(session_routes)
        .merge(acceptance_routes)
        .merge(catalog_routes)
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(ACCESS_CONTEXT_HEADER),
            HeaderName::from_static(ACCESS_CONTEXT_SIGNATURE_HEADER),
        ])
}

/// Service health check
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.repo.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::ServiceUnavailable
    })?;

    state.token_store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Token store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up",
            "token_store": "up"
        }
    })))
}
