use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use service_core::middleware::rate_limit::client_ip;
use std::convert::Infallible;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::dtos::ErrorResponse;
use crate::models::{InstitutionGrant, User};
use crate::services::repository::DirectoryRepository;
use crate::services::{AccessContext, RequestContext};
use crate::AppState;

type Rejection = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, message: &str) -> Rejection {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

/// Session principal loaded by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: User,
    pub grants: Vec<InstitutionGrant>,
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Option<Authenticated>, Rejection> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header"))?;

    let claims = state
        .jwt
        .validate_access_token(token)
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Invalid or expired token"))?;

    let user = state
        .repo
        .find_user(user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load session user");
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        })?
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Unknown user"))?;

    let grants = state.repo.grants_for_user(user.id).await.map_err(|e| {
        tracing::error!(error = %e, user_id = %user.id, "Failed to load institution grants");
        reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })?;

    Ok(Some(Authenticated { user, grants }))
}

/// Middleware to require a bearer session.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, Rejection> {
    let principal = authenticate(&state, req.headers())
        .await?
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header"))?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Like [`auth_middleware`], but lets requests without an Authorization
/// header through. A header that is present must still be valid.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, Rejection> {
    if let Some(principal) = authenticate(&state, req.headers()).await? {
        req.extensions_mut().insert(principal);
    }
    Ok(next.run(req).await)
}

/// Extractor for the session user.
pub struct AuthUser(pub User);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<Authenticated>().ok_or_else(|| {
            reject(StatusCode::UNAUTHORIZED, "Authentication required")
        })?;

        Ok(AuthUser(principal.user.clone()))
    }
}

/// Builds the per-request [`AccessContext`] from whatever principals the
/// middleware stack established. At least one of session or gateway context
/// is required.
#[axum::async_trait]
impl<S> FromRequestParts<S> for AccessContext
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<Authenticated>().cloned();
        let request_context = parts.extensions.get::<RequestContext>().cloned();

        let ctx = match principal {
            Some(Authenticated { user, grants }) => AccessContext::for_user(user, grants),
            None if request_context.is_some() => AccessContext::default(),
            None => return Err(reject(StatusCode::UNAUTHORIZED, "Authentication required")),
        };

        Ok(ctx.with_request_context(request_context))
    }
}

/// Caller address for audit records, as seen by the IP rate limiter.
pub struct ClientIp(pub Option<String>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = client_ip(
            &parts.headers,
            parts.extensions.get::<ConnectInfo<SocketAddr>>(),
        );
        Ok(ClientIp(ip.map(|ip| ip.to_string())))
    }
}
