//! Gateway-asserted request context.
//!
//! The trusted gateway sends the context as JSON in `X-Access-Context` and a
//! hex HMAC-SHA256 of that exact header value in `X-Access-Context-Signature`.
//! A verified context lives only in this request's extensions.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use service_core::utils::signature::verify_payload;

use crate::services::RequestContext;
use crate::AppState;

pub const ACCESS_CONTEXT_HEADER: &str = "x-access-context";
pub const ACCESS_CONTEXT_SIGNATURE_HEADER: &str = "x-access-context-signature";

pub async fn access_context_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(context) = verified_context(req.headers(), state.config.access_context.secret.as_deref())? {
        tracing::debug!(
            partnerships = context.accessible_partnership_ids.len(),
            "Request context attached"
        );
        req.extensions_mut().insert(context);
    }

    Ok(next.run(req).await)
}

fn get_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid {} header", name)))
        })
        .transpose()
}

/// `Ok(None)` when no context was sent; an error when one was sent but cannot
/// be trusted.
fn verified_context(headers: &HeaderMap, secret: Option<&str>) -> Result<Option<RequestContext>, AppError> {
    let Some(payload) = get_header(headers, ACCESS_CONTEXT_HEADER)? else {
        return Ok(None);
    };

    let Some(secret) = secret else {
        tracing::warn!("Request context received but no access context secret is configured");
        return Err(AppError::AuthError(anyhow::anyhow!("Untrusted request context")));
    };

    let signature = get_header(headers, ACCESS_CONTEXT_SIGNATURE_HEADER)?
        .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing request context signature")))?;

    let is_valid = verify_payload(secret, payload, signature)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Signature verification error: {}", e)))?;

    if !is_valid {
        tracing::warn!("Request context signature mismatch");
        return Err(AppError::AuthError(anyhow::anyhow!("Invalid request context signature")));
    }

    let context = serde_json::from_str::<RequestContext>(payload)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed request context: {}", e)))?;

    Ok(Some(context))
}
