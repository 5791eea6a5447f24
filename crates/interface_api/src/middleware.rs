//! API middleware

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

use domain_billing::Principal;

use crate::AppState;

/// Authentication middleware
///
/// Validates the bearer token and stores the caller's [`Principal`] in the
/// request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        warn!("Missing or invalid Authorization header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let principal = crate::auth::validate_token(token, &state.config.jwt_secret)
        .and_then(|claims| claims.principal())
        .map_err(|e| {
            warn!(error = %e, "Token validation failed");
            StatusCode::UNAUTHORIZED
        })?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Request audit middleware
///
/// One structured log line per API request.
pub async fn audit_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let (user, role) = request
        .extensions()
        .get::<Principal>()
        .map(|p| (p.id.clone(), p.role.as_str()))
        .unwrap_or_else(|| ("anonymous".to_string(), "none"));

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status();

    info!(
        method = %method,
        uri = %uri,
        user = %user,
        role,
        status = status.as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "API request"
    );

    response
}
