//! Authentication and authorization
//!
//! Tokens are issued by the clinic's identity service; this crate only
//! validates them and turns the claims into a [`Principal`].

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use domain_billing::{Principal, Role};

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Display name stamped on audit rows
    pub name: String,
    /// `admin` or `encoder`
    pub role: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    pub iat: i64,
}

impl Claims {
    /// The acting user described by these claims
    pub fn principal(&self) -> Result<Principal, AuthError> {
        let role: Role = self
            .role
            .parse()
            .map_err(|_| AuthError::UnknownRole(self.role.clone()))?;
        Ok(Principal::new(self.sub.clone(), self.name.clone(), role))
    }
}

/// Auth errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Unknown role: {0}")]
    UnknownRole(String),
    #[error("Missing permission: {0}")]
    MissingPermission(String),
}

/// Creates a signed token for `principal`
///
/// Used by tests and local tooling; production tokens come from the identity
/// service.
pub fn create_token(principal: &Principal, secret: &str, expiration_secs: u64) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(expiration_secs as i64);

    let claims = Claims {
        sub: principal.id.clone(),
        name: principal.name.clone(),
        role: principal.role.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|_| AuthError::InvalidToken)
}

/// Validates a JWT token
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    Ok(token_data.claims)
}

/// Admin-only operations: archive, audit deletion
pub fn require_admin(principal: &Principal, action: &str) -> Result<(), AuthError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(AuthError::MissingPermission(format!("{} requires the admin role", action)))
    }
}
