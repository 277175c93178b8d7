use std::time::Duration;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use chrono::Utc;
use common::UserId;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::domain::User;
use crate::error::AppError;

/// Bearer-token claims. Threaded explicitly through handlers rather than
/// attached to a request object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub email: String,
    pub iat: usize,
    pub exp: usize,
}

/// HS256 signing and verification keys.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_in: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, expires_in: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expires_in,
        }
    }

    /// Token lifetime in seconds, surfaced in login responses.
    pub fn expires_in_secs(&self) -> u64 {
        self.expires_in.as_secs()
    }

    /// Signs an access token for a user.
    pub fn sign(&self, user: &User) -> Result<String, AppError> {
        let iat = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            iat,
            exp: iat + self.expires_in.as_secs() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }

    /// Verifies a token and returns its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;
        Ok(data.claims)
    }
}

/// Extractor for the authenticated principal on bearer-guarded routes.
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".to_string()))?;

        let claims = keys.verify(token)?;
        Ok(AuthUser(claims))
    }
}
