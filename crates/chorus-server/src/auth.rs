//! Upgrade authentication.
//!
//! The WebSocket upgrade must carry an HS256 token whose `username` claim
//! names the connecting user, either as `Authorization: Bearer <token>` or,
//! for clients that cannot set headers, as the `token` query parameter.

use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an upgrade request was rejected.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token in the header or query string.
    #[error("missing bearer token")]
    MissingToken,
    /// The token failed verification.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Turns an upgrade request into a verified username.
pub trait Authenticator: Send + Sync {
    /// Verify the request and return the username it carries.
    ///
    /// `query_token` is the decoded `token` query parameter, if present.
    fn authenticate(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    username: String,
    exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
}

/// HS256 JWT verification with a shared secret.
pub struct JwtAuthenticator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl JwtAuthenticator {
    /// Verify tokens signed with `secret`, optionally requiring `issuer`.
    pub fn new(secret: &str, issuer: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(ref iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
        }
    }

    /// Sign a token for `username` valid for `ttl`.
    pub fn issue(&self, username: &str, ttl: Duration) -> Result<String, AuthError> {
        let exp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default() + ttl.as_secs();
        let claims = Claims {
            username: username.to_owned(),
            exp,
            iss: self.issuer.clone(),
        };
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims.username)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<String, AuthError> {
        let token = bearer_token(headers)
            .or_else(|| query_token.filter(|t| !t.is_empty()))
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
