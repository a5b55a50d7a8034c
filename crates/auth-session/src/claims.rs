//! Access token claims.
//!
//! Tokens are decoded without verifying their signature. The claims are only
//! used to read `exp` and to build the profile shown to the user; they are
//! never used for authorization decisions, which stay with the broker.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a token could not be decoded. Callers treat every variant as "expired".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is not a three-part compact JWT")]
    Malformed,

    #[error("token payload is not valid base64url: {0}")]
    Base64(String),

    #[error("token payload is not a JSON object: {0}")]
    Json(String),
}

/// Claims carried in an access token payload (or returned by the session endpoint).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Provider-side user id (GitHub ids are numeric).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(
        default,
        rename = "cookieExpiration",
        skip_serializing_if = "Option::is_none"
    )]
    pub cookie_expiration: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Subject, falling back to the provider id.
    pub fn subject(&self) -> Option<String> {
        if let Some(sub) = self.sub.as_ref().filter(|s| !s.is_empty()) {
            return Some(sub.clone());
        }
        match &self.id {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Profile fields the UI expects to be present.
    pub fn missing_profile_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.as_deref().map_or(true, str::is_empty) {
            missing.push("name");
        }
        if self.email.as_deref().map_or(true, str::is_empty) {
            missing.push("email");
        }
        if self.picture.as_deref().map_or(true, str::is_empty) {
            missing.push("picture");
        }
        missing
    }
}

/// The signed-in user, projected from the active token's claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub provider: Option<String>,
    /// Expiry of the token this user was derived from (unix seconds).
    pub exp: Option<i64>,
    /// Web only: when the session cookie lapses (unix seconds).
    #[serde(rename = "cookieExpiration")]
    pub cookie_expiration: Option<i64>,
}

impl AuthenticatedUser {
    /// Project claims into a user. Claims without a subject do not identify anyone.
    pub fn from_claims(claims: &Claims) -> Option<Self> {
        Some(Self {
            sub: claims.subject()?,
            name: claims.name.clone(),
            email: claims.email.clone(),
            picture: claims.picture.clone(),
            given_name: claims.given_name.clone(),
            family_name: claims.family_name.clone(),
            provider: claims.provider.clone(),
            exp: claims.exp,
            cookie_expiration: claims.cookie_expiration,
        })
    }
}

/// Stateless decoder for compact JWT access tokens.
pub struct TokenCodec;

impl TokenCodec {
    /// Decode the payload segment. The signature is not checked.
    pub fn decode(token: &str) -> Result<Claims, DecodeError> {
        let mut parts = token.trim().split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DecodeError::Malformed);
        };
        if payload.is_empty() {
            return Err(DecodeError::Malformed);
        }

        // Some encoders keep '=' padding; URL_SAFE_NO_PAD rejects it.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| DecodeError::Base64(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))
    }

    /// A token is expired once `exp <= now + skew`. Tokens without `exp` count as expired.
    pub fn is_expired(claims: &Claims, skew_secs: u64, now: i64) -> bool {
        match claims.exp {
            Some(exp) => exp <= now.saturating_add(skew_secs as i64),
            None => true,
        }
    }

    /// Decode and check expiry in one step. Decode failures count as expired.
    pub fn is_token_expired(token: &str, skew_secs: u64, now: i64) -> bool {
        Self::decode(token).map_or(true, |claims| Self::is_expired(&claims, skew_secs, now))
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
