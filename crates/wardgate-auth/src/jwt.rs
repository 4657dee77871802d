//! Identity token validation
//!
//! Devices log in with a JWT from the identity provider. The control plane
//! only needs three things from it: who the user is, which groups they are
//! in, and whether the token is still valid.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by an identity token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityClaims {
    /// Subject: the user's object id at the identity provider
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl IdentityClaims {
    pub fn new(object_id: impl Into<String>, validity: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: object_id.into(),
            iat: now.timestamp(),
            exp: (now + validity).timestamp(),
            preferred_username: String::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.preferred_username = username.into();
        self
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// The parts of a validated token the control plane acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub object_id: String,
    pub username: String,
    pub groups: Vec<String>,
}

impl From<IdentityClaims> for Identity {
    fn from(claims: IdentityClaims) -> Self {
        Self {
            object_id: claims.sub,
            username: claims.preferred_username,
            groups: claims.groups,
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token has no subject")]
    MissingSubject,
}

/// Turns a bearer token into an [`Identity`]
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, JwtError>;
}

/// HS256 validator for tokens minted with a shared secret
pub struct JwtTokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.validate_nbf = false;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn claims(&self, token: &str) -> Result<IdentityClaims, JwtError> {
        let data = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)?;

        if data.claims.is_expired() {
            return Err(JwtError::TokenExpired);
        }
        if data.claims.sub.is_empty() {
            return Err(JwtError::MissingSubject);
        }

        Ok(data.claims)
    }

    /// Mint a token; used by the CLI for local setups and by tests
    pub fn encode(secret: &[u8], claims: &IdentityClaims) -> Result<String, JwtError> {
        let header = Header::new(Algorithm::HS256);
        Ok(encode(&header, claims, &EncodingKey::from_secret(secret))?)
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<Identity, JwtError> {
        let claims = self.claims(token)?;
        tracing::debug!(object_id = %claims.sub, groups = claims.groups.len(), "validated identity token");
        Ok(claims.into())
    }
}
