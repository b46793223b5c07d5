//! Service-account token sources.
//!
//! Two ways to turn a service-account key into tokens:
//!
//! - [`ServiceAccountTokenSource`] signs a JWT assertion and trades it at
//!   the token endpoint for an OAuth2 access token limited to a set of
//!   scopes (RFC 7523 JWT-bearer grant).
//! - [`JwtAccessTokenSource`] signs a JWT for a single audience and uses it
//!   directly as the bearer token, with no network round trip.
//!
//! The private key is parsed when a token is minted, not when the source is
//! built, so a document with a bad key still resolves and fails on first use.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::endpoint::request_token;
use super::{Token, TokenSource};
use crate::error::Result;

/// Grant type for exchanging a signed assertion (RFC 7523).
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of every JWT we sign.
const JWT_LIFETIME_SECS: i64 = 3600;

/// Key material from a `service_account` credentials document.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    /// Token endpoint declared by the key, overriding the configured one.
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"[redacted]")
            .field("client_email", &self.client_email)
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Sign `claims` with RS256, tagging the header with the key id.
    fn sign<C: Serialize>(&self, claims: &C) -> Result<String> {
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;
        let mut header = Header::new(Algorithm::RS256);
        if !self.private_key_id.is_empty() {
            header.kid = Some(self.private_key_id.clone());
        }
        Ok(jsonwebtoken::encode(&header, claims, &encoding_key)?)
    }
}

/// Claims of the assertion sent to the token endpoint.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Claims of a self-signed JWT access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtAccessClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// OAuth2 access tokens for a service account via the JWT-bearer grant.
pub struct ServiceAccountTokenSource {
    http: reqwest::Client,
    key: Arc<ServiceAccountKey>,
    scopes: Vec<String>,
    token_url: String,
}

impl ServiceAccountTokenSource {
    /// `default_token_url` is used unless the key declares its own `token_uri`.
    pub fn new(
        http: reqwest::Client,
        key: Arc<ServiceAccountKey>,
        scopes: Vec<String>,
        default_token_url: &str,
    ) -> Self {
        let token_url = key
            .token_uri
            .clone()
            .filter(|uri| !uri.is_empty())
            .unwrap_or_else(|| default_token_url.to_string());
        Self {
            http,
            key,
            scopes,
            token_url,
        }
    }

    /// Endpoint the assertion is exchanged at.
    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    #[instrument(skip(self), fields(client_email = %self.key.client_email))]
    async fn token(&self) -> Result<Token> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: self.scopes.join(" "),
            aud: &self.token_url,
            iat,
            exp: iat + JWT_LIFETIME_SECS,
        };
        let assertion = self.key.sign(&claims)?;

        debug!("Exchanging service account assertion for access token");
        request_token(
            &self.http,
            &self.token_url,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)],
        )
        .await
    }
}

/// Self-signed JWTs bound to a single audience.
pub struct JwtAccessTokenSource {
    key: Arc<ServiceAccountKey>,
    audience: String,
}

impl JwtAccessTokenSource {
    pub fn new(key: Arc<ServiceAccountKey>, audience: impl Into<String>) -> Self {
        Self {
            key,
            audience: audience.into(),
        }
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }
}

#[async_trait]
impl TokenSource for JwtAccessTokenSource {
    #[instrument(skip(self), fields(audience = %self.audience))]
    async fn token(&self) -> Result<Token> {
        let iat = Utc::now().timestamp();
        let exp = iat + JWT_LIFETIME_SECS;
        let claims = JwtAccessClaims {
            iss: self.key.client_email.clone(),
            sub: self.key.client_email.clone(),
            aud: self.audience.clone(),
            iat,
            exp,
        };
        let jwt = self.key.sign(&claims)?;
        Ok(Token::with_expires_at(jwt, Some(exp)))
    }
}
