//! Access tokens and the token-source capability.
//!
//! A [`TokenSource`] yields a currently valid [`Token`]. Concrete sources
//! mint or fetch a fresh token on every call; [`CachedTokenSource`] wraps
//! one and only goes back to it when the cached token is about to expire.
//!
//! - [`service_account`] - JWT-bearer grant and self-signed JWT access tokens
//! - [`authorized_user`] - refresh-token grant and the consent code exchange
//! - [`crate::metadata::ComputeTokenSource`] - metadata-service tokens

pub mod authorized_user;
mod endpoint;
pub mod service_account;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::Result;

/// Safety margin for token expiry checks (60 seconds).
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// An OAuth2 access token (or a self-signed JWT used as one).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The bearer credential sent to APIs.
    pub access_token: String,

    /// Token type, typically "Bearer".
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Unix timestamp when the access token expires, if known.
    pub expires_at: Option<i64>,

    /// Refresh token returned alongside the access token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl Token {
    /// Create a bearer token that expires `expires_in` seconds from now.
    ///
    /// A lifetime too large to represent is treated as no expiry.
    pub fn new(access_token: String, expires_in: Option<i64>) -> Self {
        let expires_at = expires_in.and_then(|ei| Utc::now().timestamp().checked_add(ei));
        Self::with_expires_at(access_token, expires_at)
    }

    /// Create a bearer token with a specific expiration timestamp.
    pub fn with_expires_at(access_token: String, expires_at: Option<i64>) -> Self {
        Self {
            access_token,
            token_type: default_token_type(),
            expires_at,
            refresh_token: None,
        }
    }

    /// Attach the refresh token the endpoint handed back.
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// Check if the access token is expired or about to expire.
    ///
    /// Returns `true` if the token has expired or will expire within
    /// the safety margin (60 seconds). A token without an expiry never
    /// expires; an empty access token is always expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(exp) => exp <= Utc::now().timestamp() + EXPIRY_SAFETY_MARGIN_SECS,
            None => false,
        }
    }

    /// Expiry as a timestamp, if known.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Get the duration until the access token expires.
    ///
    /// Returns `Duration::ZERO` if the token has already expired or has no expiry set.
    pub fn time_until_expiry(&self) -> Duration {
        match self.expires_at {
            Some(exp) => {
                let remaining = exp - Utc::now().timestamp();
                if remaining > 0 {
                    Duration::from_secs(remaining as u64)
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Value for an `Authorization` header, e.g. `Bearer ya29...`.
    pub fn header_value(&self) -> String {
        let kind = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", kind, self.access_token)
    }
}

/// Capability that yields a currently valid access token.
///
/// Implementations decide how a token is obtained; callers never look
/// behind the trait.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a valid token, refreshing if necessary.
    async fn token(&self) -> Result<Token>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    async fn token(&self) -> Result<Token> {
        (**self).token().await
    }
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    async fn token(&self) -> Result<Token> {
        (**self).token().await
    }
}

/// Always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: Token,
}

impl StaticTokenSource {
    pub fn new(token: Token) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<Token> {
        Ok(self.token.clone())
    }
}

/// Reuses a token until it expires, then asks the inner source for a new one.
///
/// Thread-safe: concurrent callers that find the token stale serialize on
/// a write lock and only the first of them refreshes.
pub struct CachedTokenSource {
    inner: Arc<dyn TokenSource>,
    current: RwLock<Option<Token>>,
}

impl CachedTokenSource {
    /// Wrap `inner` with an empty cache.
    pub fn new(inner: Arc<dyn TokenSource>) -> Self {
        Self {
            inner,
            current: RwLock::new(None),
        }
    }

    /// Wrap `inner`, seeding the cache with a token obtained elsewhere.
    pub fn with_token(inner: Arc<dyn TokenSource>, token: Token) -> Self {
        Self {
            inner,
            current: RwLock::new(Some(token)),
        }
    }

    /// Convenience for building an `Arc<dyn TokenSource>` around a fetcher.
    pub fn wrap<S: TokenSource + 'static>(inner: S) -> Arc<dyn TokenSource> {
        Arc::new(Self::new(Arc::new(inner)))
    }
}

#[async_trait]
impl TokenSource for CachedTokenSource {
    #[instrument(skip(self))]
    async fn token(&self) -> Result<Token> {
        {
            let current = self.current.read().await;
            if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
                return Ok(token.clone());
            }
        }

        let mut current = self.current.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.clone());
        }

        debug!("Cached token missing or stale, refreshing");
        let fresh = self.inner.token().await?;
        *current = Some(fresh.clone());
        Ok(fresh)
    }
}
