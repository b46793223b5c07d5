//! Attaching tokens to outgoing calls.
//!
//! Both adapters forward to the wrapped [`TokenSource`] on every call, so
//! whatever caching or refreshing it does is kept as is.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};

use crate::error::{Error, Result};
use crate::token::TokenSource;

/// Trait for authenticating HTTP requests.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Authenticate the request builder.
    async fn authenticate(&self, request: reqwest::RequestBuilder)
    -> Result<reqwest::RequestBuilder>;
}

/// Sets `Authorization: Bearer <token>` on reqwest requests.
#[derive(Clone)]
pub struct BearerAuth {
    source: Arc<dyn TokenSource>,
}

impl BearerAuth {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl AuthProvider for BearerAuth {
    async fn authenticate(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        let token = self.source.token().await?;
        let mut value = HeaderValue::from_str(&token.header_value())
            .map_err(|e| Error::TokenExchange(format!("token is not a valid header value: {e}")))?;
        value.set_sensitive(true);
        Ok(request.header(AUTHORIZATION, value))
    }
}

/// Per-call request metadata for RPC transports.
///
/// Yields `{"authorization": "Bearer <token>"}` for every call and demands a
/// secure transport, since the metadata carries a bearer credential.
#[derive(Clone)]
pub struct PerRpcCredentials {
    source: Arc<dyn TokenSource>,
}

impl PerRpcCredentials {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }

    /// The wrapped token source.
    pub fn token_source(&self) -> &Arc<dyn TokenSource> {
        &self.source
    }

    /// Metadata to attach to the next call.
    pub async fn request_metadata(&self) -> Result<HashMap<String, String>> {
        let token = self.source.token().await?;
        Ok(HashMap::from([(
            "authorization".to_string(),
            token.header_value(),
        )]))
    }

    pub fn require_transport_security(&self) -> bool {
        true
    }
}
