//! Metadata service client.
//!
//! Compute instances expose their identity on a link-local HTTP service.
//! The resolver only needs three things from it: whether it is there at
//! all, the project id, and a token source for the instance's service
//! account.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::config::MetadataConfig;
use crate::error::{Error, Result};
use crate::token::{Token, TokenSource};

/// Header every metadata request and response carries.
const METADATA_FLAVOR: &str = "Metadata-Flavor";
const METADATA_FLAVOR_VALUE: &str = "Google";

/// Hostname resolvable only on the platform.
const METADATA_HOSTNAME: &str = "metadata.google.internal";

/// Account used when none is named.
const DEFAULT_ACCOUNT: &str = "default";

#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Whether a metadata service is reachable.
    async fn on_platform(&self) -> bool;

    /// Project id of the instance.
    async fn project_id(&self) -> Result<String>;

    /// Token source for a service account, the default one when `account` is empty.
    fn token_source(&self, account: &str) -> Arc<dyn TokenSource>;
}

#[async_trait]
impl<T: MetadataClient + ?Sized> MetadataClient for Arc<T> {
    async fn on_platform(&self) -> bool {
        (**self).on_platform().await
    }

    async fn project_id(&self) -> Result<String> {
        (**self).project_id().await
    }

    fn token_source(&self, account: &str) -> Arc<dyn TokenSource> {
        (**self).token_source(account)
    }
}

/// Metadata client over HTTP.
pub struct HttpMetadataClient {
    http: reqwest::Client,
    host: String,
    detect_timeout: Duration,
    assume_present: bool,
    detected: OnceCell<bool>,
}

impl HttpMetadataClient {
    pub fn new(http: reqwest::Client, host: impl Into<String>, detect_timeout: Duration) -> Self {
        Self {
            http,
            host: host.into(),
            detect_timeout,
            assume_present: false,
            detected: OnceCell::new(),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &MetadataConfig) -> Self {
        Self::new(
            http,
            config.host.clone(),
            Duration::from_millis(config.detect_timeout_ms),
        )
    }

    /// Skip detection and report the service as present.
    ///
    /// Used when the host was set explicitly, e.g. through `GCE_METADATA_HOST`.
    pub fn assume_present(mut self, assume: bool) -> Self {
        self.assume_present = assume;
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!("http://{}/computeMetadata/v1/{suffix}", self.host)
    }

    /// Probe the service root and the platform DNS name, first success wins.
    async fn detect(&self) -> bool {
        let root = format!("http://{}", self.host);
        let http = self.http.clone();
        let http_probe: Pin<Box<dyn Future<Output = std::result::Result<(), ()>> + Send>> =
            Box::pin(async move {
                let resp = http.get(&root).send().await.map_err(|_| ())?;
                let flavor = resp
                    .headers()
                    .get(METADATA_FLAVOR)
                    .and_then(|v| v.to_str().ok());
                if flavor == Some(METADATA_FLAVOR_VALUE) {
                    Ok(())
                } else {
                    Err(())
                }
            });
        let dns_probe: Pin<Box<dyn Future<Output = std::result::Result<(), ()>> + Send>> =
            Box::pin(async {
                let mut addrs = tokio::net::lookup_host((METADATA_HOSTNAME, 80))
                    .await
                    .map_err(|_| ())?;
                addrs.next().map(|_| ()).ok_or(())
            });

        let probes = futures::future::select_ok([http_probe, dns_probe]);
        matches!(
            tokio::time::timeout(self.detect_timeout, probes).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    #[instrument(skip(self), fields(host = %self.host))]
    async fn on_platform(&self) -> bool {
        if self.assume_present {
            return true;
        }
        let present = *self.detected.get_or_init(|| self.detect()).await;
        debug!(present, "Metadata service detection");
        present
    }

    #[instrument(skip(self))]
    async fn project_id(&self) -> Result<String> {
        let resp = self
            .http
            .get(self.url("project/project-id"))
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Metadata(format!("project id lookup returned {status}")));
        }
        let id = resp.text().await?.trim().to_string();
        if id.is_empty() {
            return Err(Error::Metadata("empty project id".to_string()));
        }
        Ok(id)
    }

    fn token_source(&self, account: &str) -> Arc<dyn TokenSource> {
        let account = if account.is_empty() { DEFAULT_ACCOUNT } else { account };
        Arc::new(ComputeTokenSource {
            http: self.http.clone(),
            url: self.url(&format!("instance/service-accounts/{account}/token")),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Access tokens for an instance service account.
pub struct ComputeTokenSource {
    http: reqwest::Client,
    url: String,
}

#[async_trait]
impl TokenSource for ComputeTokenSource {
    #[instrument(skip(self))]
    async fn token(&self) -> Result<Token> {
        debug!("Fetching token from metadata service");
        let resp = self
            .http
            .get(&self.url)
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Metadata(format!("token request returned {status}: {body}")));
        }

        let body: MetadataTokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Metadata(format!("invalid token response: {e}")))?;
        if body.access_token.is_empty() {
            return Err(Error::Metadata("empty access token".to_string()));
        }

        let mut token = Token::new(body.access_token, body.expires_in);
        if let Some(token_type) = body.token_type.filter(|t| !t.is_empty()) {
            token.token_type = token_type;
        }
        Ok(token)
    }
}
