//! The credential resolution chain.
//!
//! An explicit document in [`Settings`] always wins. Otherwise the probes
//! run in [`Probe::ORDER`] and the first one that finds a credential ends
//! the walk:
//!
//! 1. `GOOGLE_APPLICATION_CREDENTIALS` names a document. Any failure here is
//!    fatal, the user pointed at it explicitly.
//! 2. The well-known file. Absence declines, every other failure is fatal.
//! 3. A managed runtime identity, when its hooks are installed.
//! 4. The metadata service, when reachable.
//!
//! If all decline the result is [`Error::NotFound`]. A cancelled
//! [`CancellationToken`] aborts whichever probe is doing I/O and surfaces as
//! [`Error::Cancelled`], never as a decline.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapter::PerRpcCredentials;
use crate::config::{Config, OAuthConfig};
use crate::credentials::{
    CredentialSource, Credentials, credentials_from_json, jwt_access_token_source_from_json,
};
use crate::env::{Environment, SystemEnvironment};
use crate::error::{Error, Result};
use crate::metadata::{HttpMetadataClient, MetadataClient};
use crate::runtime::RuntimeHooks;
use crate::settings::Settings;
use crate::token::{CachedTokenSource, TokenSource};
use crate::well_known::{Platform, well_known_file};

/// Environment variable naming a credentials document.
pub const CREDENTIALS_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// One step of the discovery chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    EnvironmentVariable,
    WellKnownFile,
    ManagedRuntime,
    Metadata,
}

impl Probe {
    /// Order in which the probes run.
    pub const ORDER: [Probe; 4] = [
        Probe::EnvironmentVariable,
        Probe::WellKnownFile,
        Probe::ManagedRuntime,
        Probe::Metadata,
    ];
}

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        value = fut => Ok(value),
    }
}

/// Resolves credentials from the environment it was built with.
///
/// Every external dependency of the chain is injected, so tests can swap
/// in fakes for the process environment, the managed runtime and the
/// metadata service.
pub struct CredentialResolver {
    env: Arc<dyn Environment>,
    platform: Platform,
    runtime: RuntimeHooks,
    metadata: Arc<dyn MetadataClient>,
    oauth: OAuthConfig,
    http: reqwest::Client,
    strict_project_id: bool,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver {
    /// Resolver for the real process, configured from the environment.
    pub fn new() -> Self {
        Self::from_config(&Config::from_env())
    }

    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::new();
        let metadata = HttpMetadataClient::from_config(http.clone(), &config.metadata)
            .assume_present(config.env_overrides.is_overridden("metadata.host"));
        Self {
            env: Arc::new(SystemEnvironment),
            platform: Platform::current(),
            runtime: RuntimeHooks::none(),
            metadata: Arc::new(metadata),
            oauth: config.oauth.clone(),
            http,
            strict_project_id: config.resolver.strict_project_id,
        }
    }

    pub fn with_environment(mut self, env: impl Environment + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_runtime_hooks(mut self, hooks: RuntimeHooks) -> Self {
        self.runtime = hooks;
        self
    }

    pub fn with_metadata_client(mut self, client: impl MetadataClient + 'static) -> Self {
        self.metadata = Arc::new(client);
        self
    }

    /// HTTP client for token endpoints. The metadata client keeps its own.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_oauth_config(mut self, oauth: OAuthConfig) -> Self {
        self.oauth = oauth;
        self
    }

    /// Fail instead of degrading when the metadata project id lookup fails.
    pub fn with_strict_project_id(mut self, strict: bool) -> Self {
        self.strict_project_id = strict;
        self
    }

    /// Explicit document if present, else the discovery chain.
    #[instrument(skip_all, fields(scope = %settings.scope))]
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<Credentials> {
        if settings.has_explicit_credentials() {
            debug!("Using explicit credentials document");
            return cancellable(
                cancel,
                credentials_from_json(
                    &self.http,
                    &self.oauth,
                    settings.credentials_json.as_bytes(),
                    settings,
                    CredentialSource::Explicit,
                ),
            )
            .await?;
        }
        self.find_default_credentials(cancel, settings).await
    }

    /// The discovery chain alone, ignoring any explicit document.
    #[instrument(skip_all, fields(scope = %settings.scope))]
    pub async fn find_default_credentials(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<Credentials> {
        for probe in Probe::ORDER {
            debug!(?probe, "Trying credential probe");
            if let Some(creds) = self.run_probe(probe, cancel, settings).await? {
                info!(
                    source = %creds.source,
                    project_id = %creds.project_id,
                    "Resolved default credentials"
                );
                return Ok(creds);
            }
            debug!(?probe, "Probe declined");
        }
        Err(Error::NotFound)
    }

    async fn run_probe(
        &self,
        probe: Probe,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<Option<Credentials>> {
        match probe {
            Probe::EnvironmentVariable => self.probe_environment_variable(cancel, settings).await,
            Probe::WellKnownFile => self.probe_well_known_file(cancel, settings).await,
            Probe::ManagedRuntime => Ok(self.probe_managed_runtime(settings)),
            Probe::Metadata => self.probe_metadata(cancel).await,
        }
    }

    async fn probe_environment_variable(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<Option<Credentials>> {
        let Some(value) = self.env.var(CREDENTIALS_ENV_VAR).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let path = PathBuf::from(value);
        let source = CredentialSource::EnvironmentVariable(path.clone());
        match self.read_document(cancel, &path, settings, source).await {
            Ok(creds) => Ok(Some(creds)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Err(Error::EnvironmentVariable {
                var: CREDENTIALS_ENV_VAR,
                source: Box::new(e),
            }),
        }
    }

    async fn probe_well_known_file(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<Option<Credentials>> {
        let path = well_known_file(self.platform, self.env.as_ref());
        let source = CredentialSource::WellKnownFile(path.clone());
        match self.read_document(cancel, &path, settings, source).await {
            Ok(creds) => Ok(Some(creds)),
            Err(e) if e.is_not_found() => {
                debug!(path = %path.display(), "No well-known credentials file");
                Ok(None)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Err(Error::WellKnownFile {
                path,
                source: Box::new(e),
            }),
        }
    }

    fn probe_managed_runtime(&self, settings: &Settings) -> Option<Credentials> {
        if !self.runtime.available() {
            return None;
        }
        let token_source = self.runtime.token_source(&settings.scopes())?;
        Some(Credentials {
            project_id: self.runtime.app_id(),
            token_source,
            json: Vec::new(),
            source: CredentialSource::ManagedRuntime,
        })
    }

    async fn probe_metadata(&self, cancel: &CancellationToken) -> Result<Option<Credentials>> {
        if !cancellable(cancel, self.metadata.on_platform()).await? {
            return Ok(None);
        }

        let project_id = match cancellable(cancel, self.metadata.project_id()).await? {
            Ok(id) => id,
            Err(e) if self.strict_project_id => {
                return Err(Error::Metadata(format!("project id lookup failed: {e}")));
            }
            Err(e) => {
                warn!(error = %e, "Metadata project id lookup failed, continuing without it");
                String::new()
            }
        };

        Ok(Some(Credentials {
            project_id,
            token_source: Arc::new(CachedTokenSource::new(self.metadata.token_source(""))),
            json: Vec::new(),
            source: CredentialSource::Metadata,
        }))
    }

    #[instrument(skip(self, cancel, settings), fields(path = %path.display()))]
    async fn read_document(
        &self,
        cancel: &CancellationToken,
        path: &Path,
        settings: &Settings,
        source: CredentialSource,
    ) -> Result<Credentials> {
        let bytes = cancellable(cancel, self.env.read_file(path)).await??;
        cancellable(
            cancel,
            credentials_from_json(&self.http, &self.oauth, &bytes, settings, source),
        )
        .await?
    }

    // ── Entry points ────────────────────────────────────────────────────────

    /// Token source from the discovery chain for `scope`.
    pub async fn default_token_source(
        &self,
        cancel: &CancellationToken,
        scope: &str,
    ) -> Result<Arc<dyn TokenSource>> {
        let creds = self
            .find_default_credentials(cancel, &Settings::with_scope(scope))
            .await?;
        Ok(creds.token_source)
    }

    /// Token source of whatever [`resolve`](Self::resolve) finds.
    pub async fn oauth_json_token_source(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<Arc<dyn TokenSource>> {
        Ok(self.resolve(cancel, settings).await?.token_source)
    }

    /// Self-signed JWT source for `settings.audience`.
    ///
    /// Needs a service-account document; credentials from the managed
    /// runtime or the metadata service have none.
    pub async fn jwt_token_source(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<Arc<dyn TokenSource>> {
        if settings.audience.is_empty() {
            return Err(Error::config("an audience is required for JWT access tokens"));
        }
        let creds = self.resolve(cancel, settings).await?;
        if creds.json.is_empty() {
            return Err(Error::UnsupportedCredentialType {
                operation: "JWT access token",
                found: creds.source.to_string(),
            });
        }
        jwt_access_token_source_from_json(&creds.json, &settings.audience)
    }

    /// Per-call header provider over [`default_token_source`](Self::default_token_source).
    ///
    /// Only `settings.scope` is used. Credentials always come from discovery,
    /// never from an explicit document.
    pub async fn per_rpc_application_default(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
    ) -> Result<PerRpcCredentials> {
        let source = self.default_token_source(cancel, &settings.scope).await?;
        Ok(PerRpcCredentials::new(source))
    }

    /// Per-call header provider signing JWTs for `audience`.
    pub async fn per_rpc_jwt(
        &self,
        cancel: &CancellationToken,
        audience: &str,
    ) -> Result<PerRpcCredentials> {
        let settings = Settings::default().audience(audience);
        let source = self.jwt_token_source(cancel, &settings).await?;
        Ok(PerRpcCredentials::new(source))
    }
}
