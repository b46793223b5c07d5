//! Application default credentials.
//!
//! Finds credentials for the current process without the caller handing
//! over keys: an explicit document, the file named by
//! `GOOGLE_APPLICATION_CREDENTIALS`, the user's well-known file, a managed
//! runtime identity, or the metadata service, in that order. Whatever is
//! found comes back as a uniform [`TokenSource`].
//!
//! ```no_run
//! # async fn demo() -> ambient_auth::Result<()> {
//! use ambient_auth::{CancellationToken, Settings};
//!
//! let cancel = CancellationToken::new();
//! let settings = Settings::with_scope("https://www.googleapis.com/auth/cloud-platform");
//! let creds = ambient_auth::resolve(&cancel, &settings).await?;
//! let token = creds.token_source.token().await?;
//! println!("{} from {}", token.header_value(), creds.source);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod credentials;
pub mod env;
pub mod error;
pub mod metadata;
pub mod pkce;
pub mod resolver;
pub mod runtime;
pub mod settings;
pub mod token;
pub mod well_known;

use std::sync::Arc;

pub use adapter::{AuthProvider, BearerAuth, PerRpcCredentials};
pub use credentials::{CredentialSource, Credentials, CredentialsFile};
pub use error::{Error, Result};
pub use resolver::{CREDENTIALS_ENV_VAR, CredentialResolver, Probe};
pub use settings::Settings;
pub use token::{Token, TokenSource};
pub use tokio_util::sync::CancellationToken;

/// [`CredentialResolver::resolve`] with the default resolver.
///
/// The free functions in this module build a fresh resolver from
/// [`Config::from_env`](config::Config::from_env) on every call, so they read
/// the `AMBIENT_AUTH_*` and `GCE_METADATA_HOST` process variables even when an
/// explicit document is supplied. Only [`CredentialResolver::resolve`] with an
/// injected [`Environment`](env::Environment) leaves the environment untouched.
pub async fn resolve(cancel: &CancellationToken, settings: &Settings) -> Result<Credentials> {
    CredentialResolver::new().resolve(cancel, settings).await
}

/// [`CredentialResolver::find_default_credentials`] with the default resolver.
pub async fn find_default_credentials(
    cancel: &CancellationToken,
    settings: &Settings,
) -> Result<Credentials> {
    CredentialResolver::new()
        .find_default_credentials(cancel, settings)
        .await
}

/// [`CredentialResolver::default_token_source`] with the default resolver.
pub async fn default_token_source(
    cancel: &CancellationToken,
    scope: &str,
) -> Result<Arc<dyn TokenSource>> {
    CredentialResolver::new()
        .default_token_source(cancel, scope)
        .await
}

/// [`CredentialResolver::oauth_json_token_source`] with the default resolver.
pub async fn oauth_json_token_source(
    cancel: &CancellationToken,
    settings: &Settings,
) -> Result<Arc<dyn TokenSource>> {
    CredentialResolver::new()
        .oauth_json_token_source(cancel, settings)
        .await
}

/// [`CredentialResolver::jwt_token_source`] with the default resolver.
pub async fn jwt_token_source(
    cancel: &CancellationToken,
    settings: &Settings,
) -> Result<Arc<dyn TokenSource>> {
    CredentialResolver::new().jwt_token_source(cancel, settings).await
}

/// [`CredentialResolver::per_rpc_application_default`] with the default resolver.
pub async fn per_rpc_application_default(
    cancel: &CancellationToken,
    settings: &Settings,
) -> Result<PerRpcCredentials> {
    CredentialResolver::new()
        .per_rpc_application_default(cancel, settings)
        .await
}

/// [`CredentialResolver::per_rpc_jwt`] with the default resolver.
pub async fn per_rpc_jwt(cancel: &CancellationToken, audience: &str) -> Result<PerRpcCredentials> {
    CredentialResolver::new().per_rpc_jwt(cancel, audience).await
}
