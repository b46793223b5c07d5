//! Resolved credentials and the document-to-token-source dispatch.

mod file;

pub use file::CredentialsFile;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::token::authorized_user::{AuthorizedUserTokenSource, obtain_refresh_token};
use crate::token::service_account::{JwtAccessTokenSource, ServiceAccountTokenSource};
use crate::token::{CachedTokenSource, TokenSource};

/// Where a credential came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Document passed in the settings.
    Explicit,
    /// File named by the credentials environment variable.
    EnvironmentVariable(PathBuf),
    /// The user's well-known file.
    WellKnownFile(PathBuf),
    /// Managed application runtime.
    ManagedRuntime,
    /// Metadata service.
    Metadata,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::EnvironmentVariable(path) => write!(f, "env:{}", path.display()),
            Self::WellKnownFile(path) => write!(f, "well-known:{}", path.display()),
            Self::ManagedRuntime => write!(f, "managed-runtime"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

/// The outcome of a successful resolution.
#[derive(Clone)]
pub struct Credentials {
    /// Project id, empty when unknown.
    pub project_id: String,
    /// Yields access tokens, refreshing as needed.
    pub token_source: Arc<dyn TokenSource>,
    /// Raw document bytes; empty for non-document sources.
    pub json: Vec<u8>,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("json_len", &self.json.len())
            .field("source", &self.source)
            .finish()
    }
}

/// Build credentials from a raw document.
///
/// Service accounts get a JWT-bearer source for the requested scopes, or a
/// self-signed JWT source when an audience is requested without scopes.
/// User documents get a refresh-token source; a missing refresh token is
/// obtained through the consent handler when one is set.
#[instrument(skip_all, fields(source = %source))]
pub async fn credentials_from_json(
    http: &reqwest::Client,
    oauth: &OAuthConfig,
    json: &[u8],
    settings: &Settings,
    source: CredentialSource,
) -> Result<Credentials> {
    let doc = CredentialsFile::parse(json)?;
    let project_id = doc.project_id().to_string();
    let scopes = settings.scopes();
    debug!(kind = doc.kind(), project_id = %project_id, "Parsed credentials document");

    let token_source: Arc<dyn TokenSource> = match doc {
        CredentialsFile::ServiceAccount(key) => {
            let key = Arc::new(key);
            if scopes.is_empty() && !settings.audience.is_empty() {
                CachedTokenSource::wrap(JwtAccessTokenSource::new(key, settings.audience.clone()))
            } else {
                CachedTokenSource::wrap(ServiceAccountTokenSource::new(
                    http.clone(),
                    key,
                    scopes,
                    &oauth.token_url,
                ))
            }
        }
        CredentialsFile::AuthorizedUser(secret) => {
            if !secret.refresh_token.is_empty() {
                CachedTokenSource::wrap(AuthorizedUserTokenSource::new(
                    http.clone(),
                    oauth.token_url.clone(),
                    &secret,
                    secret.refresh_token.clone(),
                ))
            } else {
                let Some(handler) = settings.oauth_flow_handler.as_ref() else {
                    return Err(Error::MissingField("refresh_token"));
                };
                let first =
                    obtain_refresh_token(http, oauth, &secret, &scopes, &settings.state, handler)
                        .await?;
                let refresh_token = first.refresh_token.clone().unwrap_or_default();
                let inner: Arc<dyn TokenSource> = Arc::new(AuthorizedUserTokenSource::new(
                    http.clone(),
                    oauth.token_url.clone(),
                    &secret,
                    refresh_token,
                ));
                Arc::new(CachedTokenSource::with_token(inner, first))
            }
        }
    };

    Ok(Credentials {
        project_id,
        token_source,
        json: json.to_vec(),
        source,
    })
}

/// Self-signed JWT token source for `audience` from a service-account document.
pub fn jwt_access_token_source_from_json(
    json: &[u8],
    audience: &str,
) -> Result<Arc<dyn TokenSource>> {
    match CredentialsFile::parse(json)? {
        CredentialsFile::ServiceAccount(key) => Ok(CachedTokenSource::wrap(
            JwtAccessTokenSource::new(Arc::new(key), audience),
        )),
        other => Err(Error::UnsupportedCredentialType {
            operation: "JWT access token",
            found: other.kind().to_string(),
        }),
    }
}
