//! Authorized-user (refresh token) credentials.
//!
//! A user document normally carries a refresh token and the OAuth client
//! it was issued to. When the refresh token is missing and the caller
//! supplied a consent callback, [`obtain_refresh_token`] runs the
//! authorization-code exchange once to get one.
//!
//! # Endpoints
//! - Authorization: `https://accounts.google.com/o/oauth2/v2/auth`
//! - Token: `https://oauth2.googleapis.com/token`

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::endpoint::request_token;
use super::{Token, TokenSource};
use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::pkce::Pkce;
use crate::settings::ConsentHandler;

/// Key material from an `authorized_user` credentials document.
#[derive(Clone, Deserialize)]
pub struct AuthorizedUserSecret {
    #[serde(default)]
    pub project_id: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
}

impl std::fmt::Debug for AuthorizedUserSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedUserSecret")
            .field("project_id", &self.project_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("quota_project_id", &self.quota_project_id)
            .finish()
    }
}

/// Build the consent URL presented to the user.
///
/// Google only returns a refresh token with `access_type=offline`, and
/// `prompt=consent` makes sure it does so even for returning users.
pub fn build_consent_url(
    config: &OAuthConfig,
    client_id: &str,
    scopes: &[String],
    state: &str,
    pkce: &Pkce,
) -> String {
    let scopes = scopes.join(" ");
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method={}&access_type=offline&prompt=consent",
        config.auth_url,
        urlencoding::encode(client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&scopes),
        urlencoding::encode(state),
        urlencoding::encode(&pkce.challenge),
        Pkce::METHOD,
    )
}

/// Run the interactive consent exchange for a user document that has no
/// refresh token.
///
/// Returns the first token, which carries the new refresh token.
#[instrument(skip_all, fields(client_id = %secret.client_id))]
pub async fn obtain_refresh_token(
    http: &reqwest::Client,
    config: &OAuthConfig,
    secret: &AuthorizedUserSecret,
    scopes: &[String],
    state: &str,
    handler: &ConsentHandler,
) -> Result<Token> {
    let pkce = Pkce::generate();
    let url = build_consent_url(config, &secret.client_id, scopes, state, &pkce);

    info!("Refresh token missing, starting consent flow");
    let code = handler(&url).map_err(|e| match e {
        Error::Consent(_) => e,
        other => Error::Consent(other.to_string()),
    })?;
    let code = code.trim();
    if code.is_empty() {
        return Err(Error::Consent("empty authorization code".to_string()));
    }

    debug!("Exchanging authorization code for tokens");
    let token = request_token(
        http,
        &config.token_url,
        &[
            ("code", code),
            ("code_verifier", &pkce.verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", &config.redirect_uri),
            ("client_id", &secret.client_id),
            ("client_secret", &secret.client_secret),
        ],
    )
    .await?;

    if token.refresh_token.is_none() {
        return Err(Error::TokenExchange(
            "No refresh token in response - ensure access_type=offline and prompt=consent"
                .to_string(),
        ));
    }
    Ok(token)
}

/// Access tokens from a refresh token.
pub struct AuthorizedUserTokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl AuthorizedUserTokenSource {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        secret: &AuthorizedUserSecret,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: secret.client_id.clone(),
            client_secret: secret.client_secret.clone(),
            refresh_token: refresh_token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for AuthorizedUserTokenSource {
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn token(&self) -> Result<Token> {
        debug!("Refreshing user access token");
        let token = request_token(
            &self.http,
            &self.token_url,
            &[
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ],
        )
        .await?;
        // The endpoint normally omits the refresh token on refresh
        Ok(Token {
            refresh_token: None,
            ..token
        })
    }
}
