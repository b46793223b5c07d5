//! Per-call resolution settings.

use std::sync::Arc;

use crate::error::Result;

/// Interactive consent callback.
///
/// Receives the authorization URL the user must visit and returns the
/// authorization code they were given. Called at most once per resolution.
pub type ConsentHandler = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Settings passed into every resolution call.
#[derive(Clone, Default)]
pub struct Settings {
    /// Space-delimited scopes requested for OAuth2 access tokens.
    pub scope: String,
    /// Target audience for self-signed JWT access tokens.
    pub audience: String,
    /// Raw credentials document. When non-empty, nothing else is probed.
    pub credentials_json: String,
    /// Consent callback for user documents that lack a refresh token.
    pub oauth_flow_handler: Option<ConsentHandler>,
    /// Anti-forgery state passed through to the consent URL.
    pub state: String,
}

impl Settings {
    /// Settings requesting `scope` and nothing else.
    pub fn with_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Default::default()
        }
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn credentials_json(mut self, json: impl Into<String>) -> Self {
        self.credentials_json = json.into();
        self
    }

    pub fn oauth_flow_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.oauth_flow_handler = Some(Arc::new(handler));
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    /// The scope string split into individual scopes, order preserved.
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_string).collect()
    }

    /// True when an explicit document overrides discovery.
    pub fn has_explicit_credentials(&self) -> bool {
        !self.credentials_json.is_empty()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("scope", &self.scope)
            .field("audience", &self.audience)
            .field(
                "credentials_json",
                &if self.credentials_json.is_empty() { "" } else { "[redacted]" },
            )
            .field("oauth_flow_handler", &self.oauth_flow_handler.is_some())
            .field("state", &self.state)
            .finish()
    }
}
