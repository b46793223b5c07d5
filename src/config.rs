use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "metadata.host") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// OAuth2 endpoints used for user credentials and as the fallback token URL
/// for service-account keys that do not declare one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OAuthConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Redirect URI shown in the consent URL. The default is the
    /// out-of-band value: the user pastes the code back.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    /// Host (optionally `host:port`) of the metadata service.
    #[serde(default = "default_metadata_host")]
    pub host: String,
    /// Budget for the "are we on the platform" check.
    #[serde(default = "default_detect_timeout_ms")]
    pub detect_timeout_ms: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            host: default_metadata_host(),
            detect_timeout_ms: default_detect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Fail resolution when the metadata service is present but its project
    /// id lookup fails, instead of continuing with an empty project id.
    #[serde(default)]
    pub strict_project_id: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_redirect_uri() -> String {
    "urn:ietf:wg:oauth:2.0:oob".to_string()
}
fn default_metadata_host() -> String {
    "169.254.169.254".to_string()
}
const fn default_detect_timeout_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)
                .map_err(|e| Error::config(format!("{}: {e}", path.display())))?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for callers without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every setting has an `AMBIENT_AUTH_*` variable. `GCE_METADATA_HOST`
    /// is also honored for the metadata host, matching the platform tooling.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if !val.is_empty() {
                        $field = val;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }

        // -- OAuth --
        env_str!("oauth.auth_url", "AMBIENT_AUTH_AUTH_URL", self.oauth.auth_url);
        env_str!("oauth.token_url", "AMBIENT_AUTH_TOKEN_URL", self.oauth.token_url);
        env_str!(
            "oauth.redirect_uri",
            "AMBIENT_AUTH_REDIRECT_URI",
            self.oauth.redirect_uri
        );

        // -- Metadata --
        env_str!("metadata.host", "GCE_METADATA_HOST", self.metadata.host);
        env_str!("metadata.host", "AMBIENT_AUTH_METADATA_HOST", self.metadata.host);
        env_parse!(
            "metadata.detect_timeout_ms",
            "AMBIENT_AUTH_METADATA_TIMEOUT_MS",
            self.metadata.detect_timeout_ms
        );

        // -- Resolver --
        env_bool!(
            "resolver.strict_project_id",
            "AMBIENT_AUTH_STRICT_PROJECT_ID",
            self.resolver.strict_project_id
        );

        // -- Logging --
        env_str!("logging.level", "AMBIENT_AUTH_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "AMBIENT_AUTH_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
