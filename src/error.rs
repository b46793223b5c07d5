//! Error types for ambient credential resolution.

use std::path::PathBuf;

use thiserror::Error;

/// Where to send users who have no credentials at all.
pub const DEFAULT_CREDENTIALS_DOC_URL: &str =
    "https://developers.google.com/accounts/docs/application-default-credentials";

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving credentials or fetching tokens.
#[derive(Debug, Error)]
pub enum Error {
    // ── Credential documents ────────────────────────────────────────────────
    /// The credentials document is not valid JSON or does not match the
    /// shape declared by its `type`.
    #[error("malformed credentials document: {0}")]
    Parse(#[source] serde_json::Error),

    /// The credentials document has no `type` field.
    #[error("malformed credentials document: missing `type` field")]
    MissingCredentialType,

    /// The credentials document declares a `type` this crate does not know.
    #[error("unknown credential type {0:?}")]
    UnknownCredentialType(String),

    /// A field required by the declared credential type is absent.
    #[error("credentials document is missing required field `{0}`")]
    MissingField(&'static str),

    /// The resolved credential cannot be used for the requested operation.
    #[error("{operation} is not supported for {found} credentials")]
    UnsupportedCredentialType {
        /// What the caller asked for.
        operation: &'static str,
        /// What kind of credential was found.
        found: String,
    },

    // ── Probes ──────────────────────────────────────────────────────────────
    /// The credentials environment variable pointed at something unusable.
    #[error("error getting credentials using {var} environment variable: {source}")]
    EnvironmentVariable {
        /// Name of the environment variable.
        var: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The well-known file exists but could not be read or parsed.
    #[error("error getting credentials using well-known file ({}): {source}", .path.display())]
    WellKnownFile {
        /// Path of the well-known file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Every probe declined.
    #[error(
        "could not find default credentials. See {} for more information.",
        DEFAULT_CREDENTIALS_DOC_URL
    )]
    NotFound,

    /// The caller cancelled resolution while a probe was doing I/O.
    #[error("credential resolution cancelled")]
    Cancelled,

    // ── Token acquisition ───────────────────────────────────────────────────
    /// The interactive consent callback failed.
    #[error("consent flow failed: {0}")]
    Consent(String),

    /// The token endpoint rejected an exchange or refresh.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The refresh token was rejected (`invalid_grant`).
    #[error("refresh token expired or revoked")]
    TokenExpired,

    /// The metadata service failed.
    #[error("metadata service error: {0}")]
    Metadata(String),

    // ── Infrastructure ──────────────────────────────────────────────────────
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Signing a JWT failed (usually a bad private key).
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Network/HTTP error.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns true for an I/O "file does not exist" error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Returns true if the caller cancelled resolution.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true for structural problems with a credentials document.
    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        match self {
            Error::Parse(_)
            | Error::MissingCredentialType
            | Error::UnknownCredentialType(_)
            | Error::MissingField(_) => true,
            Error::EnvironmentVariable { source, .. } | Error::WellKnownFile { source, .. } => {
                source.is_parse_error()
            }
            _ => false,
        }
    }

    /// Returns true if this error indicates the user must re-authenticate.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Error::TokenExpired)
    }
}
