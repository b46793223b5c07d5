//! Credentials documents.
//!
//! A document is a JSON object tagged by its `type` field. Only the kinds
//! listed in [`CredentialsFile`] are accepted; anything else is rejected
//! before the kind-specific fields are looked at.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::token::authorized_user::AuthorizedUserSecret;
use crate::token::service_account::ServiceAccountKey;

/// A parsed credentials document.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserSecret),
}

/// Just the tag, read first so a missing or unknown tag is reported as such
/// instead of as a field mismatch.
#[derive(Deserialize)]
struct DocumentTag {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

const KNOWN_KINDS: &[&str] = &["service_account", "authorized_user"];

impl CredentialsFile {
    /// Parse a raw document.
    pub fn parse(json: &[u8]) -> Result<Self> {
        let tag: DocumentTag = serde_json::from_slice(json).map_err(Error::Parse)?;
        match tag.kind.as_deref() {
            None | Some("") => Err(Error::MissingCredentialType),
            Some(kind) if KNOWN_KINDS.contains(&kind) => {
                serde_json::from_slice(json).map_err(Error::Parse)
            }
            Some(kind) => Err(Error::UnknownCredentialType(kind.to_string())),
        }
    }

    /// The `type` tag of this document.
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialsFile::ServiceAccount(_) => "service_account",
            CredentialsFile::AuthorizedUser(_) => "authorized_user",
        }
    }

    /// Declared project id, empty if absent.
    pub fn project_id(&self) -> &str {
        match self {
            CredentialsFile::ServiceAccount(key) => &key.project_id,
            CredentialsFile::AuthorizedUser(secret) => &secret.project_id,
        }
    }
}
