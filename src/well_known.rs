//! Location of the user-level default credentials file.
//!
//! Pure functions of a [`Platform`] value and an [`Environment`], so every
//! platform's layout can be checked from a single build.

use std::path::PathBuf;

use crate::env::Environment;

/// Directory under the config root that the gcloud CLI writes to.
const GCLOUD_DIR: &str = "gcloud";

/// File name of the application default credentials document.
const WELL_KNOWN_FILE: &str = "application_default_credentials.json";

/// Platform family deciding the well-known layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `%APPDATA%\gcloud\...`
    Windows,
    /// `$HOME/.config/gcloud/...`
    Unix,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Path of the well-known credentials file.
pub fn well_known_file(platform: Platform, env: &dyn Environment) -> PathBuf {
    match platform {
        Platform::Windows => PathBuf::from(env.var("APPDATA").unwrap_or_default())
            .join(GCLOUD_DIR)
            .join(WELL_KNOWN_FILE),
        Platform::Unix => home_dir(env)
            .join(".config")
            .join(GCLOUD_DIR)
            .join(WELL_KNOWN_FILE),
    }
}

/// `HOME` if set, else the user database entry, else empty.
///
/// An empty home gives a relative path that simply won't exist.
pub fn home_dir(env: &dyn Environment) -> PathBuf {
    if let Some(home) = env.var("HOME").filter(|h| !h.is_empty()) {
        return PathBuf::from(home);
    }
    env.user_home_dir().unwrap_or_default()
}
