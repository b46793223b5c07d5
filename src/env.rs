//! Process environment as seen by the discovery probes.
//!
//! Every environment variable, file read and user lookup the chain performs
//! goes through [`Environment`], so tests can substitute a fake and assert
//! that nothing was touched.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[async_trait]
pub trait Environment: Send + Sync {
    /// Value of an environment variable, `None` when unset or not unicode.
    fn var(&self, name: &str) -> Option<String>;

    /// Read a whole file.
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Home directory from the platform user database, bypassing `HOME`.
    fn user_home_dir(&self) -> Option<PathBuf>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

#[async_trait]
impl Environment for SystemEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    fn user_home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}
