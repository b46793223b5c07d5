//! Managed application runtime identity.
//!
//! A hosting runtime can hand the process an identity without any document
//! or metadata call. The runtime registers two optional hooks when the
//! process starts; outside that runtime both are absent and the probe
//! declines.

use std::sync::Arc;

use crate::token::TokenSource;

/// Returns the application id, used as the project id.
pub type AppIdHook = Arc<dyn Fn() -> String + Send + Sync>;

/// Builds the runtime's token source for a set of scopes.
pub type RuntimeTokenHook = Arc<dyn Fn(&[String]) -> Arc<dyn TokenSource> + Send + Sync>;

/// Hooks installed by a managed runtime, all absent by default.
#[derive(Clone, Default)]
pub struct RuntimeHooks {
    app_id: Option<AppIdHook>,
    token_source: Option<RuntimeTokenHook>,
    flexible: bool,
}

impl RuntimeHooks {
    /// No managed runtime.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_app_id<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.app_id = Some(Arc::new(hook));
        self
    }

    pub fn with_token_source<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[String]) -> Arc<dyn TokenSource> + Send + Sync + 'static,
    {
        self.token_source = Some(Arc::new(hook));
        self
    }

    /// Mark the runtime as the flexible environment, whose instances get
    /// their identity from the metadata service instead.
    pub fn flexible(mut self, flexible: bool) -> Self {
        self.flexible = flexible;
        self
    }

    /// True when the token hook is installed and the runtime is not flexible.
    pub fn available(&self) -> bool {
        self.token_source.is_some() && !self.flexible
    }

    /// Application id, empty when the hook is absent.
    pub fn app_id(&self) -> String {
        self.app_id.as_ref().map(|hook| hook()).unwrap_or_default()
    }

    /// Token source for `scopes`, `None` when the hook is absent.
    pub fn token_source(&self, scopes: &[String]) -> Option<Arc<dyn TokenSource>> {
        self.token_source.as_ref().map(|hook| hook(scopes))
    }
}

impl std::fmt::Debug for RuntimeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHooks")
            .field("app_id", &self.app_id.is_some())
            .field("token_source", &self.token_source.is_some())
            .field("flexible", &self.flexible)
            .finish()
    }
}
