//! Resolution chain behavior with the process environment, the managed
//! runtime and the metadata service replaced by fakes.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ambient_auth::env::{Environment, SystemEnvironment};
use ambient_auth::error::Error;
use ambient_auth::metadata::MetadataClient;
use ambient_auth::runtime::RuntimeHooks;
use ambient_auth::token::StaticTokenSource;
use ambient_auth::well_known::Platform;
use ambient_auth::{
    CREDENTIALS_ENV_VAR, CredentialResolver, CredentialSource, Settings, Token, TokenSource,
};

const SERVICE_ACCOUNT: &[u8] = include_bytes!("fixtures/service_account.json");
const WELL_KNOWN: &str = "/home/tester/.config/gcloud/application_default_credentials.json";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// In-memory environment that counts every access.
#[derive(Default)]
struct SpyEnv {
    vars: HashMap<String, String>,
    files: HashMap<PathBuf, io::Result<Vec<u8>>>,
    stalled: Vec<PathBuf>,
    accesses: Arc<AtomicUsize>,
}

impl SpyEnv {
    fn new() -> Self {
        let mut env = Self::default();
        env.vars.insert("HOME".into(), "/home/tester".into());
        env
    }

    fn var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    fn file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files.insert(PathBuf::from(path), Ok(contents.to_vec()));
        self
    }

    fn unreadable(mut self, path: &str, kind: io::ErrorKind) -> Self {
        self.files.insert(PathBuf::from(path), Err(kind.into()));
        self
    }

    /// Reads of `path` never complete.
    fn stalled(mut self, path: &str) -> Self {
        self.stalled.push(PathBuf::from(path));
        self
    }
}

#[async_trait]
impl Environment for SpyEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.vars.get(name).cloned()
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if self.stalled.iter().any(|p| p == path) {
            std::future::pending::<()>().await;
        }
        match self.files.get(path) {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(e)) => Err(e.kind().into()),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn user_home_dir(&self) -> Option<PathBuf> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Metadata service that is either absent or present with a fixed answer.
struct FakeMetadata {
    present: bool,
    project_id: Option<&'static str>,
    hang: bool,
    calls: AtomicUsize,
}

impl FakeMetadata {
    fn absent() -> Arc<Self> {
        Arc::new(Self {
            present: false,
            project_id: None,
            hang: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn present(project_id: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            present: true,
            project_id,
            hang: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            present: true,
            project_id: None,
            hang: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn on_platform(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.present
    }

    async fn project_id(&self) -> ambient_auth::Result<String> {
        self.project_id
            .map(str::to_string)
            .ok_or_else(|| Error::Metadata("no project".into()))
    }

    fn token_source(&self, _account: &str) -> Arc<dyn TokenSource> {
        Arc::new(StaticTokenSource::new(Token::new("metadata-token".into(), Some(3600))))
    }
}

fn resolver(env: SpyEnv, metadata: Arc<FakeMetadata>) -> CredentialResolver {
    CredentialResolver::default()
        .with_environment(env)
        .with_platform(Platform::Unix)
        .with_runtime_hooks(RuntimeHooks::none())
        .with_metadata_client(metadata)
}

fn runtime_hooks() -> RuntimeHooks {
    RuntimeHooks::none()
        .with_app_id(|| "runtime-app".to_string())
        .with_token_source(|scopes: &[String]| -> Arc<dyn TokenSource> {
            Arc::new(StaticTokenSource::new(Token::new(
                format!("runtime:{}", scopes.join(",")),
                Some(3600),
            )))
        })
}

// ---------------------------------------------------------------------------
// Explicit documents
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_explicit_document_touches_nothing() {
    let env = SpyEnv::new().var(CREDENTIALS_ENV_VAR, "/etc/creds.json");
    let accesses = env.accesses.clone();
    let metadata = FakeMetadata::present(Some("meta-project"));

    let json = r#"{"type":"service_account","project_id":"p1","client_email":"a@b","private_key":"..."}"#;
    let creds = resolver(env, metadata.clone())
        .resolve(
            &CancellationToken::new(),
            &Settings::with_scope("scope-a").credentials_json(json),
        )
        .await
        .unwrap();

    assert_eq!(creds.project_id, "p1");
    assert_eq!(creds.json, json.as_bytes());
    assert_eq!(creds.source, CredentialSource::Explicit);
    assert_eq!(accesses.load(Ordering::SeqCst), 0);
    assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_explicit_document_without_type_is_parse_error() {
    let err = resolver(SpyEnv::new(), FakeMetadata::absent())
        .resolve(
            &CancellationToken::new(),
            &Settings::with_scope("scope-a").credentials_json(r#"{"project_id":"p1"}"#),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingCredentialType));
    assert!(!matches!(err, Error::NotFound));
}

#[tokio::test]
async fn test_find_default_ignores_explicit_document() {
    let err = resolver(SpyEnv::new(), FakeMetadata::absent())
        .find_default_credentials(
            &CancellationToken::new(),
            &Settings::with_scope("scope-a").credentials_json(
                std::str::from_utf8(SERVICE_ACCOUNT).unwrap(),
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

// ---------------------------------------------------------------------------
// Environment variable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_env_var_document() {
    let env = SpyEnv::new()
        .var(CREDENTIALS_ENV_VAR, "/etc/creds.json")
        .file("/etc/creds.json", SERVICE_ACCOUNT)
        .file(WELL_KNOWN, br#"{"type":"bogus"}"#);

    let creds = resolver(env, FakeMetadata::absent())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();

    assert_eq!(creds.project_id, "fixture-project");
    assert_eq!(creds.json, SERVICE_ACCOUNT);
    assert_eq!(
        creds.source,
        CredentialSource::EnvironmentVariable(PathBuf::from("/etc/creds.json"))
    );
}

#[tokio::test]
async fn test_env_var_missing_file_is_fatal() {
    let env = SpyEnv::new()
        .var(CREDENTIALS_ENV_VAR, "/nonexistent/path")
        .file(WELL_KNOWN, SERVICE_ACCOUNT);
    let metadata = FakeMetadata::present(Some("meta-project"));

    let err = resolver(env, metadata.clone())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EnvironmentVariable { .. }));
    assert!(err.to_string().contains(CREDENTIALS_ENV_VAR));
    assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_env_var_malformed_document_is_fatal() {
    let env = SpyEnv::new()
        .var(CREDENTIALS_ENV_VAR, "/etc/creds.json")
        .file("/etc/creds.json", b"not json");

    let err = resolver(env, FakeMetadata::absent())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();

    assert!(err.is_parse_error());
    assert!(err.to_string().contains(CREDENTIALS_ENV_VAR));
}

#[tokio::test]
async fn test_empty_env_var_is_unset() {
    let env = SpyEnv::new()
        .var(CREDENTIALS_ENV_VAR, "")
        .file(WELL_KNOWN, SERVICE_ACCOUNT);

    let creds = resolver(env, FakeMetadata::absent())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();
    assert_eq!(
        creds.source,
        CredentialSource::WellKnownFile(PathBuf::from(WELL_KNOWN))
    );
}

// ---------------------------------------------------------------------------
// Well-known file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_well_known_file() {
    let env = SpyEnv::new().file(WELL_KNOWN, SERVICE_ACCOUNT);

    let creds = resolver(env, FakeMetadata::present(Some("meta-project")))
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();

    assert_eq!(creds.project_id, "fixture-project");
    assert_eq!(
        creds.source,
        CredentialSource::WellKnownFile(PathBuf::from(WELL_KNOWN))
    );
}

#[tokio::test]
async fn test_well_known_malformed_is_fatal() {
    let env = SpyEnv::new().file(WELL_KNOWN, br#"{"project_id":"p1"}"#);
    let metadata = FakeMetadata::present(Some("meta-project"));

    let err = resolver(env, metadata.clone())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();

    match &err {
        Error::WellKnownFile { path, source } => {
            assert_eq!(path, &PathBuf::from(WELL_KNOWN));
            assert!(matches!(**source, Error::MissingCredentialType));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_well_known_unreadable_is_fatal() {
    let env = SpyEnv::new().unreadable(WELL_KNOWN, io::ErrorKind::PermissionDenied);

    let err = resolver(env, FakeMetadata::absent())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WellKnownFile { .. }));
}

#[tokio::test]
async fn test_windows_layout() {
    let expected = PathBuf::from("C:/Users/t/AppData/Roaming")
        .join("gcloud")
        .join("application_default_credentials.json");
    let env = SpyEnv::new()
        .var("APPDATA", "C:/Users/t/AppData/Roaming")
        .file(expected.to_str().unwrap(), SERVICE_ACCOUNT);

    let creds = resolver(env, FakeMetadata::absent())
        .with_platform(Platform::Windows)
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();
    assert_eq!(creds.source, CredentialSource::WellKnownFile(expected));
}

// ---------------------------------------------------------------------------
// Managed runtime and metadata
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_falls_through_to_managed_runtime() {
    let creds = resolver(SpyEnv::new(), FakeMetadata::present(Some("meta-project")))
        .with_runtime_hooks(runtime_hooks())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a scope-b"))
        .await
        .unwrap();

    assert_eq!(creds.project_id, "runtime-app");
    assert!(creds.json.is_empty());
    assert_eq!(creds.source, CredentialSource::ManagedRuntime);
    let token = creds.token_source.token().await.unwrap();
    assert_eq!(token.access_token, "runtime:scope-a,scope-b");
}

#[tokio::test]
async fn test_flexible_runtime_uses_metadata() {
    let creds = resolver(SpyEnv::new(), FakeMetadata::present(Some("meta-project")))
        .with_runtime_hooks(runtime_hooks().flexible(true))
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();

    assert_eq!(creds.source, CredentialSource::Metadata);
    assert_eq!(creds.project_id, "meta-project");
}

#[tokio::test]
async fn test_falls_through_to_metadata() {
    let creds = resolver(SpyEnv::new(), FakeMetadata::present(Some("meta-project")))
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();

    assert_eq!(creds.source, CredentialSource::Metadata);
    assert_eq!(creds.project_id, "meta-project");
    assert!(creds.json.is_empty());
    assert_eq!(
        creds.token_source.token().await.unwrap().access_token,
        "metadata-token"
    );
}

#[tokio::test]
async fn test_metadata_project_id_failure_degrades() {
    let creds = resolver(SpyEnv::new(), FakeMetadata::present(None))
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();

    assert_eq!(creds.source, CredentialSource::Metadata);
    assert_eq!(creds.project_id, "");
}

#[tokio::test]
async fn test_metadata_project_id_failure_strict() {
    let err = resolver(SpyEnv::new(), FakeMetadata::present(None))
        .with_strict_project_id(true)
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Metadata(_)));
}

#[tokio::test]
async fn test_exhaustion_is_not_found() {
    let err = resolver(SpyEnv::new(), FakeMetadata::absent())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound));
    assert!(err.to_string().contains("could not find default credentials"));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancelled_before_start() {
    let env = SpyEnv::new()
        .var(CREDENTIALS_ENV_VAR, "/etc/creds.json")
        .file("/etc/creds.json", SERVICE_ACCOUNT);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = resolver(env, FakeMetadata::absent())
        .resolve(&cancel, &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_cancel_during_env_var_read() {
    let env = SpyEnv::new()
        .var(CREDENTIALS_ENV_VAR, "/etc/creds.json")
        .stalled("/etc/creds.json")
        .file(WELL_KNOWN, SERVICE_ACCOUNT);
    let cancel = CancellationToken::new();
    let metadata = FakeMetadata::present(Some("meta-project"));
    let resolver = resolver(env, metadata.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = resolver
        .resolve(&cancel, &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_during_well_known_read() {
    let env = SpyEnv::new().stalled(WELL_KNOWN);
    let cancel = CancellationToken::new();
    let metadata = FakeMetadata::present(Some("meta-project"));
    let resolver = resolver(env, metadata.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = resolver
        .resolve(&cancel, &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(metadata.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_during_metadata_probe() {
    let cancel = CancellationToken::new();
    let resolver = resolver(SpyEnv::new(), FakeMetadata::hanging());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = resolver
        .resolve(&cancel, &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_jwt_token_source_from_well_known_file() {
    let env = SpyEnv::new().file(WELL_KNOWN, SERVICE_ACCOUNT);
    let source = resolver(env, FakeMetadata::absent())
        .jwt_token_source(
            &CancellationToken::new(),
            &Settings::default().audience("https://example.googleapis.com/"),
        )
        .await
        .unwrap();

    let token = source.token().await.unwrap();
    assert_eq!(token.access_token.split('.').count(), 3);
}

#[tokio::test]
async fn test_jwt_token_source_needs_a_document() {
    let err = resolver(SpyEnv::new(), FakeMetadata::present(Some("meta-project")))
        .jwt_token_source(
            &CancellationToken::new(),
            &Settings::default().audience("https://example.googleapis.com/"),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnsupportedCredentialType { .. }));
}

#[tokio::test]
async fn test_per_rpc_application_default() {
    let per_rpc = resolver(SpyEnv::new(), FakeMetadata::present(Some("meta-project")))
        .per_rpc_application_default(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();

    let md = per_rpc.request_metadata().await.unwrap();
    assert_eq!(md["authorization"], "Bearer metadata-token");
    assert!(per_rpc.require_transport_security());
}

#[tokio::test]
async fn test_per_rpc_application_default_ignores_explicit_document() {
    let json = r#"{"type":"service_account","project_id":"p1","client_email":"a@b","private_key":"..."}"#;
    let err = resolver(SpyEnv::new(), FakeMetadata::absent())
        .per_rpc_application_default(
            &CancellationToken::new(),
            &Settings::with_scope("scope-a").credentials_json(json),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NotFound));
}

#[tokio::test]
async fn test_per_rpc_jwt() {
    let env = SpyEnv::new().file(WELL_KNOWN, SERVICE_ACCOUNT);
    let per_rpc = resolver(env, FakeMetadata::absent())
        .per_rpc_jwt(&CancellationToken::new(), "https://example.googleapis.com/")
        .await
        .unwrap();

    let md = per_rpc.request_metadata().await.unwrap();
    assert!(md["authorization"].starts_with("Bearer ey"));
}

#[tokio::test]
async fn test_default_token_source() {
    let source = resolver(SpyEnv::new(), FakeMetadata::present(Some("meta-project")))
        .default_token_source(&CancellationToken::new(), "scope-a")
        .await
        .unwrap();
    assert_eq!(source.token().await.unwrap().access_token, "metadata-token");
}

// ---------------------------------------------------------------------------
// Real filesystem
// ---------------------------------------------------------------------------

/// Real file reads, with only the variables coming from a map.
struct TempHomeEnv {
    vars: HashMap<String, String>,
}

#[async_trait]
impl Environment for TempHomeEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        SystemEnvironment.read_file(path).await
    }

    fn user_home_dir(&self) -> Option<PathBuf> {
        None
    }
}

#[tokio::test]
async fn test_well_known_file_on_disk() {
    let home = tempfile::tempdir().unwrap();
    let dir = home.path().join(".config").join("gcloud");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("application_default_credentials.json"), SERVICE_ACCOUNT).unwrap();

    let env = TempHomeEnv {
        vars: HashMap::from([("HOME".to_string(), home.path().display().to_string())]),
    };
    let creds = CredentialResolver::default()
        .with_environment(env)
        .with_platform(Platform::Unix)
        .with_metadata_client(FakeMetadata::absent())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap();

    assert_eq!(creds.json, SERVICE_ACCOUNT);
    assert_eq!(creds.project_id, "fixture-project");
}

#[tokio::test]
async fn test_empty_home_on_disk_declines() {
    let env = TempHomeEnv {
        vars: HashMap::new(),
    };
    let err = CredentialResolver::default()
        .with_environment(env)
        .with_platform(Platform::Unix)
        .with_metadata_client(FakeMetadata::absent())
        .resolve(&CancellationToken::new(), &Settings::with_scope("scope-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound));
}
