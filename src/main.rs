//! ambient-auth -- print a token from application default credentials.
//!
//! Resolves credentials the same way a library caller would and prints the
//! resulting access token, `Authorization` header value, or a JSON summary.

use std::path::PathBuf;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use ambient_auth::config::Config;
use ambient_auth::credentials::jwt_access_token_source_from_json;
use ambient_auth::{CancellationToken, CredentialResolver, Settings};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Token,
    Header,
    Json,
}

struct CliArgs {
    config_path: Option<PathBuf>,
    scope: String,
    audience: String,
    credentials_file: Option<PathBuf>,
    jwt: bool,
    consent: bool,
    format: OutputFormat,
}

const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut cli = CliArgs {
        config_path: None,
        scope: DEFAULT_SCOPE.to_string(),
        audience: String::new(),
        credentials_file: None,
        jwt: false,
        consent: false,
        format: OutputFormat::Token,
    };

    fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> String {
        match args.next() {
            Some(v) => v,
            None => {
                eprintln!("Error: {flag} requires an argument");
                std::process::exit(1);
            }
        }
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => cli.config_path = Some(PathBuf::from(value(&mut args, &arg))),
            "--scope" | "-s" => cli.scope = value(&mut args, &arg),
            "--audience" | "-a" => cli.audience = value(&mut args, &arg),
            "--credentials" => {
                cli.credentials_file = Some(PathBuf::from(value(&mut args, &arg)));
            }
            "--jwt" => cli.jwt = true,
            "--consent" => cli.consent = true,
            "--format" | "-f" => {
                cli.format = match value(&mut args, &arg).as_str() {
                    "token" => OutputFormat::Token,
                    "header" => OutputFormat::Header,
                    "json" => OutputFormat::Json,
                    other => {
                        eprintln!("Error: unknown format {other:?} (token, header, json)");
                        std::process::exit(1);
                    }
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("ambient-auth {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    cli
}

fn print_usage() {
    println!(
        "\
ambient-auth {version} -- resolve application default credentials

USAGE:
    ambient-auth [OPTIONS]

OPTIONS:
    -c, --config <PATH>         Path to configuration file [default: ambient-auth.toml]
    -s, --scope <SCOPES>        Space-delimited scopes [default: cloud-platform]
    -a, --audience <AUD>        Audience for self-signed JWT access tokens
        --credentials <PATH>    Use this credentials document instead of discovery
        --jwt                   Print a self-signed JWT for --audience
        --consent               Prompt for an authorization code if needed
    -f, --format <FMT>          token | header | json [default: token]
    -h, --help                  Print this help message
    -V, --version               Print version information

ENVIRONMENT:
    RUST_LOG                          Override log level (e.g. RUST_LOG=debug)
    AMBIENT_AUTH_CONFIG               Alternative to --config flag
    GOOGLE_APPLICATION_CREDENTIALS    Path of a credentials document
    GCE_METADATA_HOST                 Metadata service host
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args();
    check_args(&cli)?;

    let config_path = cli
        .config_path
        .clone()
        .or_else(|| std::env::var("AMBIENT_AUTH_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("ambient-auth.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_tracing(&config);
    for (key, var) in config.env_overrides.all() {
        tracing::debug!(setting = %key, env = %var, "Setting overridden by environment");
    }

    let mut settings = Settings::with_scope(cli.scope.as_str()).audience(cli.audience.as_str());
    if let Some(path) = &cli.credentials_file {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        settings = settings.credentials_json(json);
    }
    if cli.consent {
        settings = settings
            .state(format!("ambient-auth-{}", std::process::id()))
            .oauth_flow_handler(prompt_for_code);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("Received SIGINT (Ctrl+C), cancelling");
                cancel.cancel();
            }
        }
    });

    let resolver = CredentialResolver::from_config(&config);
    let creds = resolver.resolve(&cancel, &settings).await?;
    let source = if cli.jwt {
        if creds.json.is_empty() {
            anyhow::bail!("--jwt needs a service-account document, found {}", creds.source);
        }
        jwt_access_token_source_from_json(&creds.json, &cli.audience)?
    } else {
        creds.token_source.clone()
    };
    let token = source.token().await.map_err(with_reauth_hint)?;

    match cli.format {
        OutputFormat::Token => println!("{}", token.access_token),
        OutputFormat::Header => println!("{}", token.header_value()),
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "source": creds.source.to_string(),
                "project_id": creds.project_id,
                "token_type": token.token_type,
                "access_token": token.access_token,
                "expiry": token.expiry().map(|e| e.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

/// Reject flag combinations the library would refuse later.
fn check_args(cli: &CliArgs) -> anyhow::Result<()> {
    if cli.jwt && cli.audience.is_empty() {
        anyhow::bail!("--jwt requires --audience");
    }
    Ok(())
}

fn with_reauth_hint(err: ambient_auth::Error) -> anyhow::Error {
    if err.requires_reauth() {
        anyhow::Error::new(err)
            .context("credentials were revoked or expired; run `gcloud auth application-default login`")
    } else {
        err.into()
    }
}

/// Consent callback for the terminal: show the URL, read the code.
fn prompt_for_code(url: &str) -> ambient_auth::Result<String> {
    eprintln!("Open this URL in a browser and paste the authorization code:\n\n  {url}\n");
    eprint!("Code: ");
    let mut code = String::new();
    std::io::stdin().read_line(&mut code)?;
    Ok(code.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("ambient_auth={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
