mod config;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use broker::providers::{FileProvider, HttpFetchProvider, LogProvider, ProcessProvider};
use broker::{ActionBroker, ProviderRegistry};
use clap::{Parser, Subcommand};
use ledger::AuditEntry;
use policy::{
    ActionKind, ActionRequest, CapabilityBody, CapabilityVerifier, Environment, PolicyEngine,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "warden.toml";

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Capability-based mediation for agent side effects", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the policy decision for a request without running it
    Decide {
        /// Request JSON file
        request: PathBuf,
    },
    /// Run a request through the broker with the built-in providers
    Handle {
        /// Request JSON file
        request: PathBuf,
        /// Also print the audit chain
        #[arg(long)]
        audit: bool,
    },
    /// Sign a capability body with the configured secret
    Sign {
        /// Capability body JSON file
        body: PathBuf,
    },
    /// Verify an exported audit chain
    VerifyAudit {
        /// Exported audit JSON file
        export: PathBuf,
        /// Anchor label the chain was written with (defaults to config)
        #[arg(long)]
        anchor: Option<String>,
    },
    /// Show broker configuration and state
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::discover(&cli.config)?;
    debug!(path = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Decide { request } => cmd_decide(&config, &request),
        Commands::Handle { request, audit } => cmd_handle(&config, &request, audit).await,
        Commands::Sign { body } => cmd_sign(&config, &body),
        Commands::VerifyAudit { export, anchor } => {
            cmd_verify_audit(&config, &export, anchor.as_deref())
        }
        Commands::Status => cmd_status(&config),
    }
}

fn cmd_decide(config: &Config, path: &Path) -> Result<()> {
    let request: ActionRequest = read_json(path)?;
    let decision = engine(config).decide(&request);
    print_json(&decision)
}

async fn cmd_handle(config: &Config, path: &Path, show_audit: bool) -> Result<()> {
    let request: ActionRequest = read_json(path)?;
    let broker = build_broker(config)?;

    let outcome = broker.handle(request).await;
    print_json(&outcome)?;
    if show_audit {
        print_json(&broker.audit_export())?;
    }
    Ok(())
}

fn cmd_sign(config: &Config, path: &Path) -> Result<()> {
    let body: CapabilityBody = read_json(path)?;
    let capability = CapabilityVerifier::new(config.secret()?).issue(body)?;
    print_json(&capability)
}

fn cmd_verify_audit(config: &Config, path: &Path, anchor: Option<&str>) -> Result<()> {
    let entries: Vec<AuditEntry> = read_json(path)?;
    let anchor = anchor.unwrap_or(&config.broker.anchor_label);
    ledger::verify_chain(&entries, anchor)?;
    println!("audit chain intact ({} entries)", entries.len());
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let broker = build_broker(config)?;
    print_json(&broker.status())
}

fn engine(config: &Config) -> PolicyEngine {
    PolicyEngine::new(config.policy.clone(), Environment::from_env())
}

fn build_broker(config: &Config) -> Result<ActionBroker> {
    let verifier = CapabilityVerifier::new(config.secret()?);
    let files = Arc::new(FileProvider::new(&config.broker.sandbox_root));
    let providers = ProviderRegistry::new()
        .with(ActionKind::Log, Arc::new(LogProvider))
        .with(ActionKind::FileRead, files.clone())
        .with(ActionKind::FileWrite, files)
        .with(ActionKind::NetworkFetch, Arc::new(HttpFetchProvider::new()))
        .with(
            ActionKind::SpawnProcess,
            Arc::new(ProcessProvider::new(config.broker.allowed_commands.clone())),
        );

    Ok(ActionBroker::builder(engine(config), verifier)
        .providers(providers)
        .settings(config.settings()?)
        .build())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
