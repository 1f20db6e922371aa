//! Argo CD Provider
//!
//! Command line front end for the provider core: expand a declared project
//! into its wire form, reconcile a live object against a declaration, or run
//! a declaration through the lifecycle against an in-memory control plane.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use argocd_provider::{
    AppProject, Error, InMemoryProjectApi, LifecycleConfig, ManagedResource, Project,
    ProjectModel, ProviderSession, Result, SessionConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Argo CD Provider - declarative management of Argo CD projects
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Argo CD server version used for feature gating
    #[arg(long, env = "ARGOCD_SERVER_VERSION", global = true)]
    server_version: Option<String>,

    /// Upper bound on waiting for a previous instance's deletion, in seconds
    #[arg(long, env = "MAX_DELETION_WAIT_SECS", default_value = "300", global = true)]
    max_deletion_wait_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the wire object for a declared project
    Expand {
        /// Project declaration (YAML or JSON)
        file: PathBuf,
    },
    /// Print the state of a live project as seen through a declaration
    Reconcile {
        /// Project declaration (YAML or JSON)
        declared: PathBuf,
        /// Live AppProject (YAML or JSON)
        live: PathBuf,
    },
    /// Create a declared project in an in-memory control plane and print its state
    Apply {
        /// Project declaration (YAML or JSON)
        file: PathBuf,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Argo CD provider {}", argocd_provider::VERSION);

    match &args.command {
        Command::Expand { file } => {
            let model = ProjectModel::from_path(file)?;
            let project = Project::expand(&model)?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Command::Reconcile { declared, live } => {
            let model = ProjectModel::from_path(declared)?;
            let raw = std::fs::read_to_string(live)?;
            let live: AppProject = serde_yaml::from_str(&raw)?;
            let state = Project::flatten(&live, &model);
            print!("{}", serde_yaml::to_string(&state)?);
        }
        Command::Apply { file } => {
            let model = ProjectModel::from_path(file)?;
            apply(&args, &model).await?;
        }
    }

    Ok(())
}

async fn apply(args: &Args, model: &ProjectModel) -> Result<()> {
    let session = ProviderSession::new(SessionConfig {
        server_version: args.server_version.clone(),
        lifecycle: LifecycleConfig {
            max_deletion_wait: Duration::from_secs(args.max_deletion_wait_secs),
        },
    })?;

    let api = Arc::new(InMemoryProjectApi::new().with_argocd_controller());
    let lifecycle = session.lifecycle::<Project>(api);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let created = lifecycle.create(model, &cancel).await.map_err(report)?;
    let state = lifecycle
        .read(&created, &cancel)
        .await
        .map_err(report)?
        .ok_or_else(|| Error::Configuration(format!("project {} vanished after create", model.metadata.name)))?;

    print!("{}", serde_yaml::to_string(&state)?);
    println!("---");
    print!("{}", session.metrics().render()?);

    Ok(())
}

fn report(err: Error) -> Error {
    let diagnostic = err.diagnostic();
    tracing::error!("{}: {}", diagnostic.summary, diagnostic.detail);
    err
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "kube=info".parse() {
        filter = filter.add_directive(directive);
    }

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
