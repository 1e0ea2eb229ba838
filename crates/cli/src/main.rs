//! CLI binary to manage a local Consul, Vault and Nomad environment.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vivarium_environment::{Environment, LocalServices, ServiceStatus, Workspace};
use vivarium_service::DEFAULT_HEALTHY_TIMEOUT_SECONDS;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Environment error
    #[error(transparent)]
    Environment(#[from] vivarium_environment::Error),

    /// One or more services could not be stopped
    #[error("{0} service(s) could not be stopped")]
    Shutdown(usize),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Project the environment belongs to
    #[arg(long, default_value = "default", env = "VIVARIUM_PROJECT")]
    project: String,

    /// Directory workspaces are created in (defaults to the system temp dir)
    #[arg(long, env = "VIVARIUM_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Seconds to wait for each service to become healthy
    #[arg(
        long,
        default_value_t = DEFAULT_HEALTHY_TIMEOUT_SECONDS,
        env = "VIVARIUM_HEALTHY_TIMEOUT"
    )]
    healthy_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Start (or resume) the environment
    Init,

    /// Stop every service in the environment
    Shutdown,

    /// Show the health of every service
    Status,

    /// Load an application's data and secrets
    Load {
        /// Path to the application checkout
        #[arg(long, env = "VIVARIUM_APP_PATH")]
        app_path: PathBuf,

        /// Version label keys are namespaced under
        #[arg(long, env = "VIVARIUM_HASH_LABEL")]
        hash_label: String,
    },
}

async fn run(args: Args) -> Result<(), Error> {
    let workspace_root = args.workspace_root.unwrap_or_else(std::env::temp_dir);
    let workspace = Workspace::for_project(&workspace_root, &args.project);
    let environment = Environment::new(workspace, LocalServices::new(args.healthy_timeout));

    match args.command {
        Command::Init => {
            environment.init_env().await?;
            info!(
                workspace = %environment.workspace().path().display(),
                "environment is ready"
            );
        }
        Command::Shutdown => {
            let report = environment.shutdown().await?;
            for (role, outcome) in &report.stopped {
                info!(%role, ?outcome, "stopped");
            }
            for (role, e) in &report.failures {
                warn!(%role, error = %e, "could not stop");
            }
            if !report.is_clean() {
                return Err(Error::Shutdown(report.failures.len()));
            }
        }
        Command::Status => {
            for (role, status) in environment.status().await? {
                match status {
                    ServiceStatus::Checked { name, health } => {
                        println!("{role:<10} {name:<8} {health}");
                    }
                    ServiceStatus::NotProvisioned => println!("{role:<10} not provisioned"),
                    ServiceStatus::Unresolvable(e) => println!("{role:<10} unresolvable: {e}"),
                }
            }
        }
        Command::Load {
            app_path,
            hash_label,
        } => {
            let summary = environment
                .load_application_data(&app_path, &hash_label)
                .await?;
            info!(
                store_keys = summary.store_keys,
                secret_keys = summary.secret_keys,
                "application data loaded"
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
