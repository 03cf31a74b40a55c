/*!
 * Bulwark CLI - credential administration, health and dashboards
 *
 * Every command prints JSON to stdout. Diagnostics go to stderr (or the
 * configured log file).
 */

use bulwark::{
    auth::{NewCredential, Role},
    config::BulwarkConfig,
    error::{BulwarkError, Result, EXIT_FAILURE, EXIT_SUCCESS},
    logging,
    monitor::HealthStatus,
    Bulwark,
};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(version, about = "Access control and resilience for autonomous agents", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $BULWARK_CONFIG, then built-in defaults)
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage credentials
    #[command(subcommand)]
    Credential(CredentialCommands),

    /// Probe every health check and report system health
    Health,

    /// Authentication statistics over a trailing window
    AuthStats {
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// Error pattern analysis over a trailing window
    Errors {
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// Run background maintenance and monitoring until interrupted
    Serve,

    /// Write the default configuration to a file
    InitConfig {
        #[arg(long, default_value = "bulwark.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Provision a credential and print its secret once
    Create {
        principal_id: String,

        /// read_only, agent, operator, admin or system
        #[arg(long, default_value = "agent")]
        role: Role,

        /// Requests allowed per hour (defaults to the configured limit)
        #[arg(long)]
        rate_limit: Option<u32>,

        /// Expire the credential after this many hours
        #[arg(long, value_name = "HOURS")]
        expires_in: Option<u32>,

        /// Restrict use to these client addresses (repeatable)
        #[arg(long = "allow-ip", value_name = "IP")]
        allow_ips: Vec<IpAddr>,
    },

    /// Deactivate a credential and revoke its sessions
    Revoke { principal_id: String },

    /// List provisioned credentials
    List,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    if let Commands::InitConfig { path, force } = &cli.command {
        return init_config(path, *force);
    }

    let mut config = match &cli.config {
        Some(path) => BulwarkConfig::from_file(path)?,
        None => BulwarkConfig::from_env_or_default()?,
    };
    config.logging.verbose |= cli.verbose;
    logging::init_logging(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli.command, config))
}

async fn dispatch(command: Commands, config: BulwarkConfig) -> Result<i32> {
    let service = Bulwark::open(config).await?;
    let outcome = execute(&service, command).await;
    service.shutdown().await?;
    outcome
}

async fn execute(service: &Bulwark, command: Commands) -> Result<i32> {
    match command {
        Commands::Credential(cmd) => credential(service, cmd).await,
        Commands::Health => {
            let health = service.check_health().await;
            print_json(&health)?;
            Ok(if health.status >= HealthStatus::Unhealthy {
                EXIT_FAILURE
            } else {
                EXIT_SUCCESS
            })
        }
        Commands::AuthStats { hours } => {
            print_json(&service.get_auth_stats(hours).await?)?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Errors { hours } => {
            print_json(&service.get_error_patterns(hours).await?)?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Serve => {
            service.start().await?;
            info!("Serving; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Interrupt received, shutting down");
            Ok(EXIT_SUCCESS)
        }
        Commands::InitConfig { .. } => Ok(EXIT_SUCCESS),
    }
}

async fn credential(service: &Bulwark, command: CredentialCommands) -> Result<i32> {
    let authenticator = service.authenticator();
    match command {
        CredentialCommands::Create {
            principal_id,
            role,
            rate_limit,
            expires_in,
            allow_ips,
        } => {
            let mut request = NewCredential::new(principal_id.clone(), role);
            if let Some(limit) = rate_limit {
                request = request.rate_limit(limit);
            }
            if let Some(hours) = expires_in {
                request = request.expires_at(Utc::now() + Duration::hours(i64::from(hours)));
            }
            if !allow_ips.is_empty() {
                request = request.allow_ips(allow_ips);
            }
            let secret = authenticator.create_credential(request).await?;
            print_json(&json!({
                "principal_id": principal_id,
                "role": role,
                "secret": secret,
            }))?;
            Ok(EXIT_SUCCESS)
        }
        CredentialCommands::Revoke { principal_id } => {
            let revoked = authenticator.revoke_credential(&principal_id).await?;
            print_json(&json!({ "principal_id": principal_id, "revoked": revoked }))?;
            Ok(EXIT_SUCCESS)
        }
        CredentialCommands::List => {
            print_json(&authenticator.list_credentials().await?)?;
            Ok(EXIT_SUCCESS)
        }
    }
}

fn init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        return Err(BulwarkError::Validation(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    BulwarkConfig::default().to_file(path)?;
    print_json(&json!({ "written": path }))?;
    Ok(EXIT_SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| BulwarkError::Config(format!("Failed to render output: {}", e)))?;
    println!("{}", text);
    Ok(())
}
