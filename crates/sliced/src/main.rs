//! sliced — the slicegrid daemon.
//!
//! Assembles the slicegrid subsystems in one process:
//! - State store (redb)
//! - Allocation controller + reconcile workers
//! - Metrics registry, served on `/metrics`
//!
//! # Usage
//!
//! ```text
//! sliced run --config /etc/slicegrid/slicegrid.toml --data-dir /var/lib/slicegrid
//! sliced check-config --config /etc/slicegrid/slicegrid.toml
//! ```

mod daemon;
mod http;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use slicegrid_core::SliceConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,sliced=debug,slicegrid=debug";

#[derive(Parser)]
#[command(name = "sliced", about = "slicegrid accelerator slice controller")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller.
    Run {
        /// Configuration file; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/slicegrid")]
        data_dir: PathBuf,

        /// Port for the Prometheus metrics endpoint.
        #[arg(long, default_value = "9464")]
        metrics_port: u16,
    },
    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SliceConfig> {
    match path {
        Some(path) => Ok(SliceConfig::from_file(path)?),
        None => Ok(SliceConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            metrics_port,
        } => {
            let config = load_config(config.as_deref())?;
            daemon::run(config, data_dir, metrics_port).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["sliced", "run"]).unwrap();
        match cli.command {
            Command::Run {
                config,
                data_dir,
                metrics_port,
            } => {
                assert!(config.is_none());
                assert_eq!(data_dir, PathBuf::from("/var/lib/slicegrid"));
                assert_eq!(metrics_port, 9464);
            }
            Command::CheckConfig { .. } => panic!("expected run"),
        }
        assert!(!cli.log_json);
    }

    #[test]
    fn check_config_requires_path() {
        assert!(Cli::try_parse_from(["sliced", "check-config"]).is_err());
        let cli = Cli::try_parse_from(["sliced", "check-config", "--config", "a.toml", "--log-json"])
            .unwrap();
        assert!(cli.log_json);
    }

    #[test]
    fn missing_config_path_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), SliceConfig::default());
    }
}
