// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tally - chat-to-ledger message monitor.
//!
//! This is the binary entry point. `serve` and `start` run the engine until
//! SIGINT/SIGTERM; every other subcommand works directly on the ledger and
//! exits.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod stats;
mod status;
mod targets;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tally_config::{ConfigError, TallyConfig};

/// Tally - chat-to-ledger message monitor.
#[derive(Parser, Debug)]
#[command(name = "tally", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Monitor every configured and registered chat target.
    Serve,
    /// Register a chat target without starting it.
    Add {
        target: String,
        /// Seconds between polls for this target.
        #[arg(long)]
        poll_interval: Option<u64>,
        /// Downstream attempts per failed message.
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Monitor a single chat target.
    Start { target: String },
    /// Forget everything recorded for a chat target.
    Reset {
        target: String,
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
    /// Show registered targets and their ledger state.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Show processing counters for one target or all of them.
    Stats {
        target: Option<String>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete processed records and log rows older than the retention period.
    Cleanup {
        /// Override `storage.retention_days`.
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Loads and validates configuration from `path`, or from the standard
/// hierarchy when no path is given.
fn load_config(path: Option<&Path>) -> Result<TallyConfig, Vec<ConfigError>> {
    match path {
        Some(path) => tally_config::load_and_validate_path(path),
        None => tally_config::load_and_validate(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            tally_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config, None).await,
        Some(Commands::Start { target }) => serve::run_serve(config, Some(target)).await,
        Some(Commands::Add {
            target,
            poll_interval,
            max_retries,
        }) => targets::run_add(&config, &target, poll_interval, max_retries).await,
        Some(Commands::Reset { target, yes }) => targets::run_reset(&config, &target, yes).await,
        Some(Commands::Status { json, plain }) => status::run_status(&config, json, plain).await,
        Some(Commands::Stats { target, json }) => {
            stats::run_stats(&config, target.as_deref(), json).await
        }
        Some(Commands::Cleanup { days }) => stats::run_cleanup(&config, days).await,
        None => {
            println!("tally: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["tally", "add", "alice", "--poll-interval", "7"]).unwrap();
        match cli.command {
            Some(Commands::Add {
                target,
                poll_interval,
                max_retries,
            }) => {
                assert_eq!(target, "alice");
                assert_eq!(poll_interval, Some(7));
                assert_eq!(max_retries, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["tally", "--config", "/tmp/t.toml", "status", "--json"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/t.toml")));
        assert!(matches!(cli.command, Some(Commands::Status { json: true, plain: false })));
    }

    #[test]
    #[serial]
    fn explicit_config_file_is_merged_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(
            &path,
            "[engine]\npoll_interval_secs = 9\ntargets = [\"alice\"]\n",
        )
        .unwrap();

        // SAFETY: serialized with every other test that touches the environment.
        unsafe { std::env::set_var("TALLY_ENGINE_MAX_RETRIES", "5") };
        let config = load_config(Some(&path));
        unsafe { std::env::remove_var("TALLY_ENGINE_MAX_RETRIES") };

        let config = config.unwrap();
        assert_eq!(config.engine.poll_interval_secs, 9);
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.engine.targets, vec!["alice".to_string()]);
    }

    #[test]
    #[serial]
    fn invalid_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "[engine]\nburst_limit = 2\nburst_keep = 5\n").unwrap();

        let errors = load_config(Some(&path)).unwrap_err();
        assert!(!errors.is_empty());
    }
}
