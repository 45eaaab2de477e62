//! beacon-hook: command-line adapter for the Beacon heartbeat pipeline.
//!
//! For editors whose extension APIs can only shell out. The editor keeps one
//! `beacon-hook watch` process alive and writes one JSON activity event per
//! line to its stdin.
//!
//! ## Subcommands
//!
//! - `watch`: Reads activity events from stdin until EOF, then flushes
//! - `deps`: Checks the runtime and CLI, installing or updating the CLI
//! - `config get|set`: Reads or writes one key of the settings file

mod deps;
mod logging;
mod settings;
mod watch;

use beacon_core::config::KEY_DEBUG;
use beacon_core::{BeaconError, BeaconFfiError, ConfigStore, StorageConfig};
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "beacon-hook")]
#[command(about = "Editor activity to heartbeat adapter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read activity events (one JSON object per line) from stdin and send heartbeats
    Watch {
        /// Editor name reported to the backend
        #[arg(long, default_value = "beacon-hook")]
        editor: String,

        /// Editor version reported to the backend
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        editor_version: String,

        /// Seconds between dispatch ticks
        #[arg(long, default_value_t = 8)]
        interval: u64,

        /// Use the installed runtime and CLI as they are (no network access)
        #[arg(long)]
        offline: bool,
    },

    /// Check the runtime and CLI, installing the CLI when missing or outdated
    Deps,

    /// Read or change a setting
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the value of a setting
    Get {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Store a value for a setting
    Set {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(value_name = "VALUE")]
        value: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Beacon(#[from] BeaconError),

    #[error(transparent)]
    Engine(#[from] BeaconFfiError),

    #[error("Failed to render output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting name: {0:?}")]
    InvalidKey(String),

    #[error("Setting not found: {0}")]
    NotSet(String),

    #[error("Missing dependencies: {0}")]
    MissingDependencies(String),
}

fn main() {
    let cli = Cli::parse();
    let storage = StorageConfig::default();
    let debug = ConfigStore::with_storage(&storage).get_setting_bool(KEY_DEBUG, false);
    let _logging_guard = logging::init(&storage, debug);

    let result = match cli.command {
        Commands::Watch {
            editor,
            editor_version,
            interval,
            offline,
        } => watch::run(
            storage,
            watch::WatchOptions {
                editor,
                editor_version,
                interval: Duration::from_secs(interval.max(1)),
                offline,
            },
        ),
        Commands::Deps => deps::run(storage),
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => settings::get(&storage, &key),
            ConfigAction::Set { key, value } => settings::set(&storage, &key, &value),
        },
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "beacon-hook failed");
        eprintln!("beacon-hook: {}", e);
        std::process::exit(1);
    }
}
