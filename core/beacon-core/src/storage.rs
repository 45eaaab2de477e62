//! Storage configuration and path management for Beacon.
//!
//! `StorageConfig` centralises every path the pipeline touches so tests can
//! redirect all of them into a temp directory with `StorageConfig::with_root()`.

use std::path::{Path, PathBuf};

const ROOT_DIR: &str = ".beacon";
const CONFIG_FILE: &str = ".beacon.cfg";

/// Central configuration for all Beacon storage paths.
///
/// Production code uses `StorageConfig::default()` which points to `~/.beacon/`
/// and `~/.beacon.cfg`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for Beacon data (default: ~/.beacon)
    root: PathBuf,
    /// Settings file shared with the settings UI (default: ~/.beacon.cfg)
    config_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            root: home.join(ROOT_DIR),
            config_file: home.join(CONFIG_FILE),
        }
    }
}

impl StorageConfig {
    /// Creates a StorageConfig rooted at `root`, with the settings file inside it.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        let config_file = root.join(CONFIG_FILE);
        Self { root, config_file }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Dependencies
    // ─────────────────────────────────────────────────────────────────────────────

    /// Directory that receives downloaded dependencies.
    pub fn deps_dir(&self) -> PathBuf {
        self.root.join("deps")
    }

    /// Directory the CLI archive extracts into (`<deps>/wakatime-master`).
    pub fn cli_install_dir(&self) -> PathBuf {
        self.deps_dir().join("wakatime-master")
    }

    /// The CLI entry script inside the install directory.
    pub fn cli_script(&self) -> PathBuf {
        self.cli_install_dir().join("wakatime").join("cli.py")
    }

    /// Directory holding the embedded runtime.
    pub fn embedded_runtime_dir(&self) -> PathBuf {
        self.deps_dir().join("python")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Logs
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
