//! Error types for beacon-core operations.
//! Keep BeaconFfiError minimal and stable to avoid breaking FFI clients.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// FFI-Compatible Error (for Swift/Kotlin/Python hosts)
// ═══════════════════════════════════════════════════════════════════════════════

/// FFI-safe error type for use across language boundaries.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum BeaconFfiError {
    #[error("{message}")]
    General { message: String },
}

impl From<BeaconError> for BeaconFfiError {
    fn from(err: BeaconError) -> Self {
        BeaconFfiError::General {
            message: err.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Internal Error (for Rust-only use)
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur inside the heartbeat pipeline.
///
/// None of these escape to the host: the engine logs them and carries on.
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────
    #[error("Settings unavailable at {path}: {details}")]
    ConfigUnavailable { path: PathBuf, details: String },

    #[error("Settings write failed: {path}: {details}")]
    ConfigWriteFailed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Dependencies
    // ─────────────────────────────────────────────────────────────────────
    #[error("Dependency missing: {0}")]
    DependencyMissing(String),

    #[error("Network request failed: {url}: {details} (check the proxy setting: {proxy_hint})")]
    NetworkFailure {
        url: String,
        details: String,
        proxy_hint: String,
    },

    #[error("Archive extraction failed: {path}: {details}")]
    Archive { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Process
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to spawn process: {command}: {source}")]
    ProcessSpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CLI exited with status {code:?}: {stderr}")]
    CliExited { code: Option<i32>, stderr: String },

    #[error("CLI did not finish within {timeout_secs}s: {command}")]
    CliTimedOut { command: String, timeout_secs: u64 },

    // ─────────────────────────────────────────────────────────────────────
    // I/O
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl BeaconError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BeaconError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using BeaconError.
pub type Result<T> = std::result::Result<T, BeaconError>;
