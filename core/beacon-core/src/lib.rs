//! # beacon-core
//!
//! Turns a host editor's activity stream into rate-limited heartbeats and
//! hands them, in batches, to the external telemetry CLI.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Background work runs on plain threads.
//! - **Thread-safe entry points**: Hosts may report activity from any thread.
//! - **Best-effort**: Failures are logged and dropped, never surfaced to the host.
//!   Delivery is at-most-once; nothing is persisted between runs.
//! - **FFI-ready**: UniFFI annotations enable Swift, Kotlin, Python bindings.
//!   Prefer additive public API changes; removing or renaming breaks FFI clients.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use beacon_core::BeaconEngine;
//!
//! let engine = BeaconEngine::new("editor".into(), "1.0".into(), "beacon".into(), "0.3.0".into());
//! engine.initialize()?;
//! engine.record_activity("/src/lib.rs".into(), true, false, false, None);
//! engine.shutdown();
//! ```

// UniFFI scaffolding for Swift/Kotlin/Python bindings
uniffi::setup_scaffolding!();

// Public modules
pub mod activity;
pub mod config;
pub mod dependencies;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod http;
pub mod patterns;
pub mod process;
pub mod proxy;
pub mod storage;

// Re-export commonly used items at crate root
pub use activity::{ActivitySink, ActivitySource, LineSource, LineStats};
pub use config::{ConfigStore, Settings, SharedSettings};
pub use dependencies::{CliResolver, CliStatus, DependencyManager, DependencyStatus, ResolvedCli};
pub use engine::{BeaconEngine, EngineOptions, PipelineConfig};
pub use error::{BeaconError, BeaconFfiError, Result};
pub use heartbeat::{Dispatcher, HeartbeatClassifier, HeartbeatQueue, TickOutcome};
pub use process::{CommandRunner, Invocation, ProcessOutput, ProcessRunner};
pub use proxy::{ProxyConfig, ProxyEndpoint};
pub use storage::StorageConfig;

pub use beacon_protocol::{ActivityEvent, Category, Heartbeat, HeartbeatBatch, PluginMetadata};
