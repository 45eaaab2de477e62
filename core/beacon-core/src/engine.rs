//! BeaconEngine - the entry point for editor hosts.
//!
//! The engine owns the whole pipeline and is the error boundary: nothing it
//! exposes panics or hands a pipeline failure back to the host. Failures are
//! logged and the call degrades to a no-op.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use beacon_core::BeaconEngine;
//!
//! let engine = BeaconEngine::new("vscode".into(), "1.90".into(), "beacon".into(), "0.3.0".into());
//! engine.initialize()?;
//! engine.record_activity("/src/main.rs".into(), false, false, false, Some("app".into()));
//! engine.shutdown();
//! ```

use crate::activity::ActivitySink;
use crate::config::{ConfigStore, SharedSettings};
use crate::dependencies::{CliResolver, DependencyManager, DependencyStatus};
use crate::error::BeaconFfiError;
use crate::heartbeat::{
    Dispatcher, HeartbeatClassifier, HeartbeatQueue, TickOutcome, DEFAULT_DEBOUNCE,
    DEFAULT_INTERVAL,
};
use crate::process::{CommandRunner, ProcessRunner, DEFAULT_TIMEOUT};
use crate::storage::StorageConfig;
use beacon_protocol::{ActivityEvent, Category, Heartbeat, PluginMetadata};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pipeline timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub debounce: Duration,
    pub dispatch_interval: Duration,
    pub cli_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            dispatch_interval: DEFAULT_INTERVAL,
            cli_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Overrides for [`BeaconEngine::with_options`]. Unset seams use the real
/// process runner and dependency manager.
#[derive(Default)]
pub struct EngineOptions {
    pub pipeline: PipelineConfig,
    pub runner: Option<Arc<dyn CommandRunner>>,
    pub resolver: Option<Arc<dyn CliResolver>>,
}

#[derive(uniffi::Object)]
pub struct BeaconEngine {
    storage: StorageConfig,
    settings: SharedSettings,
    classifier: HeartbeatClassifier,
    queue: Arc<HeartbeatQueue>,
    dependencies: Arc<DependencyManager>,
    dispatcher: Dispatcher,
    dependency_check: Mutex<Option<JoinHandle<()>>>,
}

impl BeaconEngine {
    /// Creates an engine with custom storage. Not exposed to FFI.
    pub fn with_storage(storage: StorageConfig, metadata: PluginMetadata) -> Self {
        Self::with_options(storage, metadata, EngineOptions::default())
    }

    pub fn with_options(
        storage: StorageConfig,
        metadata: PluginMetadata,
        options: EngineOptions,
    ) -> Self {
        let settings = SharedSettings::load(ConfigStore::with_storage(&storage));
        let dependencies = Arc::new(DependencyManager::new(storage.clone(), settings.clone()));
        let queue = Arc::new(HeartbeatQueue::new());

        let runner = options
            .runner
            .unwrap_or_else(|| Arc::new(ProcessRunner::new(options.pipeline.cli_timeout)));
        let resolver = options
            .resolver
            .unwrap_or_else(|| dependencies.clone() as Arc<dyn CliResolver>);

        let dispatcher = Dispatcher::new(
            queue.clone(),
            resolver,
            runner,
            settings.clone(),
            metadata,
            options.pipeline.dispatch_interval,
        );

        tracing::debug!(
            settings = ?settings.snapshot(),
            config = %storage.config_file().display(),
            "Engine created"
        );

        Self {
            storage,
            settings,
            classifier: HeartbeatClassifier::new(options.pipeline.debounce),
            queue,
            dependencies,
            dispatcher,
            dependency_check: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn dependencies(&self) -> &DependencyManager {
        &self.dependencies
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Classifies one event and queues a heartbeat if it is accepted.
    /// Invalid events (empty path and the like) are ignored.
    pub fn handle_activity(&self, event: ActivityEvent) -> bool {
        if let Err(err) = event.validate() {
            tracing::debug!(code = %err.code, message = %err.message, "Ignoring activity");
            return false;
        }

        if !self
            .classifier
            .classify(&event.path, event.is_write, event.timestamp)
        {
            return false;
        }

        let heartbeat = Heartbeat::from_event(&event);
        tracing::trace!(
            entity = %heartbeat.entity,
            is_write = heartbeat.is_write,
            category = heartbeat.category.as_str(),
            "Heartbeat queued"
        );
        self.queue.enqueue(heartbeat);
        true
    }

    /// Starts the dispatch timer without the dependency check.
    pub fn start_dispatcher(&self) -> crate::error::Result<()> {
        self.dispatcher.start()
    }

    /// Starts the dispatch timer after a local runtime probe. Nothing is
    /// downloaded or version-checked, so the CLI must already be installed.
    pub fn start_offline(&self) -> crate::error::Result<()> {
        match self.dependencies.ensure_runtime() {
            Ok(runtime) => tracing::debug!(runtime = %runtime.display(), "Runtime resolved"),
            Err(err) => tracing::warn!(error = %err, "Runtime unavailable; heartbeats will be dropped"),
        }
        self.start_dispatcher()
    }

    /// Runs one dispatch tick on the calling thread.
    pub fn tick(&self) -> TickOutcome {
        self.dispatcher.tick()
    }

    /// Blocks until the startup dependency check, if one was started, finishes.
    pub fn wait_for_dependency_check(&self) {
        let handle = self
            .dependency_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Dependency check thread panicked");
            }
        }
    }
}

impl ActivitySink for BeaconEngine {
    fn on_activity(&self, event: ActivityEvent) -> bool {
        self.handle_activity(event)
    }
}

#[uniffi::export]
impl BeaconEngine {
    /// Creates an engine using the default storage locations.
    #[uniffi::constructor]
    pub fn new(
        editor_name: String,
        editor_version: String,
        plugin_name: String,
        plugin_version: String,
    ) -> Self {
        Self::with_storage(
            StorageConfig::default(),
            PluginMetadata {
                editor_name,
                editor_version,
                plugin_name,
                plugin_version,
            },
        )
    }

    /// Starts the dispatch timer and checks dependencies on a background thread.
    pub fn initialize(&self) -> Result<(), BeaconFfiError> {
        self.start_dispatcher().map_err(|err| {
            tracing::warn!(error = %err, "Could not start dispatcher");
            BeaconFfiError::from(err)
        })?;

        let mut slot = self
            .dependency_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        let dependencies = Arc::clone(&self.dependencies);
        let spawned = thread::Builder::new()
            .name("beacon-deps".to_string())
            .spawn(move || {
                for status in dependencies.check_all() {
                    tracing::info!(
                        name = %status.name,
                        found = status.found,
                        detail = status.detail.as_deref().unwrap_or(""),
                        "Dependency check"
                    );
                }
            });

        match spawned {
            Ok(handle) => *slot = Some(handle),
            Err(err) => tracing::warn!(error = %err, "Could not start dependency check"),
        }
        Ok(())
    }

    /// Host callback for one editor activity. Returns true when a heartbeat was queued.
    pub fn record_activity(
        &self,
        path: String,
        is_write: bool,
        build_running: bool,
        debugger_in_break: bool,
        project: Option<String>,
    ) -> bool {
        let mut event = ActivityEvent::new(path, is_write, Utc::now())
            .with_category(Category::from_host_state(build_running, debugger_in_break));
        event.project = project;
        self.handle_activity(event)
    }

    /// Re-reads the settings file. Hosts call this after their settings UI saves.
    pub fn reload_settings(&self) {
        let settings = self.settings.reload();
        tracing::debug!(settings = ?settings, "Settings reloaded");
    }

    pub fn needs_api_key(&self) -> bool {
        !self.settings.snapshot().has_api_key()
    }

    /// Runs the dependency checks on the calling thread. Blocks on the network.
    pub fn check_dependencies(&self) -> Vec<DependencyStatus> {
        self.dependencies.check_all()
    }

    pub fn queued_heartbeats(&self) -> u64 {
        self.queue.len() as u64
    }

    /// Sends everything queued now, on the calling thread.
    pub fn flush(&self) {
        let outcome = self.dispatcher.flush();
        tracing::debug!(?outcome, "Flushed");
    }

    /// Stops the timer and sends whatever is still queued.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        tracing::debug!("Engine shut down");
    }
}
