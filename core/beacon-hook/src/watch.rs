//! `watch`: stdin activity stream into the engine.

use crate::HookError;
use beacon_core::{
    ActivitySource, BeaconEngine, EngineOptions, LineSource, PipelineConfig, StorageConfig,
};
use beacon_protocol::PluginMetadata;
use std::io;
use std::sync::Arc;
use std::time::Duration;

pub struct WatchOptions {
    pub editor: String,
    pub editor_version: String,
    pub interval: Duration,
    pub offline: bool,
}

pub fn run(storage: StorageConfig, options: WatchOptions) -> Result<(), HookError> {
    let metadata = PluginMetadata {
        editor_name: options.editor,
        editor_version: options.editor_version,
        plugin_name: env!("CARGO_PKG_NAME").to_string(),
        plugin_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let engine = Arc::new(BeaconEngine::with_options(
        storage,
        metadata,
        EngineOptions {
            pipeline: PipelineConfig {
                dispatch_interval: options.interval,
                ..PipelineConfig::default()
            },
            ..EngineOptions::default()
        },
    ));

    if engine.needs_api_key() {
        tracing::warn!("No API key configured; run `beacon-hook config set api_key <KEY>`");
    }

    if options.offline {
        tracing::info!("Offline: skipping dependency downloads");
        engine.start_offline()?;
    } else {
        engine.initialize()?;
    }

    let mut source = LineSource::new(io::stdin().lock());
    let streamed = source.subscribe(engine.clone());

    // The CLI may still be installing; the final flush needs it.
    engine.wait_for_dependency_check();
    engine.shutdown();
    streamed?;

    let stats = source.stats();
    tracing::info!(
        lines = stats.lines,
        accepted = stats.accepted,
        suppressed = stats.suppressed,
        rejected = stats.rejected,
        "Watch finished"
    );
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}
