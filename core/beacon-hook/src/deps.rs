//! `deps`: run the dependency checks in the foreground and report.

use crate::HookError;
use beacon_core::{ConfigStore, DependencyManager, SharedSettings, StorageConfig};

pub fn run(storage: StorageConfig) -> Result<(), HookError> {
    let settings = SharedSettings::load(ConfigStore::with_storage(&storage));
    let manager = DependencyManager::new(storage, settings);

    let report = manager.check_all();
    let mut missing = Vec::new();
    for status in &report {
        println!(
            "{:<8} {:<8} {}{}",
            status.name,
            if status.found { "found" } else { "missing" },
            status.path.as_deref().unwrap_or("-"),
            status
                .detail
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
        if !status.found {
            missing.push(status.name.clone());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(HookError::MissingDependencies(missing.join(", ")))
    }
}
