//! Settings persistence.
//!
//! The settings file is INI-style and shared with the host's settings UI and
//! the CLI itself, so writes only touch the keys being changed and leave every
//! other line (comments, unknown keys, other sections) as it was.
//!
//! Reads never fail: a missing or unreadable file yields defaults.

use crate::error::{BeaconError, Result};
use crate::patterns::{RE_INI_ENTRY, RE_INI_SECTION};
use crate::storage::StorageConfig;
use beacon_protocol::obfuscate_api_key;
use fs_err as fs;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;

pub const SETTINGS_SECTION: &str = "settings";
pub const KEY_API_KEY: &str = "api_key";
pub const KEY_PROXY: &str = "proxy";
pub const KEY_DEBUG: &str = "debug";
pub const KEY_DISABLE_THREADING: &str = "disable_threading";

/// Typed view of the settings the pipeline consumes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub proxy: String,
    pub debug: bool,
    pub disable_threading: bool,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_empty() {
            String::new()
        } else {
            obfuscate_api_key(&self.api_key)
        };
        f.debug_struct("Settings")
            .field("api_key", &api_key)
            .field("proxy_set", &!self.proxy.is_empty())
            .field("debug", &self.debug)
            .field("disable_threading", &self.disable_threading)
            .finish()
    }
}

impl Settings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConfigStore
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn with_storage(storage: &StorageConfig) -> Self {
        Self::new(storage.config_file().to_path_buf())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads settings, falling back to defaults when the file is unavailable.
    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!(error = %err, "Using default settings");
                Settings::default()
            }
        }
    }

    pub fn try_load(&self) -> Result<Settings> {
        let doc = self.read_document()?;
        Ok(Settings {
            api_key: doc.get(SETTINGS_SECTION, KEY_API_KEY).unwrap_or_default(),
            proxy: doc.get(SETTINGS_SECTION, KEY_PROXY).unwrap_or_default(),
            debug: parse_bool(doc.get(SETTINGS_SECTION, KEY_DEBUG)).unwrap_or(false),
            disable_threading: parse_bool(doc.get(SETTINGS_SECTION, KEY_DISABLE_THREADING))
                .unwrap_or(false),
        })
    }

    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.read_document()
            .ok()
            .and_then(|doc| doc.get(SETTINGS_SECTION, key))
    }

    pub fn get_setting_bool(&self, key: &str, default: bool) -> bool {
        parse_bool(self.get_setting(key)).unwrap_or(default)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut doc = self.read_document().unwrap_or_default();
        doc.set(SETTINGS_SECTION, key, value.trim());
        self.write_document(&doc)
    }

    /// Persists the typed settings. An empty API key never overwrites a stored one.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let mut doc = self.read_document().unwrap_or_default();
        if settings.has_api_key() {
            doc.set(SETTINGS_SECTION, KEY_API_KEY, settings.api_key.trim());
        }
        doc.set(SETTINGS_SECTION, KEY_PROXY, settings.proxy.trim());
        doc.set(SETTINGS_SECTION, KEY_DEBUG, bool_str(settings.debug));
        doc.set(
            SETTINGS_SECTION,
            KEY_DISABLE_THREADING,
            bool_str(settings.disable_threading),
        );
        self.write_document(&doc)
    }

    fn read_document(&self) -> Result<IniDocument> {
        let content =
            fs::read_to_string(&self.path).map_err(|err| BeaconError::ConfigUnavailable {
                path: self.path.clone(),
                details: err.to_string(),
            })?;
        Ok(IniDocument::parse(&content))
    }

    fn write_document(&self, doc: &IniDocument) -> Result<()> {
        let write_failed = |details: String| BeaconError::ConfigWriteFailed {
            path: self.path.clone(),
            details,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| write_failed(e.to_string()))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| write_failed(e.to_string()))?;
        temp.write_all(doc.render().as_bytes())
            .map_err(|e| write_failed(e.to_string()))?;
        temp.flush().map_err(|e| write_failed(e.to_string()))?;
        temp.persist(&self.path)
            .map_err(|e| write_failed(e.error.to_string()))?;
        Ok(())
    }
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared Settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings snapshot shared by the dispatcher and dependency manager.
///
/// Re-read only when the host signals that settings were saved.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    store: Arc<ConfigStore>,
    current: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn load(store: ConfigStore) -> Self {
        let settings = store.load();
        Self::new(store, settings)
    }

    pub fn new(store: ConfigStore, settings: Settings) -> Self {
        Self {
            store: Arc::new(store),
            current: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn reload(&self) -> Settings {
        let fresh = self.store.load();
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = fresh.clone();
        fresh
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INI Document
// ═══════════════════════════════════════════════════════════════════════════════

/// Line-preserving INI document: edits replace or insert single lines only.
#[derive(Debug, Default, Clone)]
struct IniDocument {
    lines: Vec<String>,
}

impl IniDocument {
    fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    fn get(&self, section: &str, key: &str) -> Option<String> {
        let mut in_section = false;
        for line in &self.lines {
            if let Some(caps) = RE_INI_SECTION.captures(line) {
                in_section = caps[1].trim().eq_ignore_ascii_case(section);
                continue;
            }
            if !in_section {
                continue;
            }
            if let Some(caps) = RE_INI_ENTRY.captures(line) {
                if caps[1].eq_ignore_ascii_case(key) {
                    return Some(caps[2].to_string());
                }
            }
        }
        None
    }

    fn set(&mut self, section: &str, key: &str, value: &str) {
        let entry = format!("{} = {}", key, value);
        let mut in_section = false;
        let mut section_found = false;
        let mut insert_at = None;

        for (index, line) in self.lines.iter().enumerate() {
            if let Some(caps) = RE_INI_SECTION.captures(line) {
                in_section = caps[1].trim().eq_ignore_ascii_case(section);
                if in_section {
                    section_found = true;
                    insert_at = Some(index + 1);
                }
                continue;
            }
            if !in_section {
                continue;
            }
            if let Some(caps) = RE_INI_ENTRY.captures(line) {
                if caps[1].eq_ignore_ascii_case(key) {
                    self.lines[index] = entry;
                    return;
                }
                insert_at = Some(index + 1);
            }
        }

        match (section_found, insert_at) {
            (true, Some(index)) => self.lines.insert(index, entry),
            _ => {
                if self.lines.last().is_some_and(|line| !line.trim().is_empty()) {
                    self.lines.push(String::new());
                }
                self.lines.push(format!("[{}]", section));
                self.lines.push(entry);
            }
        }
    }
}
