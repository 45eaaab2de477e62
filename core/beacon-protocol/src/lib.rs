//! Heartbeat wire types shared by beacon-core and host adapters.
//!
//! This crate owns two contracts:
//! - the activity events hosts hand to the pipeline (validated here so every
//!   adapter rejects the same malformed input), and
//! - the argument vector and stdin payload passed to the external telemetry CLI.
//!
//! Keeping both in one place prevents drift between the core and adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_EVENT_BYTES: usize = 64 * 1024;
pub const MAX_PATH_LEN: usize = 4096;

/// Prefix used when rendering an obfuscated API key. Only the last four
/// characters of the real key are kept.
const OBFUSCATED_KEY_PREFIX: &str = "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXX";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Activity
// ═══════════════════════════════════════════════════════════════════════════════

/// What the user was doing when the activity happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Coding,
    Building,
    Debugging,
}

impl Category {
    /// Derives the category the way editor hosts report it: an active build
    /// wins over a paused debugger, everything else is coding.
    pub fn from_host_state(build_running: bool, debugger_in_break: bool) -> Self {
        if build_running {
            Category::Building
        } else if debugger_in_break {
            Category::Debugging
        } else {
            Category::Coding
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Coding => "coding",
            Category::Building => "building",
            Category::Debugging => "debugging",
        }
    }
}

/// A single editor activity reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityEvent {
    pub path: String,
    #[serde(default)]
    pub is_write: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub project: Option<String>,
}

impl ActivityEvent {
    pub fn new(path: impl Into<String>, is_write: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            is_write,
            timestamp,
            category: Category::Coding,
            project: None,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.path.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_path", "path is required"));
        }
        if self.path.len() > MAX_PATH_LEN {
            return Err(ErrorInfo::new("invalid_path", "path is too long"));
        }
        if self.path.contains('\0') {
            return Err(ErrorInfo::new("invalid_path", "path contains a NUL byte"));
        }
        Ok(())
    }
}

/// Parses one newline-delimited activity event as sent by shell-out adapters.
pub fn parse_activity_event(line: &str) -> Result<ActivityEvent, ErrorInfo> {
    if line.len() > MAX_EVENT_BYTES {
        return Err(ErrorInfo::new("event_too_large", "event exceeds size limit"));
    }
    let event: ActivityEvent = serde_json::from_str(line.trim())
        .map_err(|err| ErrorInfo::new("invalid_json", err.to_string()))?;
    event.validate()?;
    Ok(event)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Heartbeats
// ═══════════════════════════════════════════════════════════════════════════════

/// A timestamped record that the user was active on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub entity: String,
    pub timestamp: DateTime<Utc>,
    pub project: Option<String>,
    pub is_write: bool,
    pub category: Category,
}

impl Heartbeat {
    pub fn from_event(event: &ActivityEvent) -> Self {
        Self {
            entity: event.path.clone(),
            timestamp: event.timestamp,
            project: event
                .project
                .as_ref()
                .filter(|name| !name.trim().is_empty())
                .cloned(),
            is_write: event.is_write,
            category: event.category,
        }
    }

    /// Seconds since the Unix epoch with a sub-second fraction.
    pub fn epoch_seconds(&self) -> f64 {
        self.timestamp.timestamp() as f64
            + f64::from(self.timestamp.timestamp_subsec_micros()) / 1_000_000.0
    }

    /// `--time` argument rendering (`<seconds>.<micros>`), truncated toward
    /// zero so pre-epoch times keep their magnitude.
    pub fn time_arg(&self) -> String {
        let micros = self.timestamp.timestamp_micros();
        let sign = if micros < 0 { "-" } else { "" };
        let magnitude = micros.unsigned_abs();
        format!(
            "{}{}.{:06}",
            sign,
            magnitude / 1_000_000,
            magnitude % 1_000_000
        )
    }
}

/// Shape of each element of the extra-heartbeats stdin payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraHeartbeat {
    pub entity: String,
    pub timestamp: f64,
    pub is_write: bool,
    pub project: Option<String>,
}

impl From<&Heartbeat> for ExtraHeartbeat {
    fn from(heartbeat: &Heartbeat) -> Self {
        Self {
            entity: heartbeat.entity.clone(),
            timestamp: heartbeat.epoch_seconds(),
            is_write: heartbeat.is_write,
            project: heartbeat.project.clone(),
        }
    }
}

/// The primary heartbeat plus the extras sent with it in one CLI invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatBatch {
    pub primary: Heartbeat,
    pub extras: Vec<Heartbeat>,
}

// Never empty: a batch always has a primary heartbeat.
#[allow(clippy::len_without_is_empty)]
impl HeartbeatBatch {
    pub fn new(primary: Heartbeat, extras: Vec<Heartbeat>) -> Self {
        Self { primary, extras }
    }

    pub fn len(&self) -> usize {
        1 + self.extras.len()
    }

    pub fn has_extras(&self) -> bool {
        !self.extras.is_empty()
    }

    /// Compact JSON array for the CLI's stdin, or `None` when there are no extras.
    pub fn extras_payload(&self) -> Result<Option<String>, serde_json::Error> {
        if self.extras.is_empty() {
            return Ok(None);
        }
        let extras: Vec<ExtraHeartbeat> = self.extras.iter().map(ExtraHeartbeat::from).collect();
        serde_json::to_string(&extras).map(Some)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Invocation
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifies the editor and plugin to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub editor_name: String,
    pub editor_version: String,
    pub plugin_name: String,
    pub plugin_version: String,
}

impl PluginMetadata {
    /// `<editor>/<editorVersion> <plugin>/<pluginVersion>`
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} {}/{}",
            self.editor_name, self.editor_version, self.plugin_name, self.plugin_version
        )
    }
}

/// Argument vector for one CLI invocation. The order of flags is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub cli_path: String,
    pub api_key: String,
    pub entity: String,
    pub time: String,
    pub plugin: String,
    pub is_write: bool,
    pub project: Option<String>,
    pub has_extra_heartbeats: bool,
}

impl CliArgs {
    pub fn for_batch(
        cli_path: impl Into<String>,
        api_key: impl Into<String>,
        metadata: &PluginMetadata,
        batch: &HeartbeatBatch,
    ) -> Self {
        Self {
            cli_path: cli_path.into(),
            api_key: api_key.into(),
            entity: batch.primary.entity.clone(),
            time: batch.primary.time_arg(),
            plugin: metadata.user_agent(),
            is_write: batch.primary.is_write,
            project: batch.primary.project.clone(),
            has_extra_heartbeats: batch.has_extras(),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.build(self.api_key.clone())
    }

    /// Same vector with the API key masked, for logs.
    pub fn obfuscated(&self) -> Vec<String> {
        self.build(obfuscate_api_key(&self.api_key))
    }

    fn build(&self, key: String) -> Vec<String> {
        let mut args = vec![
            self.cli_path.clone(),
            "--key".to_string(),
            key,
            "--entity".to_string(),
            self.entity.clone(),
            "--time".to_string(),
            self.time.clone(),
            "--plugin".to_string(),
            self.plugin.clone(),
        ];

        if self.is_write {
            args.push("--write".to_string());
        }

        if let Some(project) = self.project.as_ref().filter(|p| !p.is_empty()) {
            args.push("--project".to_string());
            args.push(project.clone());
        }

        if self.has_extra_heartbeats {
            args.push("--extra-heartbeats".to_string());
        }

        args
    }
}

/// Masks an API key, keeping only its last four characters.
pub fn obfuscate_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return OBFUSCATED_KEY_PREFIX.to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", OBFUSCATED_KEY_PREFIX, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, micros: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, micros * 1000).single().expect("valid time")
    }

    fn heartbeat(entity: &str, secs: i64, is_write: bool) -> Heartbeat {
        Heartbeat {
            entity: entity.to_string(),
            timestamp: at(secs, 0),
            project: None,
            is_write,
            category: Category::Coding,
        }
    }

    fn metadata() -> PluginMetadata {
        PluginMetadata {
            editor_name: "visualstudio".to_string(),
            editor_version: "17.9".to_string(),
            plugin_name: "beacon".to_string(),
            plugin_version: "0.3.0".to_string(),
        }
    }

    #[test]
    fn category_prefers_building_over_debugging() {
        assert_eq!(Category::from_host_state(true, true), Category::Building);
        assert_eq!(Category::from_host_state(false, true), Category::Debugging);
        assert_eq!(Category::from_host_state(false, false), Category::Coding);
    }

    #[test]
    fn parses_minimal_event_with_defaults() {
        let event = parse_activity_event(r#"{"path":"/src/main.rs"}"#).expect("event");
        assert_eq!(event.path, "/src/main.rs");
        assert!(!event.is_write);
        assert_eq!(event.category, Category::Coding);
        assert!(event.project.is_none());
    }

    #[test]
    fn parses_full_event() {
        let line = r#"{"path":"/a.rs","is_write":true,"timestamp":"2026-01-31T00:00:10Z","category":"debugging","project":"demo"}"#;
        let event = parse_activity_event(line).expect("event");
        assert!(event.is_write);
        assert_eq!(event.category, Category::Debugging);
        assert_eq!(event.project.as_deref(), Some("demo"));
        assert_eq!(event.timestamp.timestamp(), 1_769_817_610);
    }

    #[test]
    fn rejects_empty_path() {
        let err = parse_activity_event(r#"{"path":"  "}"#).unwrap_err();
        assert_eq!(err.code, "invalid_path");
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_activity_event(r#"{"path":"/a","extra":1}"#).unwrap_err();
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn rejects_oversized_event() {
        let line = format!(r#"{{"path":"{}"}}"#, "a".repeat(MAX_EVENT_BYTES));
        let err = parse_activity_event(&line).unwrap_err();
        assert_eq!(err.code, "event_too_large");
    }

    #[test]
    fn heartbeat_drops_blank_project() {
        let event = ActivityEvent::new("/a.rs", false, at(10, 0)).with_project("  ");
        assert!(Heartbeat::from_event(&event).project.is_none());
    }

    #[test]
    fn time_arg_keeps_sub_second_fraction() {
        let mut hb = heartbeat("/a.rs", 1_700_000_000, false);
        hb.timestamp = at(1_700_000_000, 250_000);
        assert_eq!(hb.time_arg(), "1700000000.250000");
        assert!((hb.epoch_seconds() - 1_700_000_000.25).abs() < 1e-6);
    }

    #[test]
    fn time_arg_before_epoch_keeps_magnitude() {
        let mut hb = heartbeat("/a.rs", 0, false);
        hb.timestamp = at(-5, 500_000);
        assert_eq!(hb.time_arg(), "-4.500000");
        assert!((hb.epoch_seconds() + 4.5).abs() < 1e-6);

        hb.timestamp = at(-1, 750_000);
        assert_eq!(hb.time_arg(), "-0.250000");
    }

    #[test]
    fn args_follow_fixed_order() {
        let mut primary = heartbeat("/src/lib.rs", 1_700_000_000, true);
        primary.project = Some("demo".to_string());
        let batch = HeartbeatBatch::new(primary, vec![heartbeat("/b.rs", 1_700_000_001, false)]);
        let args = CliArgs::for_batch("/opt/cli.py", "secret-key-1234", &metadata(), &batch);

        assert_eq!(
            args.to_vec(),
            vec![
                "/opt/cli.py",
                "--key",
                "secret-key-1234",
                "--entity",
                "/src/lib.rs",
                "--time",
                "1700000000.000000",
                "--plugin",
                "visualstudio/17.9 beacon/0.3.0",
                "--write",
                "--project",
                "demo",
                "--extra-heartbeats",
            ]
        );
    }

    #[test]
    fn args_omit_optional_flags() {
        let batch = HeartbeatBatch::new(heartbeat("/a.rs", 5, false), vec![]);
        let args = CliArgs::for_batch("cli", "key", &metadata(), &batch).to_vec();
        assert_eq!(args.len(), 9);
        assert!(!args.contains(&"--write".to_string()));
        assert!(!args.contains(&"--project".to_string()));
        assert!(!args.contains(&"--extra-heartbeats".to_string()));
    }

    #[test]
    fn path_with_spaces_stays_one_argument() {
        let batch = HeartbeatBatch::new(heartbeat("/My Projects/a b.rs", 5, false), vec![]);
        let args = CliArgs::for_batch("cli", "key", &metadata(), &batch).to_vec();
        assert_eq!(args[4], "/My Projects/a b.rs");
    }

    #[test]
    fn obfuscation_keeps_last_four() {
        let masked = obfuscate_api_key("12345678-aaaa-bbbb-cccc-0000abcd");
        assert_eq!(masked, "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXabcd");
        assert_eq!(obfuscate_api_key("abc"), OBFUSCATED_KEY_PREFIX);
    }

    #[test]
    fn obfuscated_args_hide_key() {
        let batch = HeartbeatBatch::new(heartbeat("/a.rs", 5, false), vec![]);
        let args = CliArgs::for_batch("cli", "supersecret9999", &metadata(), &batch);
        let rendered = args.obfuscated().join(" ");
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("9999"));
    }

    #[test]
    fn extras_payload_is_compact_array_in_order() {
        let mut second = heartbeat("/c.rs", 3, true);
        second.project = Some("demo".to_string());
        let batch = HeartbeatBatch::new(
            heartbeat("/a.rs", 1, false),
            vec![heartbeat("/b.rs", 2, false), second],
        );

        let payload = batch.extras_payload().unwrap().expect("payload");
        assert!(!payload.contains('\n'));
        let parsed: Vec<ExtraHeartbeat> = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].entity, "/b.rs");
        assert_eq!(parsed[1].entity, "/c.rs");
        assert!(parsed[1].is_write);
        assert_eq!(parsed[1].project.as_deref(), Some("demo"));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn no_payload_without_extras() {
        let batch = HeartbeatBatch::new(heartbeat("/a.rs", 1, false), vec![]);
        assert!(batch.extras_payload().unwrap().is_none());
    }
}
