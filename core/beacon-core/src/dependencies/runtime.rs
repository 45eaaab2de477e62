//! Interpreter discovery.
//!
//! Candidate sources are tried in a fixed priority order and each candidate
//! is accepted only if `<candidate> --version` exits successfully. The first
//! success is cached for the life of the process; nothing is re-probed after
//! that, even if the runtime later moves.

use super::Probe;
use crate::error::{BeaconError, Result};
use crate::patterns::RE_ASSOCIATION_COMMAND;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

const VERSION_ARG: &str = "--version";
#[cfg(windows)]
const PYTHON_OPEN_COMMAND_KEY: &str = r"Python.File\shell\open\command";

/// A place to look for the interpreter.
pub trait RuntimeSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Paths to probe, most preferred first. May be empty.
    fn candidates(&self) -> Vec<PathBuf>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime extracted into Beacon's own dependency directory.
pub struct EmbeddedRuntime {
    dir: PathBuf,
}

impl EmbeddedRuntime {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl RuntimeSource for EmbeddedRuntime {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn candidates(&self) -> Vec<PathBuf> {
        if cfg!(windows) {
            vec![self.dir.join("pythonw.exe"), self.dir.join("python.exe")]
        } else {
            vec![self.dir.join("bin").join("python3"), self.dir.join("python3")]
        }
    }
}

/// The system's registered interpreter: the `Python.File` open command on
/// Windows, the `PATH` lookup elsewhere.
pub struct SystemAssociation;

impl RuntimeSource for SystemAssociation {
    fn name(&self) -> &'static str {
        "association"
    }

    fn candidates(&self) -> Vec<PathBuf> {
        if cfg!(windows) {
            registry_open_command()
                .and_then(|command| interpreter_from_association(&command))
                .into_iter()
                .collect()
        } else {
            ["python3", "python"]
                .iter()
                .filter_map(|binary| which(binary))
                .collect()
        }
    }
}

/// Conventional install locations, checked directly because GUI hosts often
/// do not inherit the shell's `PATH`.
pub struct FixedPaths {
    paths: Vec<PathBuf>,
}

impl FixedPaths {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn conventional() -> Self {
        Self::new(conventional_paths())
    }
}

impl RuntimeSource for FixedPaths {
    fn name(&self) -> &'static str {
        "fixed-path"
    }

    fn candidates(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }
}

fn conventional_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if cfg!(windows) {
        for minor in 26..=50 {
            paths.push(PathBuf::from(format!("\\python{}\\pythonw", minor)));
            paths.push(PathBuf::from(format!("\\Python{}\\pythonw", minor)));
        }
    } else {
        for path in [
            "/usr/bin/python3",
            "/usr/local/bin/python3",
            "/opt/homebrew/bin/python3", // Homebrew (Apple Silicon)
            "/usr/bin/python",
        ] {
            paths.push(PathBuf::from(path));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".local/bin/python3"));
        }
    }
    paths
}

/// Default value of `HKCR\Python.File\shell\open\command`.
#[cfg(windows)]
fn registry_open_command() -> Option<String> {
    use winreg::enums::HKEY_CLASSES_ROOT;
    use winreg::RegKey;

    let key = RegKey::predef(HKEY_CLASSES_ROOT)
        .open_subkey(PYTHON_OPEN_COMMAND_KEY)
        .ok()?;
    key.get_value::<String, _>("").ok()
}

#[cfg(not(windows))]
fn registry_open_command() -> Option<String> {
    None
}

/// Maps an association command such as `"C:\Python39\python.exe" "%1" %*`
/// to the windowless interpreter next to it.
pub fn interpreter_from_association(command: &str) -> Option<PathBuf> {
    let caps = RE_ASSOCIATION_COMMAND.captures(command)?;
    Some(PathBuf::from(format!("{}\\pythonw.exe", &caps[1])))
}

fn which(binary: &str) -> Option<PathBuf> {
    let output = Command::new("which").arg(binary).output().ok()?;

    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// Locator
// ═══════════════════════════════════════════════════════════════════════════════

pub struct RuntimeLocator {
    sources: Vec<Box<dyn RuntimeSource>>,
    probe: Arc<dyn Probe>,
    // Held across probing so concurrent callers never probe twice.
    resolved: Mutex<Option<PathBuf>>,
}

impl RuntimeLocator {
    pub fn new(sources: Vec<Box<dyn RuntimeSource>>, probe: Arc<dyn Probe>) -> Self {
        Self {
            sources,
            probe,
            resolved: Mutex::new(None),
        }
    }

    /// Embedded, then system association, then conventional paths.
    pub fn default_sources(embedded_dir: &Path) -> Vec<Box<dyn RuntimeSource>> {
        vec![
            Box::new(EmbeddedRuntime::new(embedded_dir.to_path_buf())),
            Box::new(SystemAssociation),
            Box::new(FixedPaths::conventional()),
        ]
    }

    pub fn cached(&self) -> Option<PathBuf> {
        self.resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn ensure_runtime(&self) -> Result<PathBuf> {
        let mut resolved = self
            .resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(path) = resolved.as_ref() {
            return Ok(path.clone());
        }

        for source in &self.sources {
            for candidate in source.candidates() {
                if self.probe.probe(&candidate, &[VERSION_ARG]).is_some() {
                    tracing::info!(
                        source = source.name(),
                        path = %candidate.display(),
                        "Runtime found"
                    );
                    *resolved = Some(candidate.clone());
                    return Ok(candidate);
                }
            }
        }

        Err(BeaconError::DependencyMissing(
            "no working runtime interpreter found".to_string(),
        ))
    }
}
