//! Locating and maintaining the CLI client and its runtime.
//!
//! Every check here may block on the network or on child processes, so
//! callers run it off latency-sensitive threads (the engine uses a background
//! thread at startup). Failures are reported, never panicked on: the pipeline
//! keeps trying to invoke whatever is installed.

pub mod cli;
pub mod runtime;

use crate::config::SharedSettings;
use crate::error::{BeaconError, Result};
use crate::http::{HttpRemote, Remote};
use crate::process::{CommandRunner, Invocation, ProcessOutput, ProcessRunner};
use crate::proxy::ProxyConfig;
use crate::storage::StorageConfig;
use fs_err as fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use cli::Freshness;
pub use runtime::{RuntimeLocator, RuntimeSource};

/// Version of the embeddable runtime downloaded when none is installed.
pub const EMBEDDED_RUNTIME_VERSION: &str = "3.8.10";

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const RUNTIME_ARCHIVE_NAME: &str = "runtime.zip";

/// Runs a program to see whether it works.
pub trait Probe: Send + Sync {
    /// Returns the output if the program ran and exited successfully.
    fn probe(&self, program: &Path, args: &[&str]) -> Option<ProcessOutput>;
}

impl Probe for ProcessRunner {
    fn probe(&self, program: &Path, args: &[&str]) -> Option<ProcessOutput> {
        let args = args.iter().map(|a| a.to_string()).collect();
        match self.run(&Invocation::new(program, args), true) {
            Ok(output) if output.success() => Some(output),
            Ok(output) => {
                tracing::debug!(program = %program.display(), code = ?output.exit_code, "Probe failed");
                None
            }
            Err(err) => {
                tracing::debug!(program = %program.display(), error = %err, "Probe failed");
                None
            }
        }
    }
}

/// Paths needed to invoke the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCli {
    pub runtime: PathBuf,
    pub cli: PathBuf,
}

/// Seam the dispatcher uses to find the CLI on every tick.
pub trait CliResolver: Send + Sync {
    fn resolve(&self) -> Result<ResolvedCli>;
}

/// Outcome of [`DependencyManager::ensure_cli`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliStatus {
    Current,
    /// Installed or reinstalled during this check.
    Installed,
    /// Present, but freshness could not be verified.
    Unverified,
}

/// One row of a dependency report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct DependencyStatus {
    pub name: String,
    pub found: bool,
    pub path: Option<String>,
    pub detail: Option<String>,
}

pub struct DependencyManager {
    storage: StorageConfig,
    settings: SharedSettings,
    runtime: RuntimeLocator,
    probe: Arc<dyn Probe>,
    remote: Arc<dyn Remote>,
}

impl DependencyManager {
    pub fn new(storage: StorageConfig, settings: SharedSettings) -> Self {
        let probe: Arc<dyn Probe> = Arc::new(ProcessRunner::new(PROBE_TIMEOUT));
        let sources = RuntimeLocator::default_sources(&storage.embedded_runtime_dir());
        Self::with_parts(storage, settings, sources, probe, Arc::new(HttpRemote))
    }

    /// Builds a manager with explicit seams. Used by tests.
    pub fn with_parts(
        storage: StorageConfig,
        settings: SharedSettings,
        sources: Vec<Box<dyn RuntimeSource>>,
        probe: Arc<dyn Probe>,
        remote: Arc<dyn Remote>,
    ) -> Self {
        Self {
            runtime: RuntimeLocator::new(sources, probe.clone()),
            storage,
            settings,
            probe,
            remote,
        }
    }

    pub fn cli_path(&self) -> PathBuf {
        self.storage.cli_script()
    }

    // Re-resolved per call: the proxy string can change whenever settings are saved.
    fn proxy(&self) -> ProxyConfig {
        ProxyConfig::resolve(&self.settings.snapshot().proxy)
    }

    pub fn ensure_runtime(&self) -> Result<PathBuf> {
        self.runtime.ensure_runtime()
    }

    /// Resolves the runtime, downloading the embeddable build when none is found.
    pub fn ensure_runtime_installed(&self) -> Result<PathBuf> {
        match self.runtime.ensure_runtime() {
            Ok(path) => Ok(path),
            Err(BeaconError::DependencyMissing(reason)) => {
                let Some(url) = embedded_runtime_url() else {
                    return Err(BeaconError::DependencyMissing(reason));
                };
                tracing::info!(url = %url, "No runtime found; installing embedded runtime");
                self.install_embedded_runtime(&url)?;
                self.runtime.ensure_runtime()
            }
            Err(err) => Err(err),
        }
    }

    /// Replaces the embedded runtime directory with the archive at `url`.
    fn install_embedded_runtime(&self, url: &str) -> Result<()> {
        let dir = self.storage.embedded_runtime_dir();
        if dir.exists() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                tracing::debug!(error = %err, "Could not remove previous embedded runtime");
            }
        }
        fs::create_dir_all(&dir).map_err(|e| BeaconError::io("creating runtime directory", e))?;
        let archive = self.storage.deps_dir().join(RUNTIME_ARCHIVE_NAME);

        self.remote.download(url, &archive, &self.proxy())?;
        let extracted = cli::extract_archive(&archive, &dir);
        if let Err(err) = fs::remove_file(&archive) {
            tracing::debug!(error = %err, "Could not remove downloaded archive");
        }
        extracted
    }

    /// Installs the CLI when missing and reinstalls it when its version differs
    /// from the published one. An unknown published version keeps what is there.
    pub fn ensure_cli(&self) -> Result<CliStatus> {
        let cli = self.cli_path();
        let proxy = self.proxy();

        if !cli.exists() {
            tracing::info!(path = %cli.display(), "CLI not installed");
            self.reinstall_cli(&proxy)?;
            return Ok(CliStatus::Installed);
        }

        let runtime = match self.runtime.ensure_runtime() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(error = %err, "Cannot verify CLI version without a runtime");
                return Ok(CliStatus::Unverified);
            }
        };

        match cli::check_freshness(
            self.probe.as_ref(),
            self.remote.as_ref(),
            &proxy,
            &runtime,
            &cli,
        ) {
            Freshness::Current(version) => {
                tracing::debug!(version = %version, "CLI is current");
                Ok(CliStatus::Current)
            }
            Freshness::Stale {
                installed,
                published,
            } => {
                tracing::info!(
                    installed = installed.as_deref().unwrap_or("unknown"),
                    published = %published,
                    "CLI is out of date"
                );
                self.reinstall_cli(&proxy)?;
                Ok(CliStatus::Installed)
            }
            Freshness::Unknown => Ok(CliStatus::Unverified),
        }
    }

    fn reinstall_cli(&self, proxy: &ProxyConfig) -> Result<()> {
        cli::reinstall(
            self.remote.as_ref(),
            proxy,
            &self.storage.deps_dir(),
            &self.storage.cli_install_dir(),
        )
    }

    /// Runs both checks and reports what was found. Never fails.
    pub fn check_all(&self) -> Vec<DependencyStatus> {
        let runtime = match self.ensure_runtime_installed() {
            Ok(path) => DependencyStatus {
                name: "runtime".to_string(),
                found: true,
                path: Some(path.to_string_lossy().to_string()),
                detail: None,
            },
            Err(err) => {
                tracing::warn!(error = %err, "Runtime unavailable");
                DependencyStatus {
                    name: "runtime".to_string(),
                    found: false,
                    path: None,
                    detail: Some(err.to_string()),
                }
            }
        };

        let cli_detail = match self.ensure_cli() {
            Ok(status) => format!("{:?}", status).to_lowercase(),
            Err(err) => {
                tracing::warn!(error = %err, "CLI check failed");
                err.to_string()
            }
        };
        let cli_path = self.cli_path();
        let cli = DependencyStatus {
            name: "cli".to_string(),
            found: cli_path.exists(),
            path: Some(cli_path.to_string_lossy().to_string()),
            detail: Some(cli_detail),
        };

        vec![runtime, cli]
    }
}

impl CliResolver for DependencyManager {
    fn resolve(&self) -> Result<ResolvedCli> {
        // Only the cached runtime: probing happens at dependency checks, not per tick.
        let runtime = self.runtime.cached().ok_or_else(|| {
            BeaconError::DependencyMissing("runtime not resolved yet".to_string())
        })?;
        let cli = self.cli_path();
        if !cli.exists() {
            return Err(BeaconError::DependencyMissing(format!(
                "CLI not installed at {}",
                cli.display()
            )));
        }
        Ok(ResolvedCli { runtime, cli })
    }
}

/// Download URL of the embeddable runtime for this platform, if one exists.
pub fn embedded_runtime_url() -> Option<String> {
    if !cfg!(windows) {
        return None;
    }
    let arch = if std::env::consts::ARCH == "x86_64" {
        "amd64"
    } else {
        "win32"
    };
    Some(format!(
        "https://www.python.org/ftp/python/{v}/python-{v}-embed-{arch}.zip",
        v = EMBEDDED_RUNTIME_VERSION,
        arch = arch
    ))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Call = (PathBuf, Vec<String>);

    /// Probe that succeeds for a fixed set of programs and records every call.
    pub struct ScriptedProbe {
        succeed: Option<Vec<PathBuf>>,
        output: ProcessOutput,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedProbe {
        pub fn succeeding(programs: &[&str]) -> Self {
            Self {
                succeed: Some(programs.iter().map(PathBuf::from).collect()),
                output: ProcessOutput {
                    exit_code: Some(0),
                    ..Default::default()
                },
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Every program succeeds with `output`.
        pub fn with_output(output: ProcessOutput) -> Self {
            Self {
                succeed: None,
                output,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .map(|(p, _)| p.to_string_lossy().to_string())
                .collect()
        }
    }

    impl Probe for ScriptedProbe {
        fn probe(&self, program: &Path, args: &[&str]) -> Option<ProcessOutput> {
            self.calls.lock().unwrap().push((
                program.to_path_buf(),
                args.iter().map(|a| a.to_string()).collect(),
            ));
            match &self.succeed {
                Some(allowed) if !allowed.iter().any(|p| p == program) => None,
                _ => Some(self.output.clone()),
            }
        }
    }

    /// Remote serving a fixed about document and a CLI archive.
    pub struct FakeRemote {
        about: Option<String>,
        downloads: AtomicUsize,
    }

    impl FakeRemote {
        pub fn new(about: Option<&str>) -> Self {
            Self {
                about: about.map(str::to_string),
                downloads: AtomicUsize::new(0),
            }
        }

        pub fn download_count(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    impl Remote for FakeRemote {
        fn fetch_text(&self, url: &str, proxy: &ProxyConfig) -> Result<String> {
            self.about.clone().ok_or_else(|| BeaconError::NetworkFailure {
                url: url.to_string(),
                details: "unreachable".to_string(),
                proxy_hint: proxy.hint(),
            })
        }

        fn download(&self, _url: &str, dest: &Path, _proxy: &ProxyConfig) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            write_zip(
                dest,
                &[("wakatime-master/wakatime/cli.py", "print('cli')\n")],
            );
            Ok(())
        }
    }

    pub fn write_zip(dest: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(dest).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
}
