//! CLI client freshness and installation.

use super::Probe;
use crate::error::{BeaconError, Result};
use crate::http::Remote;
use crate::patterns::RE_VERSION_INFO;
use crate::proxy::ProxyConfig;
use fs_err as fs;
use std::path::Path;

pub const CLI_ARCHIVE_URL: &str = "https://github.com/wakatime/wakatime/archive/master.zip";
pub const CLI_ABOUT_URL: &str =
    "https://raw.githubusercontent.com/wakatime/wakatime/master/wakatime/__about__.py";

const CLI_ARCHIVE_NAME: &str = "wakatime-cli.zip";

/// Result of comparing the installed CLI against the published version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Current(String),
    Stale {
        installed: Option<String>,
        published: String,
    },
    /// Published version could not be determined; the install is left alone.
    Unknown,
}

/// Extracts `a.b.c` from the `__version_info__` tuple in the about file.
pub fn parse_published_version(about: &str) -> Option<String> {
    RE_VERSION_INFO
        .captures(about)
        .map(|caps| format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]))
}

/// Asks the installed CLI for its version. The CLI prints it on stderr; stdout
/// is used when stderr is empty.
pub fn installed_version(probe: &dyn Probe, runtime: &Path, cli: &Path) -> Option<String> {
    let cli_arg = cli.to_string_lossy();
    let output = probe.probe(runtime, &[cli_arg.as_ref(), "--version"])?;
    let version = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    (!version.is_empty()).then(|| version.to_string())
}

pub fn check_freshness(
    probe: &dyn Probe,
    remote: &dyn Remote,
    proxy: &ProxyConfig,
    runtime: &Path,
    cli: &Path,
) -> Freshness {
    let published = match remote.fetch_text(CLI_ABOUT_URL, proxy) {
        Ok(body) => match parse_published_version(&body) {
            Some(version) => version,
            None => {
                tracing::warn!(url = CLI_ABOUT_URL, "Published CLI version not found in metadata");
                return Freshness::Unknown;
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "Could not fetch published CLI version");
            return Freshness::Unknown;
        }
    };

    let installed = installed_version(probe, runtime, cli);
    match installed {
        Some(ref local) if *local == published => Freshness::Current(published),
        _ => Freshness::Stale {
            installed,
            published,
        },
    }
}

/// Replaces the CLI install: removes the stale directory, downloads the
/// archive into `deps_dir`, extracts it there and removes the archive.
pub fn reinstall(
    remote: &dyn Remote,
    proxy: &ProxyConfig,
    deps_dir: &Path,
    install_dir: &Path,
) -> Result<()> {
    if install_dir.exists() {
        if let Err(err) = fs::remove_dir_all(install_dir) {
            tracing::debug!(error = %err, "Could not remove stale CLI install");
        }
    }

    fs::create_dir_all(deps_dir).map_err(|e| BeaconError::io("creating dependency directory", e))?;
    let archive = deps_dir.join(CLI_ARCHIVE_NAME);

    tracing::info!(url = CLI_ARCHIVE_URL, "Downloading CLI");
    remote.download(CLI_ARCHIVE_URL, &archive, proxy)?;

    let extracted = extract_archive(&archive, deps_dir);

    if let Err(err) = fs::remove_file(&archive) {
        tracing::debug!(error = %err, "Could not remove downloaded archive");
    }

    extracted
}

/// Extracts a zip archive over `dest`, overwriting existing files.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let archive_error = |details: String| BeaconError::Archive {
        path: archive.to_path_buf(),
        details,
    };

    let file = fs::File::open(archive).map_err(|e| BeaconError::io("opening archive", e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_error(e.to_string()))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| archive_error(format!("reading entry {}: {}", i, e)))?;

        // Entries escaping `dest` are skipped.
        let relative = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| BeaconError::io("creating directory", e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BeaconError::io("creating directory", e))?;
        }

        let mut out_file =
            fs::File::create(&out_path).map_err(|e| BeaconError::io("creating file", e))?;
        std::io::copy(&mut entry, &mut out_file)
            .map_err(|e| BeaconError::io("writing extracted file", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| BeaconError::io("setting permissions", e))?;
            }
        }
    }

    tracing::debug!(entries = zip.len(), dest = %dest.display(), "Archive extracted");
    Ok(())
}
