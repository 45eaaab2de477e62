//! HTTP access for dependency metadata and archives.
//!
//! The proxy is passed in on every call rather than cached: the user may change
//! it in the settings UI at any time.

use crate::error::{BeaconError, Result};
use crate::proxy::ProxyConfig;
use fs_err as fs;
use std::path::Path;
use std::time::Duration;
use ureq::tls::{RootCerts, TlsConfig, TlsProvider};
use ureq::Agent;

/// Global timeout for all HTTP operations.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum size for plain-text metadata documents (1 MB).
pub const MAX_METADATA_SIZE: u64 = 1024 * 1024;

/// Maximum size for dependency archives (100 MB).
pub const MAX_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;

const USER_AGENT: &str = concat!("beacon/", env!("CARGO_PKG_VERSION"));

/// Network seam used by the dependency manager.
pub trait Remote: Send + Sync {
    fn fetch_text(&self, url: &str, proxy: &ProxyConfig) -> Result<String>;
    fn download(&self, url: &str, dest: &Path, proxy: &ProxyConfig) -> Result<()>;
}

/// `Remote` backed by a blocking ureq agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpRemote;

impl Remote for HttpRemote {
    fn fetch_text(&self, url: &str, proxy: &ProxyConfig) -> Result<String> {
        let failure = |details: String| network_failure(url, details, proxy);

        agent(proxy)
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| failure(e.to_string()))?
            .into_body()
            .with_config()
            .limit(MAX_METADATA_SIZE)
            .read_to_string()
            .map_err(|e| failure(format!("failed to read response body: {}", e)))
    }

    fn download(&self, url: &str, dest: &Path, proxy: &ProxyConfig) -> Result<()> {
        let failure = |details: String| network_failure(url, details, proxy);

        let bytes = agent(proxy)
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| failure(e.to_string()))?
            .into_body()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .read_to_vec()
            .map_err(|e| failure(format!("download truncated: {}", e)))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BeaconError::io("creating download directory", e))?;
        }
        fs::write(dest, bytes).map_err(|e| BeaconError::io("writing download", e))?;
        tracing::debug!(url, path = %dest.display(), "Download complete");
        Ok(())
    }
}

/// Creates an agent with native TLS, a global timeout and the configured proxy.
/// A proxy the client rejects is skipped and the agent connects directly.
pub fn agent(proxy: &ProxyConfig) -> Agent {
    let tls_config = TlsConfig::builder()
        .provider(TlsProvider::NativeTls)
        .root_certs(RootCerts::PlatformVerifier)
        .build();

    let mut builder = Agent::config_builder()
        .tls_config(tls_config)
        .timeout_global(Some(HTTP_TIMEOUT));

    if let Some(endpoint) = proxy.endpoint() {
        match ureq::Proxy::new(&endpoint.uri()) {
            Ok(client_proxy) => builder = builder.proxy(Some(client_proxy)),
            Err(err) => {
                tracing::debug!(error = %err, hint = %proxy.hint(), "Proxy rejected; connecting directly");
            }
        }
    }

    builder.build().into()
}

fn network_failure(url: &str, details: String, proxy: &ProxyConfig) -> BeaconError {
    BeaconError::NetworkFailure {
        url: url.to_string(),
        details,
        proxy_hint: proxy.hint(),
    }
}
