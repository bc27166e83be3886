//! Configuration data structures for devgate.
//!
//! These types map directly to YAML (also TOML / JSON) configuration files. The
//! `handlers` list follows the app-descriptor layout used in deployment, so the
//! same file that describes production routing can drive the local router.
//! Everything carries serde defaults so that a minimal file only names the
//! backend target.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// Sentinel host value asking the proxy to derive `Host` from the target URL.
pub const AUTO_HOST: &str = "<auto>";

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_app_root() -> String {
    ".".to_string()
}

fn default_backend_target() -> String {
    "http://127.0.0.1:8090/".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_proxy_chunk_size() -> usize {
    2 << 13
}

fn default_cache() -> bool {
    true
}

fn default_cache_timeout_secs() -> u64 {
    60 * 60 * 12
}

fn default_fallback_mimetype() -> String {
    "application/octet-stream".to_string()
}

fn default_static_chunk_size() -> usize {
    8192
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base directory static paths in `handlers` are resolved against
    #[serde(default = "default_app_root")]
    pub app_root: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub static_files: StaticFilesConfig,
    /// Ordered handler list; order is the route table order
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            app_root: default_app_root(),
            backend: BackendConfig::default(),
            static_files: StaticFilesConfig::default(),
            handlers: Vec::new(),
        }
    }
}

/// The backend application every non-static path is proxied to.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    /// Destination of the catch-all `/` target
    #[serde(default = "default_backend_target")]
    pub target: String,
    /// Fixed `Host` for the catch-all target, or `<auto>` (also when absent)
    #[serde(default)]
    pub host: Option<String>,
    /// Forward the inbound `Host` to the catch-all target; wins over `host`
    #[serde(default)]
    pub preserve_host: bool,
    /// Upstream timeout for a single proxied request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for each relayed body chunk
    #[serde(default = "default_proxy_chunk_size")]
    pub chunk_size: usize,
    /// Shell command that starts the backend; `$PORT` is substituted
    #[serde(default)]
    pub command: Option<String>,
    /// Port substituted for `$PORT` in `command`; defaults to the port of `target`
    #[serde(default)]
    pub port: Option<u16>,
    /// Extra environment for the backend process
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Additional prefix targets, evaluated in order before the catch-all
    #[serde(default)]
    pub targets: Vec<ProxyTargetConfig>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            target: default_backend_target(),
            host: None,
            preserve_host: false,
            timeout_secs: default_timeout_secs(),
            chunk_size: default_proxy_chunk_size(),
            command: None,
            port: None,
            env: HashMap::new(),
            targets: Vec::new(),
        }
    }
}

impl BackendConfig {
    /// Port the launched backend listens on: `port`, else the port of `target`.
    pub fn command_port(&self) -> Option<u16> {
        self.port.or_else(|| {
            Url::parse(&self.target)
                .ok()
                .and_then(|url| url.port_or_known_default())
        })
    }

    /// The catch-all `/` entry of the reverse proxy.
    pub fn catch_all_target(&self, prefix: &str) -> ProxyTargetConfig {
        ProxyTargetConfig {
            host: self.host.clone(),
            preserve_host: self.preserve_host,
            ..ProxyTargetConfig::new(prefix, &self.target)
        }
    }
}

/// One prefix entry of the reverse proxy.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyTargetConfig {
    pub prefix: String,
    pub target: String,
    /// Fixed `Host` value, or `<auto>` (also when absent)
    #[serde(default)]
    pub host: Option<String>,
    /// Forward the inbound `Host` unchanged; wins over `host`
    #[serde(default)]
    pub preserve_host: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub remove_prefix: bool,
    #[serde(default)]
    pub tls: Option<ProxyTlsConfig>,
}

impl ProxyTargetConfig {
    /// A target with every option at its default.
    pub fn new(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target: target.into(),
            host: None,
            preserve_host: false,
            headers: HashMap::new(),
            remove_prefix: false,
            tls: None,
        }
    }
}

/// Transport security settings for an `https` target.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProxyTlsConfig {
    /// PEM bundle trusted in addition to the native roots
    #[serde(default)]
    pub ca_cert: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaticFilesConfig {
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default = "default_cache_timeout_secs")]
    pub cache_timeout_secs: u64,
    #[serde(default = "default_fallback_mimetype")]
    pub fallback_mimetype: String,
    #[serde(default = "default_static_chunk_size")]
    pub chunk_size: usize,
    /// Regexes over the resolved file's name (no directories); a match hides the file
    #[serde(default)]
    pub disallow: Vec<String>,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            cache: default_cache(),
            cache_timeout_secs: default_cache_timeout_secs(),
            fallback_mimetype: default_fallback_mimetype(),
            chunk_size: default_static_chunk_size(),
            disallow: Vec::new(),
        }
    }
}

/// One entry of the app-descriptor `handlers` list.
///
/// Only `static_dir` and `static_files` entries become static routes; any other
/// entry (script handlers and the like) is served by the backend.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HandlerConfig {
    pub url: String,
    #[serde(default)]
    pub static_dir: Option<String>,
    #[serde(default)]
    pub static_files: Option<String>,
}

impl HandlerConfig {
    pub fn static_dir(url: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            static_dir: Some(dir.into()),
            static_files: None,
        }
    }

    pub fn static_files(url: impl Into<String>, files: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            static_dir: None,
            static_files: Some(files.into()),
        }
    }
}
