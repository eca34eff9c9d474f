//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Separator between a directory and its URI override in `path:uri` specs.
pub const URI_OVERRIDE_SEPARATOR: char = ':';

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory relative static/SPA paths resolve against.
    pub root_dir: PathBuf,

    /// Static content folders, each `dir` (mounted at `/`) or `dir:uri`.
    pub static_dir: Vec<String>,

    /// Single page application mount.
    pub spa_config: Option<SpaConfig>,

    /// Hostname the HTTP listener binds to.
    pub host: String,

    /// Port the HTTP listener binds to (0 lets the OS choose).
    pub port: u16,

    /// Log sinks and format.
    pub log_config: LogConfig,

    /// Message broker (fabric) settings.
    #[serde(alias = "broker")]
    pub fabric_config: BrokerConfig,

    /// Optional TLS configuration.
    pub tls_config: Option<TlsConfig>,

    /// Expose `/prometheus`.
    pub enable_prometheus: bool,

    /// Force debug-level logging.
    pub debug: bool,

    /// Skip the startup banner.
    pub no_banner: bool,

    /// Graceful drain budget in seconds.
    pub shutdown_timeout_secs: u64,

    /// How long a REST bridge waits for a bus reply, in seconds.
    pub rest_bridge_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            static_dir: Vec::new(),
            spa_config: None,
            host: "localhost".to_string(),
            port: 30080,
            log_config: LogConfig::default(),
            fabric_config: BrokerConfig::default(),
            tls_config: None,
            enable_prometheus: false,
            debug: false,
            no_banner: false,
            shutdown_timeout_secs: 300,
            rest_bridge_timeout_secs: 60,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl ServerConfig {
    /// `host:port` as configured.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn rest_bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_bridge_timeout_secs)
    }

    /// Resolve a configured path against `root_dir`.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    /// Static mounts parsed from `static_dir`, longest prefix first.
    pub fn static_routes(&self) -> Vec<StaticRoute> {
        let mut routes: Vec<StaticRoute> = self
            .static_dir
            .iter()
            .map(|raw| StaticRoute::parse(raw))
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        routes
    }
}

/// A static directory mounted under a URI prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRoute {
    pub prefix: String,
    pub dir: PathBuf,
}

impl StaticRoute {
    /// Parse `dir` or `dir:uri`. A bare directory mounts at `/`.
    pub fn parse(raw: &str) -> Self {
        match split_uri_override(raw) {
            Some((dir, uri)) => Self {
                prefix: normalize_prefix(uri),
                dir: PathBuf::from(dir),
            },
            None => Self {
                prefix: "/".to_string(),
                dir: PathBuf::from(raw),
            },
        }
    }
}

/// Single page application configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SpaConfig {
    /// Folder holding the built application and its `index.html`.
    pub root_folder: PathBuf,

    /// URI the application is mounted under.
    pub base_uri: String,
}

impl SpaConfig {
    /// Parse `path/to/app` (URI derived from the leaf folder) or
    /// `path/to/app:uri`.
    pub fn parse(raw: &str) -> Self {
        if let Some((dir, uri)) = split_uri_override(raw) {
            return Self {
                root_folder: PathBuf::from(dir),
                base_uri: normalize_prefix(uri),
            };
        }

        let leaf = Path::new(raw.trim_end_matches('/'))
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            root_folder: PathBuf::from(raw),
            base_uri: normalize_prefix(&leaf),
        }
    }

    pub fn index_file(&self) -> PathBuf {
        self.root_folder.join("index.html")
    }
}

fn split_uri_override(raw: &str) -> Option<(&str, &str)> {
    let (dir, uri) = raw.rsplit_once(URI_OVERRIDE_SEPARATOR)?;
    if dir.is_empty() || uri.is_empty() {
        return None;
    }
    Some((dir, uri))
}

/// Normalize a mount prefix: leading slash, no trailing slash (except `/`).
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// TLS configuration for the HTTP listener.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_file: String,

    /// Path to private key file (PEM).
    pub key_file: String,

    /// Skip PEM pre-validation before handing files to rustls.
    pub skip_certificate_validation: bool,
}

/// Broker (fabric) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Run the broker at all.
    pub enabled: bool,

    /// Treat a broker connect failure as fatal.
    pub required: bool,

    /// HTTP path the broker's streaming transport is reachable on.
    pub fabric_endpoint: String,

    /// Upper bound on `listen`.
    pub connect_timeout_secs: u64,

    /// STOMP endpoint behaviour.
    pub endpoint_config: EndpointConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            fabric_endpoint: "/ws".to_string(),
            connect_timeout_secs: 10,
            endpoint_config: EndpointConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Destination prefixes and heart-beat for the STOMP endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    pub topic_prefix: String,
    pub user_queue_prefix: String,
    pub app_request_prefix: String,
    pub app_request_queue_prefix: String,

    /// Server heart-beat interval in milliseconds (0 disables).
    pub heartbeat_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "/topic".to_string(),
            user_queue_prefix: "/queue".to_string(),
            app_request_prefix: "/pub".to_string(),
            app_request_queue_prefix: "/pub/queue".to_string(),
            heartbeat_ms: 60_000,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// `text` or `json`.
    pub format: LogFormat,

    /// `stdout`, `stderr` or a file path.
    pub output_log: String,

    /// Separate sink for HTTP access events.
    pub access_log: Option<String>,

    /// Separate sink for warnings and errors.
    pub error_log: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output_log: "stdout".to_string(),
            access_log: None,
            error_log: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
