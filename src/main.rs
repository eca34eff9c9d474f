use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use switchyard::config::{load_config, LogConfig, ServerConfig, SpaConfig, TlsConfig};
use switchyard::lifecycle::{forward_signals, Shutdown};
use switchyard::observability::init_logging;
use switchyard::Server;

#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "Dual-protocol application server (HTTP + STOMP over WebSocket)", long_about = None)]
struct Cli {
    /// Hostname to listen on
    #[arg(short = 'n', long, default_value = "localhost")]
    hostname: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 30080)]
    port: u16,

    /// Root directory static and SPA paths resolve against
    #[arg(short, long, default_value = ".")]
    root_dir: PathBuf,

    /// TLS certificate (PEM)
    #[arg(long, requires = "cert_key")]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long, requires = "cert")]
    cert_key: Option<String>,

    /// Static content folder, `dir` or `dir:uri` (repeatable)
    #[arg(short, long = "static")]
    static_dir: Vec<String>,

    /// SPA folder, `path` or `path:uri`
    #[arg(long)]
    spa_path: Option<String>,

    /// Run the STOMP broker
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_fabric: bool,

    /// Fail startup if the broker cannot listen
    #[arg(long)]
    require_fabric: bool,

    /// Broker WebSocket endpoint
    #[arg(long, default_value = "/ws")]
    fabric_endpoint: String,

    #[arg(long, default_value = "/topic")]
    topic_prefix: String,

    #[arg(long, default_value = "/queue")]
    queue_prefix: String,

    #[arg(long, default_value = "/pub")]
    request_prefix: String,

    #[arg(long, default_value = "/pub/queue")]
    request_queue_prefix: String,

    /// Configuration file (JSON or TOML); other flags are ignored when set
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Graceful shutdown budget in seconds
    #[arg(long, default_value_t = 300)]
    shutdown_timeout: u64,

    /// Log output: stdout, stderr or a file path
    #[arg(long, default_value = "stdout")]
    output_log: String,

    /// Separate access log file
    #[arg(long)]
    access_log: Option<String>,

    /// Separate error log file
    #[arg(long)]
    error_log: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Do not print the startup banner
    #[arg(long)]
    no_banner: bool,

    /// Expose metrics at /prometheus
    #[arg(long)]
    prometheus: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig {
            root_dir: self.root_dir,
            static_dir: self.static_dir,
            spa_config: self.spa_path.as_deref().map(SpaConfig::parse),
            host: self.hostname,
            port: self.port,
            log_config: LogConfig {
                output_log: self.output_log,
                access_log: self.access_log,
                error_log: self.error_log,
                ..LogConfig::default()
            },
            enable_prometheus: self.prometheus,
            debug: self.debug,
            no_banner: self.no_banner,
            shutdown_timeout_secs: self.shutdown_timeout,
            ..ServerConfig::default()
        };

        if let (Some(cert_file), Some(key_file)) = (self.cert, self.cert_key) {
            config.tls_config = Some(TlsConfig {
                cert_file,
                key_file,
                skip_certificate_validation: false,
            });
        }

        let fabric = &mut config.fabric_config;
        fabric.enabled = self.enable_fabric;
        fabric.required = self.require_fabric;
        fabric.fabric_endpoint = self.fabric_endpoint;
        fabric.endpoint_config.topic_prefix = self.topic_prefix;
        fabric.endpoint_config.user_queue_prefix = self.queue_prefix;
        fabric.endpoint_config.app_request_prefix = self.request_prefix;
        fabric.endpoint_config.app_request_queue_prefix = self.request_queue_prefix;
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config_file.clone() {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("switchyard: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => cli.into_config(),
    };

    if let Err(e) = init_logging(&config.log_config, config.debug) {
        eprintln!("switchyard: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");
    tracing::info!(
        address = %config.bind_address(),
        static_dirs = config.static_dir.len(),
        fabric = config.fabric_config.enabled,
        shutdown_timeout_secs = config.shutdown_timeout_secs,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let signals = forward_signals(shutdown.clone());
    let server = Server::new(config);

    let result = server.start(shutdown.subscribe()).await;
    signals.abort();

    match result {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
