//! canbridge - Secure MQTT-to-CAN command bridge
//!
//! Usage:
//!   canbridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -H, --host <HOST>      Broker host name or IP
//!   -p, --port <PORT>      Broker TLS port (default: 8883)
//!   --cafile <FILE>        CA certificate (PEM)
//!   --cert <FILE>          Client certificate (PEM)
//!   --key <FILE>           Client private key (PEM)
//!   -i, --canif <IFACE>    SocketCAN interface (default: can0)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use canbridge::bridge::{BridgeController, COMMAND_TOPIC};
use canbridge::can::{CanChannel, CanError};
use canbridge::config::Config;
use canbridge::session::{
    client_connector, SessionConfig, SessionError, SessionManager, TlsError, TrustConfig,
};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// canbridge - Secure MQTT-to-CAN command bridge
#[derive(Parser, Debug)]
#[command(name = "canbridge")]
#[command(version = "0.1.0")]
#[command(about = "Bridges door commands from a TLS MQTT broker to a CAN bus")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker host name or IP
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Broker TLS port
    #[arg(short, long)]
    port: Option<u16>,

    /// CA certificate file (PEM)
    #[arg(long)]
    cafile: Option<String>,

    /// Client certificate file (PEM)
    #[arg(long)]
    cert: Option<String>,

    /// Client private key file (PEM)
    #[arg(long)]
    key: Option<String>,

    /// SocketCAN interface name
    #[arg(short = 'i', long)]
    canif: Option<String>,

    /// MQTT client identifier
    #[arg(long)]
    client_id: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Startup failures that map to distinct process exit codes
#[derive(Debug)]
enum FatalError {
    /// The CAN interface could not be opened
    Can(CanError),
    /// The session could not be constructed
    Session(SessionError),
    /// The trust material could not be loaded
    Tls(TlsError),
    /// The initial broker connection failed
    Connect(SessionError),
}

impl FatalError {
    fn exit_code(&self) -> u8 {
        match self {
            FatalError::Can(_) => 2,
            FatalError::Session(_) => 3,
            FatalError::Tls(_) => 4,
            FatalError::Connect(_) => 5,
        }
    }
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalError::Can(e) => write!(f, "{}", e),
            FatalError::Session(e) => write!(f, "{}", e),
            FatalError::Tls(e) => write!(f, "{}", e),
            FatalError::Connect(e) => write!(f, "failed to connect to broker: {}", e),
        }
    }
}

/// The merged, fully-resolved runtime settings
struct Settings {
    session: SessionConfig,
    trust: TrustConfig,
    can_interface: String,
}

/// Merge CLI arguments over the file config; CLI wins.
///
/// Errors here are usage errors and exit with code 1.
fn resolve_settings(args: &Args, config: &Config) -> Result<Settings, String> {
    let host = args
        .host
        .clone()
        .or_else(|| config.broker.host.clone())
        .ok_or("broker host is required (--host or broker.host)")?;

    let cafile = args
        .cafile
        .clone()
        .or_else(|| config.tls.cafile.clone())
        .ok_or("CA certificate is required (--cafile or tls.cafile)")?;
    let cert = args
        .cert
        .clone()
        .or_else(|| config.tls.cert.clone())
        .ok_or("client certificate is required (--cert or tls.cert)")?;
    let key = args
        .key
        .clone()
        .or_else(|| config.tls.key.clone())
        .ok_or("client private key is required (--key or tls.key)")?;

    let client_id = args
        .client_id
        .clone()
        .or_else(|| config.broker.client_id.clone())
        .unwrap_or_else(|| format!("canbridge-{}", std::process::id()));

    Ok(Settings {
        session: SessionConfig {
            host,
            port: args.port.unwrap_or(config.broker.port),
            client_id,
            keep_alive: config.broker.keep_alive,
            connect_timeout: config.broker.connect_timeout_duration(),
            reconnect_interval: config.broker.reconnect_interval_duration(),
            max_reconnect_interval: config.broker.max_reconnect_interval_duration(),
        },
        trust: TrustConfig {
            ca_file: cafile,
            cert_file: cert,
            key_file: key,
        },
        can_interface: args
            .canif
            .clone()
            .unwrap_or_else(|| config.can.interface.clone()),
    })
}

/// Bring the bridge up and run it to completion.
///
/// Kept separate from `main` so every resource drops normally before the
/// process exit code is produced.
async fn run(settings: Settings) -> Result<(), FatalError> {
    info!("Starting canbridge");
    info!(
        "  Broker: {}:{}",
        settings.session.host, settings.session.port
    );
    info!("  Client id: {}", settings.session.client_id);
    info!("  CA file: {}", settings.trust.ca_file);
    info!("  Client cert: {}", settings.trust.cert_file);
    info!("  CAN interface: {}", settings.can_interface);
    info!("  Command topic: {}", COMMAND_TOPIC);

    let bus = CanChannel::open(&settings.can_interface).map_err(FatalError::Can)?;
    info!("CAN: opened interface {}", bus.interface());

    let connector = client_connector(&settings.trust).map_err(FatalError::Tls)?;

    let manager =
        SessionManager::new(settings.session, connector).map_err(FatalError::Session)?;
    let session = manager.connect().await.map_err(FatalError::Connect)?;

    let controller = BridgeController::new(bus, session);
    let shutdown = controller.shutdown_handle();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(term) => term,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    shutdown.shutdown();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("SIGINT received"),
                _ = term.recv() => info!("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("interrupt received");
        }
        shutdown.shutdown();
    });

    if let Err(e) = controller.run().await {
        // The session died without a shutdown request. Startup already
        // succeeded, so this is a connection-class failure.
        return Err(FatalError::Connect(e));
    }

    info!("canbridge stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // clap exits with 2 on usage errors; argument problems are code 1 here
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version output are not errors
            if e.use_stderr() {
                eprintln!("{}", e);
                return ExitCode::from(1);
            }
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                return ExitCode::from(1);
            }
        },
        None => match Config::from_env() {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error reading configuration: {}", e);
                return ExitCode::from(1);
            }
        },
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error installing logger: {}", e);
        return ExitCode::from(1);
    }

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let settings = match resolve_settings(&args, &config) {
        Ok(settings) => settings,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return ExitCode::from(1);
        }
    };

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
