//! brokerlink - dual-broker MQTT session controller
//!
//! Loads the configuration, starts the controller task and feeds it the
//! startup signals and the per-minute tick until SIGINT or SIGTERM.

use brokerlink::bus::BroadcastBus;
use brokerlink::config::LinkConfig;
use brokerlink::observability::init_default_logging;
use brokerlink::protocol::LifecycleEvent;
use brokerlink::session::{self, ConnectionController, ControllerHandle, Signal};
use brokerlink::transport::mqtt::RumqttTransport;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::sync::broadcast;
use tokio::{signal, time::Duration};
use tracing::{debug, error, info, warn};

const MINUTE: Duration = Duration::from_secs(60);

/// Dual-broker MQTT session controller
#[derive(Parser)]
#[command(name = "brokerlink")]
#[command(about = "Keeps one MQTT session alive across a primary and a reserved broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace) unless LOG_LEVEL is set
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session controller
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var("LOG_LEVEL").is_err() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!("Starting brokerlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_link(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(LinkConfig::load_from_file(path)?);
    }

    for path_str in ["brokerlink.toml", "config/brokerlink.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(LinkConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create brokerlink.toml".into())
}

async fn run_link(config: LinkConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        device = %config.device.id,
        reserved = config.has_reserved(),
        "Application starting"
    );

    let bus = BroadcastBus::default();
    let events = bus.subscribe();
    let controller = ConnectionController::new(&config, RumqttTransport::default(), bus)?;
    let (handle, mut task) = session::spawn(controller);

    let logger = tokio::spawn(log_lifecycle_events(events));
    let ticker = tokio::spawn(minute_ticker(handle.clone()));

    send_startup_signals(&config, &handle).await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Session controller is running");

    let controller_ended = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            false
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            false
        }
        _ = &mut task => {
            error!("Controller task ended unexpectedly");
            true
        }
    };

    ticker.abort();
    if !controller_ended {
        if let Err(e) = handle.shutdown().await {
            error!("Error during shutdown: {}", e);
        }
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            warn!("Controller task didn't stop in time");
        }
    }
    logger.abort();

    Ok(())
}

/// Stand-ins for the link and reachability monitors when none are wired in
async fn send_startup_signals(
    config: &LinkConfig,
    handle: &ControllerHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.signals.assume_link_up {
        handle
            .signal(Signal::LinkUp {
                gateway: config.signals.gateway,
            })
            .await?;
    }
    if config.signals.assume_internet {
        handle.signal(Signal::InternetReachable(true)).await?;
    }
    Ok(())
}

async fn minute_ticker(handle: ControllerHandle) {
    let mut interval = tokio::time::interval(MINUTE);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        if handle.signal(Signal::MinuteTick).await.is_err() {
            debug!("Controller gone, minute ticker stops");
            break;
        }
    }
}

async fn log_lifecycle_events(mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(kind = event.kind(), event = %json, "Lifecycle event"),
                Err(e) => warn!(error = %e, "Failed to serialize lifecycle event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Lifecycle event logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn handle_config_command(config: LinkConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
