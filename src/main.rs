use anyhow::{Context, Result};
use clap::Parser;
use pir_core::config::{AppConfig, LogFormat, LoggingConfig};
use pir_discovery::{CoordinatorSettings, DiscoveryCoordinator, MdnsFeed, MdnsResolver};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod host;

use host::CachedAccessoryHost;

/// PIR bridge - discovers PIR motion sensors and republishes their state
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults are used when it does not exist)
    #[arg(short, long, env = "PIR_BRIDGE_CONFIG", default_value = "config/pir-bridge.yaml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration file, layering PIR_BRIDGE__* environment overrides
    let mut config = AppConfig::from_config_builder(&args.config, false)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.format = LogFormat::Json;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging);

    info!("Starting PIR bridge");
    info!("Configuration loaded from {:?}", args.config);
    info!(
        service_type = %config.discovery.service_type,
        no_motion_delay_ms = config.devices.no_motion_delay_ms,
        "Discovery settings"
    );

    let host = Arc::new(CachedAccessoryHost::new(config.host.accessory_cache.clone()));

    let daemon = MdnsFeed::create_daemon()?;
    let resolver = Arc::new(MdnsResolver::new(
        Arc::clone(&daemon),
        config.discovery.resolve_timeout(),
    ));
    let coordinator =
        DiscoveryCoordinator::new(CoordinatorSettings::from(&config), resolver, host.clone())?;

    // Previously registered accessories stay exposed before their devices reappear
    for handle in host.load().context("Failed to load accessory cache")? {
        coordinator.restore_cached_device(handle);
    }

    let feed = Arc::new(MdnsFeed::new(daemon, config.discovery.service_type_fqdn()));
    coordinator.start(feed).await?;

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping bridge...");

    coordinator.shutdown().await;

    for handle in host.accessories() {
        let model = host
            .information(handle.id)
            .map(|info| info.model)
            .unwrap_or_default();
        info!(
            accessory = %handle.display_handle,
            model = %model,
            reachable = host.is_reachable(handle.id),
            motion_detected = host.motion_detected(handle.id).unwrap_or(false),
            "Accessory state at shutdown"
        );
    }
    info!(devices = coordinator.devices().len(), "PIR bridge stopped");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
