//! vtu - virtual GT06 tracker
//!
//! Impersonates a GT06/Concox GPS tracker toward a Traccar-compatible
//! server and forwards remote engine-lock commands to a relay controller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vtu_protocol::ChecksumKind;
use vtu_relay::RelayDispatcher;
use vtu_session::{location_channel, Config, FixedPosition, RoutePlayer, TrackerSession};

#[derive(Parser)]
#[command(name = "vtu")]
#[command(about = "Virtual GT06 tracker for Traccar-compatible servers")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, env = "VTU_CONFIG")]
    config: Option<PathBuf>,

    /// Server hostname or IP (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Server TCP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Device IMEI, 15 digits (overrides config)
    #[arg(short, long)]
    imei: Option<String>,

    /// Frame checksum algorithm: xor or crc16 (overrides config)
    #[arg(long)]
    checksum: Option<String>,

    /// Relay controller endpoint, host:port or unix:/path (overrides config)
    #[arg(long)]
    relay: Option<String>,

    /// Latitude of a fixed reported position
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude of a fixed reported position
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// JSON route file to replay instead of a fixed position
    #[arg(long, conflicts_with_all = ["lat", "lon"])]
    route: Option<PathBuf>,

    /// Seconds between route steps
    #[arg(long, default_value_t = 5)]
    route_step: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration (explicit path, VTU_CONFIG, or defaults)
    let mut config = if let Some(path) = &cli.config {
        match Config::load_from(path) {
            Ok(c) => {
                tracing::info!("Loaded config from {}", path.display());
                c
            }
            Err(e) => {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
        }
    } else {
        tracing::info!("Using default configuration");
        Config::default()
    };

    // Apply command-line overrides, then re-validate
    if let Some(server) = cli.server {
        config.server.addr = server;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(imei) = cli.imei {
        config.device.imei = imei;
    }
    if let Some(kind) = &cli.checksum {
        config.server.checksum = match kind.to_lowercase().as_str() {
            "crc16_x25" | "crc16" | "crc" => ChecksumKind::Crc16X25,
            _ => ChecksumKind::Xor,
        };
    }
    if let Some(relay) = cli.relay {
        config.relay.target = relay;
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting vtu tracker");
    tracing::info!("  Server: {}:{}", config.server.addr, config.server.port);
    tracing::info!("  IMEI: {}", config.device.imei);
    tracing::info!("  Checksum: {:?}", config.server.checksum);
    tracing::info!(
        "  Heartbeat interval: {}s",
        config.device.heartbeat_interval_secs
    );
    tracing::info!(
        "  Location interval: {}s",
        config.device.location_interval_secs
    );
    tracing::info!("  Relay target: {}", config.relay.target);

    let relay = RelayDispatcher::new(config.relay_config()?);

    // Position source feeding the session
    let (location_tx, location_rx) = location_channel();
    if let Some(route) = &cli.route {
        let player = RoutePlayer::from_file(route, Duration::from_secs(cli.route_step))?;
        tracing::info!(
            "  Position source: route {} ({} fixes)",
            route.display(),
            player.len()
        );
        tokio::spawn(player.run(location_tx));
    } else if let (Some(lat), Some(lon)) = (cli.lat, cli.lon) {
        tracing::info!("  Position source: fixed ({}, {})", lat, lon);
        tokio::spawn(FixedPosition::new(lat, lon).run(location_tx));
    } else {
        tracing::info!("  Position source: none (heartbeat only)");
        drop(location_tx);
    }

    let session = Arc::new(TrackerSession::new(
        config.session_config(),
        relay,
        location_rx,
    )?);

    // Spawn shutdown signal handler
    let shutdown_session = session.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping session...");
        shutdown_session.disconnect();
    });

    // Run session (blocks until disconnect)
    session.run().await?;

    tracing::info!("Tracker stopped");
    Ok(())
}
