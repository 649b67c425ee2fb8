use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lora_roam::api::{self, ApiState};
use lora_roam::band::Band;
use lora_roam::config::Config;
use lora_roam::downlink::DownlinkEmitter;
use lora_roam::joinserver::JoinServerDirectory;
use lora_roam::lorawan::NetId;
use lora_roam::roaming::session::{SessionStore, EVICT_INTERVAL};
use lora_roam::roaming::RoamingDirectory;
use lora_roam::udp;
use lora_roam::uplink::ForwardingFlow;

#[derive(Parser)]
#[command(name = "lora-roam")]
#[command(about = "Passive-roaming LoRaWAN network server")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("lora-roam v{}", env!("CARGO_PKG_VERSION"));

    let net_id: NetId = config
        .network_server
        .net_id
        .parse()
        .map_err(|e| anyhow::anyhow!("network_server.net_id: {}", e))?;
    let band = Band::by_name(&config.band.name)?;
    info!("NetID {}, band {}", net_id, band.name());

    let roaming = Arc::new(RoamingDirectory::from_config(
        &config.roaming.servers,
        net_id,
    )?);
    let join_servers = Arc::new(JoinServerDirectory::from_config(
        &config.join_server,
        net_id.to_string(),
    )?);

    let sessions = Arc::new(SessionStore::new());
    Arc::clone(&sessions).spawn_sweeper(EVICT_INTERVAL);

    // Gateway bridge: uplinks in, downlinks out
    let (uplink_tx, mut uplink_rx) = tokio::sync::mpsc::channel(256);
    let downlink_sender = udp::start_server(&config.udp.bind, band, uplink_tx).await?;

    // fNS forwarding: one task per uplink
    let flow = Arc::new(ForwardingFlow::new(
        join_servers,
        Arc::clone(&roaming),
        Arc::clone(&sessions),
        band,
        DownlinkEmitter::new(band, downlink_sender.clone()),
    ));
    tokio::spawn(async move {
        while let Some(frame) = uplink_rx.recv().await {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.handle_uplink(frame).await });
        }
    });

    // Inbound roaming API (hNS/sNS side)
    let state = Arc::new(ApiState {
        net_id,
        roaming,
        emitter: Arc::new(DownlinkEmitter::new(band, downlink_sender)),
    });
    let listener = tokio::net::TcpListener::bind(&config.api.bind).await?;
    info!("Roaming API listening on {}", config.api.bind);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api::router(state)).await {
            error!("Roaming API server failed: {}", e);
        }
    });

    info!("Server running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    Ok(())
}
