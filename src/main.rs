//! modcon binary entry point.
//!
//! Loads the layered configuration, wires the HTTP device client into the
//! console engine and mirrors engine events onto the log until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use modcon::events::{EngineEvent, Severity};
use modcon::{ConsoleConfig, ConsoleEngine, HttpDeviceClient};

#[derive(Parser, Debug)]
#[command(name = "modcon", version, about = "Modbus TCP management console engine")]
struct Args {
    /// Bridge base URL, overriding the configuration file.
    #[arg(long, env = "MODCON_BASE_URL")]
    base_url: Option<String>,

    /// Explicit configuration file (.toml, .yaml or .yml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Connect to the configured device on startup and begin auto-reading.
    #[arg(long)]
    connect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    modcon::logging::init(&args.log_level)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let mut config = ConsoleConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(base_url) = args.base_url {
        config.device.base_url = base_url;
    }

    info!("modcon starting, bridge at {}", config.device.base_url);

    let client = Arc::new(
        HttpDeviceClient::new(&config.device.base_url)
            .context("failed to build HTTP client")?,
    );
    let engine = ConsoleEngine::new(client, config.clone());

    // Mirror engine events onto the log so the binary is usable headless.
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Connection(snapshot) => {
                    info!("connection state: {:?}", snapshot.state);
                },
                EngineEvent::Toast { message, severity } => match severity {
                    Severity::Error => error!("{}", message),
                    Severity::Warning => warn!("{}", message),
                    _ => info!("{}", message),
                },
                EngineEvent::Registers(window) => {
                    info!("register window {}+{}", window.start, window.len());
                },
                EngineEvent::Coils(states) => {
                    info!("{} coils tracked", states.len());
                },
                EngineEvent::Loading(_) => {},
            }
        }
    });

    let status = engine.check_status().await;
    info!("bridge reports: {:?}", status.state);

    if args.connect {
        let device = engine.config().device.clone();
        engine
            .connect(&device.ip, device.port, device.unit_id, device.timeout_ms)
            .await
            .context("initial connect failed")?;
        engine
            .enable_auto_read()
            .await
            .context("failed to start auto read")?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    engine.disconnect().await.ok();
    Ok(())
}
