//! Roomcast server - headless Sonos-to-MQTT bridge daemon.
//!
//! Loads the YAML configuration, brings up the MQTT client and the
//! dashboard façade, and hands the session to the supervisor until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use roomcast_core::{
    start_server, AppState, Broker, Config, Connector, Inventory, MqttBroker, SonosRest,
    Supervisor, WsConnector,
};
use tokio::signal;

/// Roomcast - bridge a household of Sonos players onto an MQTT broker.
#[derive(Parser, Debug)]
#[command(name = "roomcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, value_name = "FILE", default_value = "config.yml")]
    cfgpath: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match Config::load(&args.cfgpath) {
        Ok(config) => config,
        Err(e) => {
            init_logging(false);
            log::error!("Unable to load config from {} ({})", args.cfgpath.display(), e);
            anyhow::bail!("configuration error");
        }
    };
    init_logging(config.debug);

    log::info!("Roomcast Server v{}", env!("CARGO_PKG_VERSION"));

    // Broker client; the event loop task reconnects for the life of the
    // process.
    let (broker, broker_task) =
        MqttBroker::connect(&config.mqtt.broker).context("Failed to init MQTT client")?;
    let broker: Arc<dyn Broker> = broker;

    let inventory = Inventory::new();
    let rest = SonosRest::new(&config.sonos.apikey).context("Failed to build REST client")?;
    let connector: Arc<dyn Connector> = Arc::new(WsConnector);

    // Dashboard façade.
    let app_state = AppState {
        inventory: inventory.clone(),
        rest,
        broker: Arc::clone(&broker),
    };
    let port = config.webserver.port;
    let server_task = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, port).await {
            log::error!("Server error: {}", e);
        }
    });

    // The supervisor owns the session from here on.
    let supervisor = Supervisor::new(config, connector, broker, inventory)
        .context("Failed to bootstrap supervisor")?;
    let supervisor_task = tokio::spawn(supervisor.run());

    shutdown_signal().await;
    log::info!("Shutdown signal received, stopping");

    supervisor_task.abort();
    server_task.abort();
    broker_task.abort();

    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
