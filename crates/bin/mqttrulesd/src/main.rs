//! # mqttrulesd — mqttrules daemon
//!
//! Composition root that wires the MQTT adapter to the rule engine.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the tracing subscriber
//! - Build the configured rules and parameters
//! - Connect to the broker and start the engine
//! - Handle graceful shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use mqttrules_adapter_mqtt::RumqttClient;
use mqttrules_app::engine::Engine;
use mqttrules_domain::event::EngineEvent;

use crate::config::Config;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.logging.filter);

    let rules = config.rules()?;
    let Config {
        mqtt,
        engine: engine_config,
        parameters,
        ..
    } = config;

    // Broker
    let (client, inbound, connection) = RumqttClient::connect(&mqtt);
    let client = Arc::new(client);

    // Engine
    let mut engine = Engine::new(engine_config, parameters);
    let reporter = tokio::spawn(report_events(engine.subscribe()));
    let generation = engine.start(Arc::clone(&client), inbound, rules).await?;
    tracing::info!(%generation, rules = engine.rules().len(), "mqttrulesd running");

    shutdown_signal().await;

    engine.stop().await?;
    client.disconnect().await;
    if tokio::time::timeout(DISCONNECT_TIMEOUT, connection)
        .await
        .is_err()
    {
        tracing::warn!("MQTT connection did not close in time");
    }
    reporter.abort();

    tracing::info!("mqttrulesd stopped");
    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {filter:?}: {err}, falling back to info");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Trace every engine event until the bus closes.
async fn report_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => tracing::debug!(?event, "engine event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "engine event reporter lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Resolve on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
