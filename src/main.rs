//! Step companion - retractable step control service
//!
//! Fuses BLE beacon ranging with step engine status over MQTT into one
//! authoritative car state and drives extend/retract commands.
//!
//! Module structure:
//! - `domain/` - Core business types (CarStatus, CarEvent, errors)
//! - `io/` - External interfaces (engine, ranging, reader, notifier)
//! - `services/` - Business logic (aggregator, beacon filter, gates)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use std::sync::Arc;
use step_companion::domain::types::{CarEvent, UserAction};
use step_companion::infra::{Config, Metrics};
use step_companion::io::{
    create_view_channel, EngineClient, RangingClient, ReaderClient, ViewEvent,
};
use step_companion::services::StatusAggregator;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Step companion - retractable step control service
#[derive(Parser, Debug)]
#[command(name = "step-companion", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "step-companion starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        car_id = %config.car_id(),
        car_steps = ?config.car_steps(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        engine_command_topic = %config.engine_command_topic(),
        ranging_topic = %config.ranging_topic(),
        promotion_max_meters = %config.promotion_max_meters(),
        empty_cycle_limit = %config.empty_cycle_limit(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Event channel into the aggregator (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    // Per-collaborator command channels
    let (engine_tx, engine_rx) = mpsc::channel(64);
    let (ranging_tx, ranging_rx) = mpsc::channel(64);
    let (reader_tx, reader_rx) = mpsc::channel(16);

    // Presentation channel; the consumer below stands in for a UI
    let (view_tx, mut view_rx) = create_view_channel(256, metrics.clone());

    // Start the step engine client
    let engine = EngineClient::new(&config, engine_rx, event_tx.clone(), metrics.clone());
    let engine_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        engine.run(engine_shutdown).await;
    });

    // Start the ranging client
    let ranging = RangingClient::new(&config, ranging_rx, event_tx.clone(), metrics.clone());
    let ranging_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        ranging.run(ranging_shutdown).await;
    });

    // Start the short-range reader client
    let reader = ReaderClient::new(&config, reader_rx, event_tx.clone(), metrics.clone());
    let reader_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        reader.run(reader_shutdown).await;
    });

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Drain view notifications; a real presentation layer would render these
    tokio::spawn(async move {
        while let Some(event) = view_rx.recv().await {
            match event {
                ViewEvent::Refresh { view, animated } => {
                    info!(
                        state = %view.state.as_str(),
                        step = %view.step,
                        proximity = %view.proximity,
                        meters = ?view.meters,
                        pinned = %view.pinned,
                        animated = %animated,
                        "view_refresh"
                    );
                }
                ViewEvent::PermissionRequired => {
                    warn!("view_permission_required");
                }
                ViewEvent::Alert(alert) => {
                    warn!(title = %alert.title, message = %alert.message, "view_alert");
                }
            }
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Equivalent of the first view appear: check permission, start services
    let _ = event_tx.send(CarEvent::Action(UserAction::Refresh)).await;
    // The IO tasks hold their own senders; dropping ours lets the event
    // channel close once they shut down.
    drop(event_tx);

    // Run the aggregator - consumes events until the channel closes
    let mut aggregator = StatusAggregator::new(
        config,
        view_tx,
        engine_tx,
        ranging_tx,
        reader_tx,
        metrics,
    );
    info!("aggregator_started");
    aggregator.run(event_rx).await;

    info!("step-companion shutdown complete");
    Ok(())
}
