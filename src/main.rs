//! CLI entry point for the fleet telemetry ingestion service.
//!
//! Provides subcommands for running the MQTT ingestion pipeline and for
//! validating a single payload file offline.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fleet_telemetry::analytics::{self, AnalyticsQueue};
use fleet_telemetry::config::AppConfig;
use fleet_telemetry::dead_letter::DeadLetterSink;
use fleet_telemetry::ingest::IngestionService;
use fleet_telemetry::monitor::IngestionMonitor;
use fleet_telemetry::payload;
use fleet_telemetry::processor::TelemetryProcessor;
use fleet_telemetry::publish::LoggingPublisher;
use fleet_telemetry::reconcile::Reconciler;
use fleet_telemetry::store::InMemoryStore;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "fleet_telemetry")]
#[command(about = "Vehicle telemetry ingestion pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the MQTT broker and ingest telemetry until interrupted
    Ingest {
        /// Broker host, overriding MQTT_HOST
        #[arg(long)]
        host: Option<String>,

        /// Broker port, overriding MQTT_PORT
        #[arg(long)]
        port: Option<u16>,

        /// Telemetry topic, overriding MQTT_TELEMETRY_TOPIC
        #[arg(long)]
        topic: Option<String>,
    },
    /// Validate a single telemetry payload without persisting anything
    Validate {
        /// Path to a JSON payload file
        #[arg(value_name = "FILE")]
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/fleet_telemetry.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fleet_telemetry.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { host, port, topic } => run_ingest(host, port, topic).await,
        Commands::Validate { file } => validate_file(&file),
    }
}

async fn run_ingest(host: Option<String>, port: Option<u16>, topic: Option<String>) -> Result<()> {
    let mut config = AppConfig::from_env()?;
    if let Some(host) = host {
        config.mqtt.host = host;
    }
    if let Some(port) = port {
        config.mqtt.port = port;
    }
    if let Some(topic) = topic {
        config.mqtt.telemetry_topic = topic;
    }

    if !config.mqtt.enabled {
        warn!("MQTT ingestion is disabled by configuration, nothing to do");
        return Ok(());
    }

    let store = Arc::new(InMemoryStore::new());
    let monitor = Arc::new(IngestionMonitor::new());
    let (analytics_queue, analytics_rx) = AnalyticsQueue::bounded(config.analytics_queue_capacity);
    let analytics_worker = analytics::spawn_worker(analytics_rx);

    let processor = Arc::new(TelemetryProcessor::new(
        monitor.clone(),
        Reconciler::new(store.clone()),
        Arc::new(LoggingPublisher),
        DeadLetterSink::new(store.clone()),
        analytics_queue,
    ));

    let service = IngestionService::new(config.mqtt.clone(), monitor.clone(), processor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Periodic health line so operators can see pipeline state in the logs.
    let snapshot_monitor = monitor.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = snapshot_monitor.snapshot();
            info!(
                connected = snapshot.connected,
                processed = snapshot.processed,
                deserialization_failures = snapshot.deserialization_failures,
                validation_failures = snapshot.validation_failures,
                "Ingestion status"
            );
        }
    });

    info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        topic = %config.mqtt.telemetry_topic,
        "Starting telemetry ingestion"
    );
    service.run(shutdown_rx).await?;

    drop(service);
    let _ = analytics_worker.await;
    Ok(())
}

fn validate_file(file: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read payload file {file}"))?;

    match payload::parse_and_validate(&raw) {
        Ok(parsed) => {
            info!(
                telemetry_id = %parsed.telemetry_id,
                vehicle_id = %parsed.vehicle_id,
                number_plate = %parsed.number_plate,
                "Payload is valid"
            );
            Ok(())
        }
        Err(reason) => bail!("payload rejected: {reason}"),
    }
}
