//! IIoT Service: one binary, four modes.
//!
//! - `publisher`: simulated sensor publishing to MQTT
//! - `subscriber`: MQTT → SQLite ingestion
//! - `live`: live address space mirroring the newest record (default http://0.0.0.0:4840/)
//! - `dashboard`: windowed telemetry view (default http://127.0.0.1:8501/)

use clap::{Parser, ValueEnum};
use iiot_service::config::Config;
use iiot_service::events::{EventLog, LogSink, Severity};
use iiot_service::{dashboard, ingestor, mirror, publisher};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Publisher,
    Subscriber,
    #[value(alias = "opcua")]
    Live,
    Dashboard,
}

#[derive(Debug, Parser)]
#[command(about = "IIoT Machine Monitoring System")]
struct Args {
    /// Which component to run
    #[arg(long, value_enum)]
    mode: Mode,

    /// Sensor name for publisher mode
    #[arg(long, default_value = "sensor-001")]
    sensor: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = Config::from_env();
    let events = EventLog::new("main", Arc::new(LogSink));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let signal_events = events.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                signal_events.info("Interrupt received, shutting down", &[]);
                signal_cancel.cancel();
            }
            Err(e) => signal_events.warn(
                "Cannot listen for interrupts",
                &[("detail", e.to_string())],
            ),
        }
    });

    events.info(
        "Starting",
        &[
            ("mode", format!("{:?}", args.mode).to_lowercase()),
            ("db", config.db_path.clone()),
        ],
    );

    let result = match args.mode {
        Mode::Publisher => publisher::run_publisher(&config, &args.sensor, events.clone(), cancel).await,
        Mode::Subscriber => ingestor::run_subscriber(&config, events.clone(), cancel).await,
        Mode::Live => mirror::run_live(&config, events.clone(), cancel).await,
        Mode::Dashboard => dashboard::run_dashboard(&config, events.clone(), cancel).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            events.failure(Severity::Error, "Startup failed", &e, &[]);
            ExitCode::FAILURE
        }
    }
}
