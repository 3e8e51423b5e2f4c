//! IIoT telemetry pipeline: MQTT publisher and ingestor, SQLite durable log,
//! live address-space mirror, and a windowed dashboard.

pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod events;
pub mod generator;
pub mod ingestor;
pub mod live;
pub mod mirror;
pub mod publisher;
pub mod routes;
pub mod ticker;
pub mod transport;
pub mod window;

pub use db::TelemetryLog;
pub use error::{PipelineError, PipelineResult};
