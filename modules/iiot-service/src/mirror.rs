//! Background worker projecting the newest durable record into the live
//! address space.
//!
//! One-directional: values written externally into the address space are
//! overwritten on the next tick and never reach the log.

use crate::config::Config;
use crate::db::TelemetryLog;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventLog, Severity};
use crate::live::{self, LiveAddressSpace, LiveObject, LiveVariable};
use crate::ticker::{IntervalTicker, Ticker};
use iiot_types::{LiveValue, TelemetryRecord};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOutcome {
    /// Live variables now hold this sequence id's values
    Updated(i64),
    /// Log is empty, variables untouched
    Empty,
    /// Read or write failed; logged, variables may be partially updated
    Skipped,
}

pub struct LiveMirror {
    log: TelemetryLog,
    space: Arc<dyn LiveAddressSpace>,
    events: EventLog,
}

impl LiveMirror {
    pub fn new(log: TelemetryLog, space: Arc<dyn LiveAddressSpace>, events: EventLog) -> Self {
        Self { log, space, events }
    }

    /// One poll: read `latest(1)` and write its fields. Blocking.
    pub fn tick(&self) -> MirrorOutcome {
        let record = match self.log.latest(1) {
            Ok(mut records) => match records.pop() {
                Some(record) => record,
                None => return MirrorOutcome::Empty,
            },
            Err(e) => {
                self.events
                    .failure(Severity::Warn, "Skipping tick, log read failed", &e, &[]);
                return MirrorOutcome::Skipped;
            }
        };

        if let Err(e) = self.project(&record) {
            self.events.failure(
                Severity::Warn,
                "Skipping tick, live write failed",
                &e,
                &[("sequence_id", record.sequence_id.to_string())],
            );
            return MirrorOutcome::Skipped;
        }
        self.events
            .debug("Mirrored record", &[("sequence_id", record.sequence_id.to_string())]);
        MirrorOutcome::Updated(record.sequence_id)
    }

    fn project(&self, record: &TelemetryRecord) -> PipelineResult<()> {
        self.space
            .write(LiveVariable::Temperature, LiveValue::Float(record.temperature))?;
        self.space
            .write(LiveVariable::Humidity, LiveValue::Float(record.humidity))?;
        self.space
            .write(LiveVariable::Sensor, LiveValue::Text(record.sensor_id.clone()))?;
        Ok(())
    }

    /// Ticks until `cancel` fires or the ticker ends. Each tick's store read
    /// runs on the blocking pool and completes before shutdown is observed.
    pub async fn run(self: Arc<Self>, ticker: &mut dyn Ticker, cancel: &CancellationToken) {
        self.events.info("Mirror started", &[]);
        loop {
            let ticked = tokio::select! {
                _ = cancel.cancelled() => break,
                ticked = ticker.tick() => ticked,
            };
            if !ticked {
                break;
            }
            let mirror = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || mirror.tick()).await {
                self.events
                    .error("Mirror tick task failed", &[("detail", e.to_string())]);
            }
        }
        self.events.info("Mirror stopping", &[]);
    }
}

/// Entry point for `--mode live`: binds the live endpoint, then mirrors the
/// log into it until cancelled.
pub async fn run_live(config: &Config, events: EventLog, cancel: CancellationToken) -> PipelineResult<()> {
    let events = events.for_component("mirror");
    let log = TelemetryLog::new(&config.db_path);
    let init_log = log.clone();
    tokio::task::spawn_blocking(move || init_log.initialize())
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))??;

    let space = Arc::new(LiveObject::default());
    let listener = tokio::net::TcpListener::bind(&config.live_endpoint)
        .await
        .map_err(|e| PipelineError::LiveInterfaceUnavailable(format!("bind {}: {}", config.live_endpoint, e)))?;
    events.info(
        "Live address space listening",
        &[
            ("endpoint", format!("http://{}", config.live_endpoint)),
            ("namespace", space.namespace().to_string()),
            ("object", space.name().to_string()),
        ],
    );

    let server_cancel = cancel.clone();
    let server_events = events.clone();
    let app = live::router(space.clone());
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await;
        if let Err(e) = result {
            let err = PipelineError::LiveInterfaceUnavailable(e.to_string());
            server_events.failure(Severity::Error, "Live server stopped", &err, &[]);
        }
    });

    let mirror = Arc::new(LiveMirror::new(log, space, events.clone()));
    let mut ticker = IntervalTicker::from_secs_f64(config.live_poll_interval_secs);
    mirror.run(&mut ticker, &cancel).await;

    if let Err(e) = server.await {
        events.warn("Live server task failed", &[("detail", e.to_string())]);
    }
    Ok(())
}
