//! Subscribes to the telemetry topic and appends every valid message to the
//! durable log.
//!
//! Malformed payloads and store failures are logged and the message is
//! dropped; nothing escapes a single message's processing. Messages are
//! handled one at a time, in delivery order.

use crate::config::Config;
use crate::db::TelemetryLog;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventLog, Severity};
use crate::transport::{self, TELEMETRY_QOS, TransportHandler};
use async_trait::async_trait;
use iiot_types::Reading;
use rumqttc::{AsyncClient, Event, Packet};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CLIENT_ID: &str = "sub-telemetry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(i64),
    Malformed,
    StoreFailed,
}

/// Decodes a wire payload into a reading.
pub fn decode(raw: &[u8]) -> PipelineResult<Reading> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| PipelineError::MalformedMessage(format!("payload is not UTF-8: {}", e)))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| PipelineError::MalformedMessage(format!("invalid JSON: {}", e)))?;
    let Value::Object(map) = value else {
        return Err(PipelineError::MalformedMessage(
            "payload is not a JSON object".to_string(),
        ));
    };

    Ok(Reading {
        timestamp: string_field(&map, "ts")?,
        sensor_id: string_field(&map, "sensor")?,
        temperature: float_field(&map, "temperature")?,
        humidity: float_field(&map, "humidity")?,
    })
}

fn field<'a>(map: &'a Map<String, Value>, key: &str) -> PipelineResult<&'a Value> {
    map.get(key)
        .ok_or_else(|| PipelineError::MalformedMessage(format!("missing key '{}'", key)))
}

fn string_field(map: &Map<String, Value>, key: &str) -> PipelineResult<String> {
    match field(map, key)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(PipelineError::MalformedMessage(format!(
            "'{}' must be a string, got {}",
            key, other
        ))),
    }
}

/// Numbers and numeric strings coerce to `f64`; anything non-finite is
/// rejected because the store cannot hold NaN in a NOT NULL REAL column.
fn float_field(map: &Map<String, Value>, key: &str) -> PipelineResult<f64> {
    let value = field(map, key)?;
    let coerced = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match coerced {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(PipelineError::MalformedMessage(format!(
            "'{}' is not a finite number: {}",
            key, value
        ))),
    }
}

pub struct Ingestor {
    log: TelemetryLog,
    events: EventLog,
}

impl Ingestor {
    pub fn new(log: TelemetryLog, events: EventLog) -> Self {
        Self { log, events }
    }

    /// Processes one raw transport message. Blocking: performs the store
    /// write before returning.
    pub fn on_message(&self, raw: &[u8]) -> IngestOutcome {
        let reading = match decode(raw) {
            Ok(reading) => reading,
            Err(e) => {
                self.events.failure(
                    Severity::Warn,
                    "Discarding malformed message",
                    &e,
                    &[("bytes", raw.len().to_string())],
                );
                return IngestOutcome::Malformed;
            }
        };

        match self.log.append(&reading) {
            Ok(sequence_id) => {
                self.events.info(
                    "Ingested reading",
                    &[
                        ("sensor", reading.sensor_id),
                        ("sequence_id", sequence_id.to_string()),
                    ],
                );
                IngestOutcome::Stored(sequence_id)
            }
            Err(e) => {
                self.events.failure(
                    Severity::Error,
                    "Dropping message, store write failed",
                    &e,
                    &[("sensor", reading.sensor_id)],
                );
                IngestOutcome::StoreFailed
            }
        }
    }
}

/// Transport callbacks for the subscriber: re-subscribes on every connect
/// and pushes payloads through the [`Ingestor`].
pub struct Subscription {
    ingestor: Arc<Ingestor>,
    client: AsyncClient,
    topic: String,
    events: EventLog,
}

impl Subscription {
    pub fn new(ingestor: Arc<Ingestor>, client: AsyncClient, topic: impl Into<String>, events: EventLog) -> Self {
        Self {
            ingestor,
            client,
            topic: topic.into(),
            events,
        }
    }
}

#[async_trait]
impl TransportHandler for Subscription {
    async fn on_connect(&self, session_present: bool) {
        // Non-blocking: the event loop is not polled while we are in here
        match self.client.try_subscribe(self.topic.clone(), TELEMETRY_QOS) {
            Ok(()) => self.events.info(
                "Connected, subscribing",
                &[
                    ("topic", self.topic.clone()),
                    ("session_present", session_present.to_string()),
                ],
            ),
            Err(e) => {
                let err = PipelineError::from(e);
                self.events.failure(Severity::Error, "Subscribe failed", &err, &[]);
            }
        }
    }

    async fn on_message(&self, topic: &str, payload: &[u8]) {
        let ingestor = self.ingestor.clone();
        let payload = payload.to_vec();
        if let Err(e) = tokio::task::spawn_blocking(move || ingestor.on_message(&payload)).await {
            self.events.error(
                "Message handler task failed",
                &[("topic", topic.to_string()), ("detail", e.to_string())],
            );
        }
    }

    async fn on_publish_ack(&self, _packet_id: u16) {}
}

/// Entry point for `--mode subscriber`.
pub async fn run_subscriber(
    config: &Config,
    events: EventLog,
    cancel: CancellationToken,
) -> PipelineResult<()> {
    let events = events.for_component("ingestor");
    let log = TelemetryLog::new(&config.db_path);
    let init_log = log.clone();
    tokio::task::spawn_blocking(move || init_log.initialize())
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))??;

    let mut options = transport::mqtt_options(config, CLIENT_ID);
    options.set_manual_acks(true);
    let (client, mut eventloop) = transport::connect(options);

    let ingestor = Arc::new(Ingestor::new(log, events.clone()));
    let subscription = Subscription::new(ingestor, client.clone(), config.mqtt_topic.clone(), events.clone());
    let transport_events = events.for_component("transport");

    events.info(
        "Subscriber started",
        &[
            ("broker", format!("{}:{}", config.mqtt_host, config.mqtt_port)),
            ("topic", config.mqtt_topic.clone()),
        ],
    );

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = transport::poll_once(&mut eventloop, &transport_events, config.reconnect_delay()) => polled,
        };
        let Some(event) = polled else {
            continue;
        };
        transport::dispatch(&event, &subscription).await;
        // Ack only once the message has been fully handled
        if let Event::Incoming(Packet::Publish(publish)) = &event {
            if let Err(e) = client.try_ack(publish) {
                let err = PipelineError::from(e);
                events.failure(Severity::Warn, "Ack failed", &err, &[]);
            }
        }
    }

    events.info("Subscriber stopping", &[]);
    if client.try_disconnect().is_ok() {
        // Flush the disconnect; a dead broker must not hold up shutdown
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            while let Ok(event) = eventloop.poll().await {
                if matches!(event, Event::Outgoing(rumqttc::Outgoing::Disconnect)) {
                    break;
                }
            }
        })
        .await;
    }
    Ok(())
}
