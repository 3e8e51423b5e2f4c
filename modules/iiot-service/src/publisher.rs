//! Publishes synthetic readings to the broker on a fixed cadence.
//!
//! Emits are QoS 1 with retain off and never wait on the client's request
//! queue: while the broker is unreachable the queue fills up, and a full
//! queue is logged as a failed emit and the loop moves on to the next tick. On shutdown the publisher waits (bounded by the
//! grace period) for outstanding acknowledgments before disconnecting.

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventLog, Severity};
use crate::generator::{ReadingSource, UniformReadings, next_reading};
use crate::ticker::{IntervalTicker, Ticker};
use crate::transport::{self, TELEMETRY_QOS, TransportHandler};
use async_trait::async_trait;
use iiot_types::Reading;
use rumqttc::AsyncClient;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Counts publishes that were handed to the client but not yet acknowledged.
pub struct AckTracker {
    pending: AtomicUsize,
    settled: Notify,
    events: EventLog,
}

impl AckTracker {
    pub fn new(events: EventLog) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            settled: Notify::new(),
            events,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn sent(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Waits until nothing is pending or `grace` elapses. Returns the number
    /// of publishes still unacknowledged.
    pub async fn wait_settled(&self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.settled.notified();
            if self.pending() == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending();
            }
        }
    }
}

#[async_trait]
impl TransportHandler for AckTracker {
    async fn on_connect(&self, session_present: bool) {
        self.events.info(
            "Connected to broker",
            &[("session_present", session_present.to_string())],
        );
    }

    async fn on_message(&self, topic: &str, _payload: &[u8]) {
        self.events
            .debug("Ignoring inbound message", &[("topic", topic.to_string())]);
    }

    async fn on_publish_ack(&self, packet_id: u16) {
        // Saturating: acks for publishes from before a restart are not counted
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.events
            .debug("Publish acknowledged", &[("packet_id", packet_id.to_string())]);
        if self.pending() == 0 {
            self.settled.notify_waiters();
        }
    }
}

pub struct Publisher {
    client: AsyncClient,
    topic: String,
    source: Arc<dyn ReadingSource>,
    acks: Arc<AckTracker>,
    events: EventLog,
}

impl Publisher {
    pub fn new(
        client: AsyncClient,
        topic: impl Into<String>,
        source: Arc<dyn ReadingSource>,
        events: EventLog,
    ) -> Self {
        let acks = Arc::new(AckTracker::new(events.clone()));
        Self {
            client,
            topic: topic.into(),
            source,
            acks,
            events,
        }
    }

    pub fn acks(&self) -> Arc<AckTracker> {
        self.acks.clone()
    }

    /// Generates, serializes and queues one reading for the event loop.
    pub fn publish_once(&self, sensor_id: &str) -> PipelineResult<Reading> {
        let reading = next_reading(self.source.as_ref(), sensor_id);
        let payload = serde_json::to_vec(&reading)
            .map_err(|e| PipelineError::MalformedMessage(e.to_string()))?;
        self.client
            .try_publish(self.topic.clone(), TELEMETRY_QOS, false, payload)?;
        self.acks.sent();
        Ok(reading)
    }

    /// Publishes one reading per tick until `cancel` fires or the ticker ends.
    pub async fn run(&self, sensor_id: &str, ticker: &mut dyn Ticker, cancel: &CancellationToken) {
        self.events.info(
            "Publisher started",
            &[("sensor", sensor_id.to_string()), ("topic", self.topic.clone())],
        );
        loop {
            let ticked = tokio::select! {
                _ = cancel.cancelled() => break,
                ticked = ticker.tick() => ticked,
            };
            if !ticked {
                break;
            }
            match self.publish_once(sensor_id) {
                Ok(reading) => self.events.info(
                    "Published reading",
                    &[
                        ("topic", self.topic.clone()),
                        ("ts", reading.timestamp),
                        ("temperature", reading.temperature.to_string()),
                        ("humidity", reading.humidity.to_string()),
                    ],
                ),
                Err(e) => self.events.failure(Severity::Error, "Publish failed", &e, &[]),
            }
        }
        self.events.info("Publisher stopping", &[]);
    }

    /// Waits for in-flight acknowledgments, then asks the client to
    /// disconnect. Returns the number of publishes left unacknowledged.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let outstanding = self.acks.wait_settled(grace).await;
        if outstanding > 0 {
            self.events.warn(
                "Shutting down with unacknowledged publishes",
                &[("outstanding", outstanding.to_string())],
            );
        }
        if let Err(e) = self.client.try_disconnect() {
            let err = PipelineError::from(e);
            self.events.failure(Severity::Warn, "Disconnect request failed", &err, &[]);
        }
        outstanding
    }
}

/// Entry point for `--mode publisher`.
pub async fn run_publisher(
    config: &Config,
    sensor_id: &str,
    events: EventLog,
    cancel: CancellationToken,
) -> PipelineResult<()> {
    let events = events.for_component("publisher");
    let options = transport::mqtt_options(config, &format!("pub-{}", sensor_id));
    let (client, eventloop) = transport::connect(options);

    let publisher = Publisher::new(
        client,
        config.mqtt_topic.clone(),
        Arc::new(UniformReadings::default()),
        events.clone(),
    );

    let stop_driver = CancellationToken::new();
    let mut driver = tokio::spawn(transport::drive(
        eventloop,
        publisher.acks(),
        events.for_component("transport"),
        config.reconnect_delay(),
        stop_driver.clone(),
    ));

    let mut ticker = IntervalTicker::from_secs_f64(config.publish_interval_secs);
    publisher.run(sensor_id, &mut ticker, &cancel).await;
    publisher.shutdown(config.shutdown_grace()).await;

    // The driver exits once the disconnect is on the wire
    let joined = match tokio::time::timeout(config.shutdown_grace(), &mut driver).await {
        Ok(joined) => joined,
        Err(_) => {
            stop_driver.cancel();
            driver.await
        }
    };
    if let Err(e) = joined {
        events.warn("Transport driver task failed", &[("detail", e.to_string())]);
    }
    events.info("Publisher stopped", &[]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::ticker::ManualTicker;
    use rumqttc::MqttOptions;

    struct FixedReadings;

    impl ReadingSource for FixedReadings {
        fn sample(&self) -> (f64, f64) {
            (24.5, 55.0)
        }
    }

    fn publisher(sink: Arc<MemorySink>) -> (Publisher, rumqttc::EventLoop) {
        publisher_with_capacity(sink, 16)
    }

    fn publisher_with_capacity(sink: Arc<MemorySink>, capacity: usize) -> (Publisher, rumqttc::EventLoop) {
        let (client, eventloop) = AsyncClient::new(MqttOptions::new("pub-test", "127.0.0.1", 1883), capacity);
        let events = EventLog::new("publisher", sink);
        let publisher = Publisher::new(client, "factory/test", Arc::new(FixedReadings), events);
        (publisher, eventloop)
    }

    #[tokio::test]
    async fn test_publish_once_tracks_pending_ack() {
        let sink = Arc::new(MemorySink::new());
        let (publisher, _eventloop) = publisher(sink);
        let reading = publisher.publish_once("sensor-001").unwrap();
        assert_eq!(reading.sensor_id, "sensor-001");
        assert_eq!(reading.temperature, 24.5);
        assert_eq!(publisher.acks().pending(), 1);

        publisher.acks().on_publish_ack(1).await;
        assert_eq!(publisher.acks().pending(), 0);
        // Stray acks never underflow
        publisher.acks().on_publish_ack(2).await;
        assert_eq!(publisher.acks().pending(), 0);
    }

    #[tokio::test]
    async fn test_emit_failure_is_logged_and_loop_continues() {
        let sink = Arc::new(MemorySink::new());
        let (publisher, eventloop) = publisher(sink.clone());
        // Dropping the event loop closes the request channel
        drop(eventloop);

        let (trigger, mut ticker) = ManualTicker::pair();
        trigger.fire();
        trigger.fire();
        trigger.fire();
        drop(trigger);

        let cancel = CancellationToken::new();
        publisher.run("sensor-001", &mut ticker, &cancel).await;

        let failures = sink.with_error_kind("TransportUnavailable");
        assert_eq!(failures.len(), 3);
        assert_eq!(publisher.acks().pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_acks() {
        let sink = Arc::new(MemorySink::new());
        let (publisher, _eventloop) = publisher(sink);
        publisher.publish_once("sensor-001").unwrap();

        let acks = publisher.acks();
        let acker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            acks.on_publish_ack(1).await;
        });
        let outstanding = publisher.shutdown(Duration::from_secs(5)).await;
        acker.await.unwrap();
        assert_eq!(outstanding, 0);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_grace() {
        let sink = Arc::new(MemorySink::new());
        let (publisher, _eventloop) = publisher(sink.clone());
        publisher.publish_once("sensor-001").unwrap();
        publisher.publish_once("sensor-001").unwrap();

        let outstanding = publisher.shutdown(Duration::from_millis(10)).await;
        assert_eq!(outstanding, 2);
        assert!(
            sink.events()
                .iter()
                .any(|e| e.field("outstanding") == Some("2"))
        );
    }

    #[tokio::test]
    async fn test_full_request_queue_is_logged_and_cancel_is_observed() {
        let sink = Arc::new(MemorySink::new());
        // Event loop alive but never polled, as while the broker is down
        let (publisher, _eventloop) = publisher_with_capacity(sink.clone(), 4);

        let (trigger, mut ticker) = ManualTicker::pair();
        for _ in 0..10 {
            trigger.fire();
        }

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let canceller = async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stop.cancel();
        };
        let (_, finished) = tokio::join!(
            canceller,
            tokio::time::timeout(Duration::from_secs(3), publisher.run("sensor-001", &mut ticker, &cancel))
        );
        assert!(finished.is_ok());

        assert_eq!(publisher.acks().pending(), 4);
        assert_eq!(sink.with_error_kind("TransportUnavailable").len(), 6);
        assert!(sink.events().iter().any(|e| e.message == "Publisher stopping"));
        drop(trigger);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_loop() {
        let sink = Arc::new(MemorySink::new());
        let (publisher, _eventloop) = publisher(sink.clone());

        let (trigger, mut ticker) = ManualTicker::pair();
        trigger.fire();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let canceller = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        };
        let (_, finished) = tokio::join!(
            canceller,
            tokio::time::timeout(Duration::from_secs(3), publisher.run("sensor-001", &mut ticker, &cancel))
        );
        assert!(finished.is_ok());

        let published = sink
            .events()
            .iter()
            .filter(|e| e.message == "Published reading")
            .count();
        assert_eq!(published, 1);
        assert_eq!(sink.events().last().map(|e| e.message.clone()), Some("Publisher stopping".to_string()));
        drop(trigger);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_block_on_full_queue() {
        let sink = Arc::new(MemorySink::new());
        let (publisher, _eventloop) = publisher_with_capacity(sink.clone(), 1);
        publisher.publish_once("sensor-001").unwrap();

        let outstanding = tokio::time::timeout(Duration::from_secs(3), publisher.shutdown(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(outstanding, 1);
        assert!(
            sink.events()
                .iter()
                .any(|e| e.message == "Disconnect request failed")
        );
    }
}
