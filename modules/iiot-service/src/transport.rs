//! MQTT plumbing shared by the publisher and the ingestor.
//!
//! Transport callbacks are routed through [`TransportHandler`] instead of
//! closures over shared state. [`dispatch`] maps raw `rumqttc` events onto
//! the handler.

use crate::config::Config;
use crate::error::PipelineError;
use crate::events::{EventLog, Severity};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Telemetry is always sent and subscribed at "at least once"
pub const TELEMETRY_QOS: QoS = QoS::AtLeastOnce;

/// Bound on queued client requests (publish, subscribe, ack)
const REQUEST_CAPACITY: usize = 64;

/// Handler callbacks. `on_connect` only sees accepted sessions; a refused
/// CONNACK surfaces from `EventLoop::poll` as an error and is logged by
/// [`poll_once`].
#[async_trait]
pub trait TransportHandler: Send + Sync {
    async fn on_connect(&self, session_present: bool);
    async fn on_message(&self, topic: &str, payload: &[u8]);
    async fn on_publish_ack(&self, packet_id: u16);
}

/// Routes one event-loop event to the handler. Events the handler has no
/// callback for are ignored.
pub async fn dispatch(event: &Event, handler: &dyn TransportHandler) {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => handler.on_connect(ack.session_present).await,
        Event::Incoming(Packet::Publish(publish)) => {
            handler.on_message(&publish.topic, &publish.payload).await
        }
        Event::Incoming(Packet::PubAck(ack)) => handler.on_publish_ack(ack.pkid).await,
        _ => {}
    }
}

/// Broker options for `client_id` from the shared config. Clean session,
/// so subscriptions must be re-issued after every reconnect.
pub fn mqtt_options(config: &Config, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
    options.set_keep_alive(config.mqtt_keepalive());
    options.set_clean_session(true);
    if let Some(user) = &config.mqtt_user {
        options.set_credentials(user.clone(), config.mqtt_pass.clone().unwrap_or_default());
    }
    options
}

pub fn connect(options: MqttOptions) -> (AsyncClient, EventLoop) {
    AsyncClient::new(options, REQUEST_CAPACITY)
}

/// Polls the event loop once. Connection errors are logged as
/// `TransportUnavailable` and followed by `reconnect_delay` of back-off;
/// the next poll makes the client reconnect.
pub async fn poll_once(
    eventloop: &mut EventLoop,
    events: &EventLog,
    reconnect_delay: Duration,
) -> Option<Event> {
    match eventloop.poll().await {
        Ok(event) => Some(event),
        Err(e) => {
            let (severity, message) = classify(&e);
            let err = PipelineError::from(e);
            events.failure(
                severity,
                message,
                &err,
                &[("retry_in_ms", reconnect_delay.as_millis().to_string())],
            );
            tokio::time::sleep(reconnect_delay).await;
            None
        }
    }
}

/// Refusals (bad credentials, unknown client id) will not clear up on
/// their own and are logged louder than dropped connections.
fn classify(e: &ConnectionError) -> (Severity, &'static str) {
    match e {
        ConnectionError::ConnectionRefused(_) => (Severity::Error, "Broker refused connection, retrying"),
        _ => (Severity::Warn, "Transport connection error, retrying"),
    }
}

/// Drives the event loop on behalf of `handler` until the client's
/// disconnect request goes out or `stop` is cancelled.
pub async fn drive(
    mut eventloop: EventLoop,
    handler: Arc<dyn TransportHandler>,
    events: EventLog,
    reconnect_delay: Duration,
    stop: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            _ = stop.cancelled() => break,
            polled = poll_once(&mut eventloop, &events, reconnect_delay) => polled,
        };
        let Some(event) = polled else {
            continue;
        };
        dispatch(&event, handler.as_ref()).await;
        if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
            events.debug("Disconnect sent", &[]);
            break;
        }
    }
}
