//! End-to-end flows through the library API: ingest, durable log, live
//! mirror and window, all sharing one SQLite file.

use iiot_service::TelemetryLog;
use iiot_service::events::{EventLog, MemorySink};
use iiot_service::ingestor::{IngestOutcome, Ingestor};
use iiot_service::live::{LiveAddressSpace, LiveObject, LiveVariable};
use iiot_service::mirror::{LiveMirror, MirrorOutcome};
use iiot_service::ticker::ManualTicker;
use iiot_service::window::WindowReader;
use iiot_types::{LiveValue, Reading};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    _dir: tempfile::TempDir,
    sink: Arc<MemorySink>,
    log: TelemetryLog,
    ingestor: Ingestor,
    space: Arc<LiveObject>,
    mirror: Arc<LiveMirror>,
    window: WindowReader,
}

fn pipeline() -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let log = TelemetryLog::new(dir.path().join("telemetry.db"));
    // Every component initializes on startup
    log.initialize().unwrap();
    log.initialize().unwrap();

    let sink = Arc::new(MemorySink::new());
    let events = EventLog::new("test", sink.clone());
    let space = Arc::new(LiveObject::default());
    Pipeline {
        ingestor: Ingestor::new(log.clone(), events.for_component("ingestor")),
        mirror: Arc::new(LiveMirror::new(
            log.clone(),
            space.clone(),
            events.for_component("mirror"),
        )),
        window: WindowReader::new(log.clone()),
        space,
        sink,
        log,
        _dir: dir,
    }
}

#[test]
fn ingest_then_mirror_sets_live_temperature() {
    let p = pipeline();
    let raw = br#"{"ts":"2024-01-01T00:00:00","sensor":"sensor-001","temperature":24.5,"humidity":55.0}"#;
    assert_eq!(p.ingestor.on_message(raw), IngestOutcome::Stored(1));

    let latest = p.log.latest(1).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].sequence_id, 1);
    assert_eq!(
        latest[0].reading(),
        Reading {
            timestamp: "2024-01-01T00:00:00".to_string(),
            sensor_id: "sensor-001".to_string(),
            temperature: 24.5,
            humidity: 55.0,
        }
    );

    assert_eq!(p.mirror.tick(), MirrorOutcome::Updated(1));
    assert_eq!(
        p.space.read(LiveVariable::Temperature),
        LiveValue::Float(24.5)
    );
    assert_eq!(p.space.read(LiveVariable::Humidity), LiveValue::Float(55.0));
    assert_eq!(
        p.space.read(LiveVariable::Sensor),
        LiveValue::Text("sensor-001".to_string())
    );
}

#[test]
fn malformed_payload_is_logged_and_not_stored() {
    let p = pipeline();
    p.ingestor
        .on_message(br#"{"ts":"t","sensor":"a","temperature":1,"humidity":2}"#);
    let before = p.log.count().unwrap();

    assert_eq!(
        p.ingestor.on_message(br#"{"sensor":"x"}"#),
        IngestOutcome::Malformed
    );
    assert_eq!(p.log.count().unwrap(), before);

    let malformed = p.sink.with_error_kind("MalformedMessage");
    assert_eq!(malformed.len(), 1);
    assert_eq!(malformed[0].component, "ingestor");
}

#[test]
fn window_reflects_ingested_order() {
    let p = pipeline();
    for i in 0..4 {
        let raw = format!(
            r#"{{"ts":"2024-01-01T00:00:0{}","sensor":"sensor-001","temperature":{},"humidity":{}}}"#,
            i,
            20 + i,
            50 + i
        );
        p.ingestor.on_message(raw.as_bytes());
    }

    let window = p.window.read_window(200).unwrap();
    assert_eq!(window.len(), 4);
    assert_eq!(window.timestamps.first().unwrap(), "2024-01-01T00:00:00");
    assert_eq!(window.temperatures, vec![20.0, 21.0, 22.0, 23.0]);
    assert_eq!(window.humidities, vec![50.0, 51.0, 52.0, 53.0]);
    assert_eq!(window.rows.first().unwrap().sequence_id, 4);
}

#[tokio::test]
async fn mirror_loop_is_stale_until_next_tick() {
    let p = pipeline();
    p.ingestor
        .on_message(br#"{"ts":"t1","sensor":"sensor-007","temperature":30.5,"humidity":45}"#);

    let (trigger, mut ticker) = ManualTicker::pair();
    let cancel = CancellationToken::new();
    trigger.fire();
    drop(trigger);
    // Runs the single queued tick, then the ticker is exhausted
    p.mirror.clone().run(&mut ticker, &cancel).await;
    assert_eq!(p.space.snapshot().temperature, 30.5);
    assert_eq!(p.space.snapshot().sensor, "sensor-007");

    p.ingestor
        .on_message(br#"{"ts":"t2","sensor":"sensor-008","temperature":31.0,"humidity":46}"#);
    assert_eq!(p.space.snapshot().sensor, "sensor-007");

    let (trigger, mut ticker) = ManualTicker::pair();
    trigger.fire();
    drop(trigger);
    p.mirror.clone().run(&mut ticker, &cancel).await;
    assert_eq!(p.space.snapshot().sensor, "sensor-008");
    assert_eq!(p.space.snapshot().temperature, 31.0);
}
