//! Shared types for the IIoT telemetry service and its HTTP clients.

use serde::{Deserialize, Serialize};

// =====================================================
// Domain Types
// =====================================================

/// A single sensor reading as produced by the publisher.
///
/// Serializes to the transport wire format:
/// `{"ts": "...", "sensor": "...", "temperature": 24.5, "humidity": 55.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "ts")]
    pub timestamp: String,
    #[serde(rename = "sensor")]
    pub sensor_id: String,
    pub temperature: f64,
    pub humidity: f64,
}

/// A reading that has been appended to the durable log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Insertion-order key assigned by the log. Sole authority for "latest".
    pub sequence_id: i64,
    pub timestamp: String,
    pub sensor_id: String,
    pub temperature: f64,
    pub humidity: f64,
}

impl TelemetryRecord {
    pub fn reading(&self) -> Reading {
        Reading {
            timestamp: self.timestamp.clone(),
            sensor_id: self.sensor_id.clone(),
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }
}

// =====================================================
// Live Address Space
// =====================================================

/// Name of the container object holding the live variables.
pub const LIVE_OBJECT: &str = "IIoT";

/// Namespace the live container is registered under.
pub const LIVE_NAMESPACE: &str = "http://example.org/iiot";

/// Scalar value of a live variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveValue {
    Float(f64),
    Text(String),
}

/// Point-in-time copy of all live variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "Humidity")]
    pub humidity: f64,
    #[serde(rename = "Sensor")]
    pub sensor: String,
}

impl Default for LiveSnapshot {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            humidity: 0.0,
            sensor: "sensor-001".to_string(),
        }
    }
}

/// A single addressable variable as reported over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveVariableView {
    pub object: String,
    pub name: String,
    pub value: LiveValue,
}

// =====================================================
// Window / Dashboard Types
// =====================================================

/// Most recent N records, laid out for time-series presentation.
///
/// The three series are oldest-first and always the same length.
/// `rows` keeps the records newest-first, as the log returned them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowSeries {
    pub timestamps: Vec<String>,
    pub temperatures: Vec<f64>,
    pub humidities: Vec<f64>,
    pub rows: Vec<TelemetryRecord>,
}

impl WindowSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WindowQuery {
    pub rows: Option<usize>,
}

// =====================================================
// RPC Request Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct LiveWriteRequest {
    pub value: serde_json::Value,
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub total_records: u64,
    pub latest: Option<TelemetryRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_uses_wire_keys() {
        let reading = Reading {
            timestamp: "2024-01-01T00:00:00".to_string(),
            sensor_id: "sensor-001".to_string(),
            temperature: 24.5,
            humidity: 55.0,
        };
        let value = serde_json::to_value(&reading).unwrap();
        assert_eq!(value["ts"], "2024-01-01T00:00:00");
        assert_eq!(value["sensor"], "sensor-001");
        assert_eq!(value["temperature"], 24.5);
        assert_eq!(value["humidity"], 55.0);
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_live_snapshot_names() {
        let value = serde_json::to_value(LiveSnapshot::default()).unwrap();
        assert_eq!(value["Temperature"], 0.0);
        assert_eq!(value["Humidity"], 0.0);
        assert_eq!(value["Sensor"], "sensor-001");
    }

    #[test]
    fn test_rpc_response_skips_empty_fields() {
        let ok = serde_json::to_string(&RpcResponse::ok(1)).unwrap();
        assert_eq!(ok, r#"{"success":true,"data":1}"#);
        let err = serde_json::to_string(&RpcResponse::<i32>::err("nope")).unwrap();
        assert_eq!(err, r#"{"success":false,"error":"nope"}"#);
    }
}
