//! Live-query address space: one container object (`IIoT`) holding three
//! writable scalar variables, served over HTTP.
//!
//! The mirror writes into it from the log; external clients may read and
//! write it through the routes below.

use crate::error::{PipelineError, PipelineResult};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use iiot_types::{LIVE_NAMESPACE, LIVE_OBJECT, LiveSnapshot, LiveValue, LiveVariableView, LiveWriteRequest, RpcResponse};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveVariable {
    Temperature,
    Humidity,
    Sensor,
}

impl LiveVariable {
    pub const ALL: [LiveVariable; 3] = [
        LiveVariable::Temperature,
        LiveVariable::Humidity,
        LiveVariable::Sensor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LiveVariable::Temperature => "Temperature",
            LiveVariable::Humidity => "Humidity",
            LiveVariable::Sensor => "Sensor",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name().eq_ignore_ascii_case(name))
    }

    /// Converts an externally supplied JSON value to this variable's type.
    pub fn coerce(self, value: &serde_json::Value) -> Option<LiveValue> {
        match (self, value) {
            (LiveVariable::Sensor, serde_json::Value::String(s)) => Some(LiveValue::Text(s.clone())),
            (LiveVariable::Temperature | LiveVariable::Humidity, serde_json::Value::Number(n)) => {
                n.as_f64().map(LiveValue::Float)
            }
            _ => None,
        }
    }
}

/// Anything the mirror can project records into.
pub trait LiveAddressSpace: Send + Sync {
    fn write(&self, variable: LiveVariable, value: LiveValue) -> PipelineResult<()>;
    fn read(&self, variable: LiveVariable) -> LiveValue;
    fn snapshot(&self) -> LiveSnapshot;
}

/// In-process container object backing the HTTP surface.
pub struct LiveObject {
    name: &'static str,
    namespace: &'static str,
    values: RwLock<LiveSnapshot>,
}

impl Default for LiveObject {
    fn default() -> Self {
        Self::new(LiveSnapshot::default())
    }
}

impl LiveObject {
    pub fn new(initial: LiveSnapshot) -> Self {
        Self {
            name: LIVE_OBJECT,
            namespace: LIVE_NAMESPACE,
            values: RwLock::new(initial),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    fn view(&self, variable: LiveVariable) -> LiveVariableView {
        LiveVariableView {
            object: self.name.to_string(),
            name: variable.name().to_string(),
            value: self.read(variable),
        }
    }
}

impl LiveAddressSpace for LiveObject {
    fn write(&self, variable: LiveVariable, value: LiveValue) -> PipelineResult<()> {
        let mut values = self.values.write();
        match (variable, value) {
            (LiveVariable::Temperature, LiveValue::Float(v)) => values.temperature = v,
            (LiveVariable::Humidity, LiveValue::Float(v)) => values.humidity = v,
            (LiveVariable::Sensor, LiveValue::Text(s)) => values.sensor = s,
            (variable, value) => {
                return Err(PipelineError::LiveInterfaceUnavailable(format!(
                    "{} cannot hold {:?}",
                    variable.name(),
                    value
                )));
            }
        }
        Ok(())
    }

    fn read(&self, variable: LiveVariable) -> LiveValue {
        let values = self.values.read();
        match variable {
            LiveVariable::Temperature => LiveValue::Float(values.temperature),
            LiveVariable::Humidity => LiveValue::Float(values.humidity),
            LiveVariable::Sensor => LiveValue::Text(values.sensor.clone()),
        }
    }

    fn snapshot(&self) -> LiveSnapshot {
        self.values.read().clone()
    }
}

// =====================================================
// HTTP Endpoints
// =====================================================

pub fn router(space: Arc<LiveObject>) -> axum::Router {
    axum::Router::new()
        .route("/objects/IIoT", axum::routing::get(object_read))
        .route(
            "/objects/IIoT/:variable",
            axum::routing::get(variable_read).put(variable_write),
        )
        .with_state(space)
        .layer(tower_http::cors::CorsLayer::permissive())
}

// GET /objects/IIoT
pub async fn object_read(
    State(space): State<Arc<LiveObject>>,
) -> (StatusCode, Json<RpcResponse<LiveSnapshot>>) {
    (StatusCode::OK, Json(RpcResponse::ok(space.snapshot())))
}

// GET /objects/IIoT/:variable
pub async fn variable_read(
    State(space): State<Arc<LiveObject>>,
    Path(variable): Path<String>,
) -> (StatusCode, Json<RpcResponse<LiveVariableView>>) {
    match LiveVariable::from_name(&variable) {
        Some(v) => (StatusCode::OK, Json(RpcResponse::ok(space.view(v)))),
        None => (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!("No variable '{}' on {}", variable, space.name()))),
        ),
    }
}

// PUT /objects/IIoT/:variable
pub async fn variable_write(
    State(space): State<Arc<LiveObject>>,
    Path(variable): Path<String>,
    Json(req): Json<LiveWriteRequest>,
) -> (StatusCode, Json<RpcResponse<LiveVariableView>>) {
    let Some(target) = LiveVariable::from_name(&variable) else {
        return (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!("No variable '{}' on {}", variable, space.name()))),
        );
    };
    let Some(value) = target.coerce(&req.value) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(RpcResponse::err(format!(
                "Value {} does not match the type of {}",
                req.value,
                target.name()
            ))),
        );
    };
    match space.write(target, value) {
        Ok(()) => (StatusCode::OK, Json(RpcResponse::ok(space.view(target)))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to write: {}", e))),
        ),
    }
}
