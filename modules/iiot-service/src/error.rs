//! Error taxonomy for the telemetry pipeline.

use std::fmt;

/// Failure classes shared by every component.
///
/// Per-message and per-tick failures are logged and swallowed by the loops;
/// only startup failures are returned out of `main`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Payload could not be decoded or a field could not be coerced
    MalformedMessage(String),
    /// Durable log could not be opened, read or written
    StoreUnavailable(String),
    /// Broker connect/publish/subscribe failure
    TransportUnavailable(String),
    /// Live endpoint bind or variable write failure
    LiveInterfaceUnavailable(String),
    /// Dashboard listener could not be bound or stopped serving
    DashboardUnavailable(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedMessage(_) => "MalformedMessage",
            PipelineError::StoreUnavailable(_) => "StoreUnavailable",
            PipelineError::TransportUnavailable(_) => "TransportUnavailable",
            PipelineError::LiveInterfaceUnavailable(_) => "LiveInterfaceUnavailable",
            PipelineError::DashboardUnavailable(_) => "DashboardUnavailable",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PipelineError::MalformedMessage(m)
            | PipelineError::StoreUnavailable(m)
            | PipelineError::TransportUnavailable(m)
            | PipelineError::LiveInterfaceUnavailable(m)
            | PipelineError::DashboardUnavailable(m) => m,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for PipelineError {}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::StoreUnavailable(e.to_string())
    }
}

impl From<rumqttc::ClientError> for PipelineError {
    fn from(e: rumqttc::ClientError) -> Self {
        PipelineError::TransportUnavailable(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for PipelineError {
    fn from(e: rumqttc::ConnectionError) -> Self {
        PipelineError::TransportUnavailable(e.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
