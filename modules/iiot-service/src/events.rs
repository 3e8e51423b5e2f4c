//! Structured event logging handed to each component at construction.
//!
//! Components never touch the `log` macros directly. They hold an
//! [`EventLog`] tagged with their component name and emit
//! `(severity, component, message, fields)` events through an [`EventSink`].

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    fn level(self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warn => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

/// One structured log event
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub severity: Severity,
    pub component: &'static str,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
}

impl LogEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Destination for log events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LogEvent);
}

/// Forwards events to the `log` facade (and so to `env_logger`).
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: LogEvent) {
        let level = event.severity.level();
        if !log::log_enabled!(target: "iiot", level) {
            return;
        }
        let mut line = format!("[{}] {}", event.component.to_uppercase(), event.message);
        for (key, value) in &event.fields {
            line.push_str(&format!(" {}={}", key, value));
        }
        log::log!(target: "iiot", level, "{}", line);
    }
}

/// Keeps every event in memory. Used by tests to assert on logged conditions.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Events whose `error` field equals the given error kind
    pub fn with_error_kind(&self, kind: &str) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.field("error") == Some(kind))
            .cloned()
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: LogEvent) {
        self.events.lock().push(event);
    }
}

/// Component-scoped handle onto an [`EventSink`]
#[derive(Clone)]
pub struct EventLog {
    component: &'static str,
    sink: Arc<dyn EventSink>,
}

impl EventLog {
    pub fn new(component: &'static str, sink: Arc<dyn EventSink>) -> Self {
        Self { component, sink }
    }

    /// Same sink, different component tag
    pub fn for_component(&self, component: &'static str) -> Self {
        Self {
            component,
            sink: self.sink.clone(),
        }
    }

    pub fn emit(&self, severity: Severity, message: impl Into<String>, fields: &[(&'static str, String)]) {
        self.sink.emit(LogEvent {
            severity,
            component: self.component,
            message: message.into(),
            fields: fields.to_vec(),
        });
    }

    pub fn debug(&self, message: impl Into<String>, fields: &[(&'static str, String)]) {
        self.emit(Severity::Debug, message, fields);
    }

    pub fn info(&self, message: impl Into<String>, fields: &[(&'static str, String)]) {
        self.emit(Severity::Info, message, fields);
    }

    pub fn warn(&self, message: impl Into<String>, fields: &[(&'static str, String)]) {
        self.emit(Severity::Warn, message, fields);
    }

    pub fn error(&self, message: impl Into<String>, fields: &[(&'static str, String)]) {
        self.emit(Severity::Error, message, fields);
    }

    /// Logs a classified pipeline failure with `error` and `detail` fields.
    pub fn failure(
        &self,
        severity: Severity,
        message: impl Into<String>,
        err: &crate::error::PipelineError,
        fields: &[(&'static str, String)],
    ) {
        let mut all = Vec::with_capacity(fields.len() + 2);
        all.push(("error", err.kind().to_string()));
        all.push(("detail", err.message().to_string()));
        all.extend_from_slice(fields);
        self.emit(severity, message, &all);
    }
}
