//! Build Engine
//!
//! The host-side logging object tasks report to. Implementations are not
//! required to be thread-safe; tasks only call them from the thread that
//! invoked the task.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

/// Message verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageImportance {
    High,
    Normal,
    Low,
}

/// A host-defined structured event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomEvent {
    pub name: String,
    pub message: String,
    pub data: BTreeMap<String, String>,
}

impl CustomEvent {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Host logging interface
pub trait BuildEngine {
    fn log_message(&mut self, importance: MessageImportance, message: &str);
    fn log_warning(&mut self, code: Option<&str>, message: &str);
    fn log_error(&mut self, code: Option<&str>, message: &str);
    fn log_custom(&mut self, event: &CustomEvent);
    fn log_telemetry(&mut self, name: &str, properties: &BTreeMap<String, String>);
}

/// Forwards everything to `tracing`
#[derive(Debug, Default)]
pub struct TracingEngine;

impl BuildEngine for TracingEngine {
    fn log_message(&mut self, importance: MessageImportance, message: &str) {
        match importance {
            MessageImportance::Low => debug!("{}", message),
            _ => info!("{}", message),
        }
    }

    fn log_warning(&mut self, code: Option<&str>, message: &str) {
        warn!("{}: {}", code.unwrap_or("warning"), message);
    }

    fn log_error(&mut self, code: Option<&str>, message: &str) {
        error!("{}: {}", code.unwrap_or("error"), message);
    }

    fn log_custom(&mut self, event: &CustomEvent) {
        info!(event = %event.name, "{}", event.message);
    }

    fn log_telemetry(&mut self, name: &str, properties: &BTreeMap<String, String>) {
        debug!(telemetry = name, "{:?}", properties);
    }
}

/// Something a task reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Message {
        importance: MessageImportance,
        text: String,
    },
    Warning {
        code: Option<String>,
        text: String,
    },
    Error {
        code: Option<String>,
        text: String,
    },
    Custom(CustomEvent),
    Telemetry {
        name: String,
        properties: BTreeMap<String, String>,
    },
}

/// Keeps every event in order, for hosts that inspect results afterwards
#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub events: Vec<EngineEvent>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<(Option<&str>, &str)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error { code, text } => Some((code.as_deref(), text.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<(Option<&str>, &str)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Warning { code, text } => Some((code.as_deref(), text.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Message { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl BuildEngine for RecordingEngine {
    fn log_message(&mut self, importance: MessageImportance, message: &str) {
        self.events.push(EngineEvent::Message {
            importance,
            text: message.to_string(),
        });
    }

    fn log_warning(&mut self, code: Option<&str>, message: &str) {
        self.events.push(EngineEvent::Warning {
            code: code.map(String::from),
            text: message.to_string(),
        });
    }

    fn log_error(&mut self, code: Option<&str>, message: &str) {
        self.events.push(EngineEvent::Error {
            code: code.map(String::from),
            text: message.to_string(),
        });
    }

    fn log_custom(&mut self, event: &CustomEvent) {
        self.events.push(EngineEvent::Custom(event.clone()));
    }

    fn log_telemetry(&mut self, name: &str, properties: &BTreeMap<String, String>) {
        self.events.push(EngineEvent::Telemetry {
            name: name.to_string(),
            properties: properties.clone(),
        });
    }
}
