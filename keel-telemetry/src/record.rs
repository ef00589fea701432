//! Metric and event records.

use std::collections::BTreeMap;
use std::fmt;

use keel_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for TelemetryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TelemetryLevel::Debug => "debug",
            TelemetryLevel::Info => "info",
            TelemetryLevel::Warning => "warning",
            TelemetryLevel::Error => "error",
            TelemetryLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    #[default]
    Gauge,
    Histogram,
    Timer,
}

/// A metric as submitted by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub name: String,
    pub value: f64,
    pub metric_type: MetricType,
    pub level: TelemetryLevel,
    pub tags: Tags,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl NewMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            metric_type: MetricType::default(),
            level: TelemetryLevel::default(),
            tags: Tags::new(),
            user_id: None,
            session_id: None,
        }
    }

    pub fn metric_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = metric_type;
        self
    }

    pub fn level(mut self, level: TelemetryLevel) -> Self {
        self.level = level;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A buffered metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub level: TelemetryLevel,
    pub tags: Tags,
    pub timestamp: Timestamp,
    pub source: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub anomaly: bool,
}

impl MetricSample {
    pub(crate) fn stamp(input: NewMetric, timestamp: Timestamp, source: &str, anomaly: bool) -> Self {
        Self {
            name: input.name,
            value: input.value,
            metric_type: input.metric_type,
            level: input.level,
            tags: input.tags,
            timestamp,
            source: source.to_string(),
            user_id: input.user_id,
            session_id: input.session_id,
            anomaly,
        }
    }
}

/// An event as submitted by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_name: String,
    /// Free-form category, e.g. `"user_action"`.
    pub event_type: String,
    pub event_data: Map<String, Value>,
    pub level: TelemetryLevel,
    pub tags: Tags,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl NewEvent {
    pub fn new(event_name: impl Into<String>, event_data: Map<String, Value>) -> Self {
        Self {
            event_name: event_name.into(),
            event_type: "event".to_string(),
            event_data,
            level: TelemetryLevel::default(),
            tags: Tags::new(),
            user_id: None,
            session_id: None,
        }
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn level(mut self, level: TelemetryLevel) -> Self {
        self.level = level;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A buffered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_data: Map<String, Value>,
    pub level: TelemetryLevel,
    pub tags: Tags,
    pub timestamp: Timestamp,
    pub source: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl EventRecord {
    pub(crate) fn stamp(input: NewEvent, timestamp: Timestamp, source: &str) -> Self {
        Self {
            event_name: input.event_name,
            event_type: input.event_type,
            event_data: input.event_data,
            level: input.level,
            tags: input.tags,
            timestamp,
            source: source.to_string(),
            user_id: input.user_id,
            session_id: input.session_id,
        }
    }
}
