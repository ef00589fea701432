//! Keel Telemetry
//!
//! In-memory metric and event buffers with a streaming z-score anomaly
//! detector, plus the process-wide `tracing` subscriber setup.

pub mod anomaly;
pub mod collector;
pub mod logging;
pub mod record;

pub use anomaly::{Anomaly, AnomalyDetector, Deviation, MetricSummary};
pub use collector::{TelemetryCollector, TelemetryStats};
pub use logging::init_logging;
pub use record::{
    EventRecord, MetricSample, MetricType, NewEvent, NewMetric, Tags, TelemetryLevel,
};
