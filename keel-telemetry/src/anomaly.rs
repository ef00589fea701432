//! Streaming z-score anomaly detection.
//!
//! Each metric name keeps a sliding window of its most recent values. A new
//! value is scored against the window as it stood *before* that value
//! arrived, then appended. When every retained value is identical the
//! standard deviation is zero; the new value is then anomalous only if it
//! differs from them.

use std::collections::{HashMap, VecDeque};

use keel_core::Timestamp;
use serde::{Deserialize, Serialize};

/// A flagged observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric_name: String,
    pub value: f64,
    /// Infinite when the window had zero spread.
    pub z_score: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub detected_at: Timestamp,
}

/// How far an anomalous value sat from the window it was scored against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub z_score: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Descriptive statistics over a metric's retained window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    fn of(values: &VecDeque<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        Some(Self {
            count,
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}

/// Per-name sliding windows. Not synchronized; the collector owns one
/// behind its lock.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    window: usize,
    threshold: f64,
    series: HashMap<String, VecDeque<f64>>,
}

impl AnomalyDetector {
    pub fn new(window: usize, threshold: f64) -> Self {
        Self {
            window: window.max(1),
            threshold,
            series: HashMap::new(),
        }
    }

    /// Record `value` under `name`, returning its deviation if it is anomalous.
    ///
    /// The first observation for a name is never anomalous. Non-finite
    /// values are dropped without touching the window.
    pub fn observe(&mut self, name: &str, value: f64) -> Option<Deviation> {
        if !value.is_finite() {
            tracing::warn!(
                metric = %name,
                value,
                "non-finite metric value skipped by anomaly detector"
            );
            return None;
        }
        let window = self.window;
        let threshold = self.threshold;
        let values = self.series.entry(name.to_string()).or_default();

        let z = MetricSummary::of(values).and_then(|s| {
            // Rounding in the mean leaves a tiny nonzero spread on flat series.
            let tolerance = 1e-9 * s.mean.abs();
            let deviation = (value - s.mean).abs();
            let z = if s.std_dev <= tolerance {
                if deviation <= tolerance {
                    0.0
                } else {
                    f64::INFINITY
                }
            } else {
                deviation / s.std_dev
            };
            (z > threshold).then_some(Deviation {
                z_score: z,
                mean: s.mean,
                std_dev: s.std_dev,
            })
        });

        if values.len() >= window {
            values.pop_front();
        }
        values.push_back(value);
        z
    }

    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        self.series.get(name).and_then(MetricSummary::of)
    }

    /// Names with at least one retained observation, sorted.
    pub fn tracked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.keys().cloned().collect();
        names.sort();
        names
    }
}
