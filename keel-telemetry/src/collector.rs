//! The telemetry collector.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use keel_core::{Clock, KeelError, KeelResult, StorageError, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::anomaly::{Anomaly, AnomalyDetector, MetricSummary};
use crate::record::{EventRecord, MetricSample, MetricType, NewEvent, NewMetric, TelemetryLevel};

const ANOMALY_HISTORY: usize = 1000;

/// Snapshot of collector counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub buffered_metrics: usize,
    pub buffered_events: usize,
    pub processed_batches: u64,
    pub total_metrics: u64,
    pub total_events: u64,
    pub anomalies_detected: u64,
    pub tracked_metrics: Vec<String>,
}

#[derive(Debug)]
struct CollectorInner {
    metrics: Vec<MetricSample>,
    events: Vec<EventRecord>,
    detector: AnomalyDetector,
    anomalies: VecDeque<Anomaly>,
    processed_batches: u64,
    total_metrics: u64,
    total_events: u64,
    anomalies_detected: u64,
}

/// Buffered recorder for metrics and events.
///
/// A buffer is shipped (here: cleared) whenever it reaches
/// `batch_size`, bumping the processed-batches counter.
#[derive(Debug)]
pub struct TelemetryCollector {
    inner: Mutex<CollectorInner>,
    config: TelemetryConfig,
    clock: Arc<dyn Clock>,
}

impl TelemetryCollector {
    /// # Errors
    ///
    /// `StorageError::CapacityInvalid` if `batch_size` or `anomaly_window` is 0.
    pub fn new(config: TelemetryConfig, clock: Arc<dyn Clock>) -> KeelResult<Self> {
        if config.batch_size == 0 || config.anomaly_window == 0 {
            return Err(StorageError::CapacityInvalid { store: "telemetry" }.into());
        }
        let detector = AnomalyDetector::new(config.anomaly_window, config.anomaly_z_threshold);
        Ok(Self {
            inner: Mutex::new(CollectorInner {
                metrics: Vec::with_capacity(config.batch_size),
                events: Vec::with_capacity(config.batch_size),
                detector,
                anomalies: VecDeque::new(),
                processed_batches: 0,
                total_metrics: 0,
                total_events: 0,
                anomalies_detected: 0,
            }),
            config,
            clock,
        })
    }

    fn lock(&self) -> KeelResult<MutexGuard<'_, CollectorInner>> {
        self.inner.lock().map_err(|_| KeelError::poisoned("telemetry"))
    }

    /// Buffer a metric, scoring it for anomalies first.
    ///
    /// Returns the stamped sample, whose `anomaly` flag reports the verdict.
    pub async fn record_metric(&self, metric: NewMetric) -> KeelResult<MetricSample> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let deviation = inner.detector.observe(&metric.name, metric.value);
        let sample = MetricSample::stamp(metric, now, &self.config.source, deviation.is_some());

        if let Some(d) = deviation {
            tracing::warn!(
                metric = %sample.name,
                value = sample.value,
                z_score = d.z_score,
                "anomalous metric value"
            );
            if inner.anomalies.len() >= ANOMALY_HISTORY {
                inner.anomalies.pop_front();
            }
            inner.anomalies.push_back(Anomaly {
                metric_name: sample.name.clone(),
                value: sample.value,
                z_score: d.z_score,
                mean: d.mean,
                std_dev: d.std_dev,
                detected_at: now,
            });
            inner.anomalies_detected += 1;
        }

        inner.metrics.push(sample.clone());
        inner.total_metrics += 1;
        if inner.metrics.len() >= self.config.batch_size {
            let shipped = inner.metrics.len();
            inner.metrics.clear();
            inner.processed_batches += 1;
            tracing::debug!(shipped, "flushed metric batch");
        }
        Ok(sample)
    }

    /// Buffer an event.
    pub async fn record_event(&self, event: NewEvent) -> KeelResult<EventRecord> {
        let record = EventRecord::stamp(event, self.clock.now(), &self.config.source);
        let mut inner = self.lock()?;
        inner.events.push(record.clone());
        inner.total_events += 1;
        if inner.events.len() >= self.config.batch_size {
            let shipped = inner.events.len();
            inner.events.clear();
            inner.processed_batches += 1;
            tracing::debug!(shipped, "flushed event batch");
        }
        Ok(record)
    }

    /// Record `"{operation}.duration"` in milliseconds, tagged with the
    /// outcome, plus an `"{operation}.errors"` counter when it failed.
    pub async fn record_performance_metric(
        &self,
        operation: &str,
        duration: Duration,
        success: bool,
    ) -> KeelResult<MetricSample> {
        let timing = NewMetric::new(
            format!("{}.duration", operation),
            duration.as_secs_f64() * 1000.0,
        )
        .metric_type(MetricType::Timer)
        .tag("operation", operation)
        .tag("success", success.to_string());
        let sample = self.record_metric(timing).await?;

        if !success {
            let errors = NewMetric::new(format!("{}.errors", operation), 1.0)
                .metric_type(MetricType::Counter)
                .level(TelemetryLevel::Error)
                .tag("operation", operation);
            self.record_metric(errors).await?;
        }
        Ok(sample)
    }

    /// Ship whatever is buffered. Returns the number of records shipped.
    pub async fn flush(&self) -> KeelResult<usize> {
        let mut inner = self.lock()?;
        let shipped = inner.metrics.len() + inner.events.len();
        if shipped > 0 {
            inner.metrics.clear();
            inner.events.clear();
            inner.processed_batches += 1;
            tracing::debug!(shipped, "telemetry flushed");
        }
        Ok(shipped)
    }

    pub async fn get_stats(&self) -> KeelResult<TelemetryStats> {
        let inner = self.lock()?;
        Ok(TelemetryStats {
            buffered_metrics: inner.metrics.len(),
            buffered_events: inner.events.len(),
            processed_batches: inner.processed_batches,
            total_metrics: inner.total_metrics,
            total_events: inner.total_events,
            anomalies_detected: inner.anomalies_detected,
            tracked_metrics: inner.detector.tracked_names(),
        })
    }

    /// Statistics over the retained anomaly window for `name`.
    pub async fn get_metric_summary(&self, name: &str) -> KeelResult<Option<MetricSummary>> {
        Ok(self.lock()?.detector.summary(name))
    }

    /// Up to `limit` most recent anomalies, newest first.
    pub async fn recent_anomalies(&self, limit: usize) -> KeelResult<Vec<Anomaly>> {
        Ok(self
            .lock()?
            .anomalies
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ManualClock;
    use serde_json::Map;

    fn collector_with(batch_size: usize) -> TelemetryCollector {
        let config = TelemetryConfig {
            batch_size,
            ..TelemetryConfig::default()
        };
        TelemetryCollector::new(config, Arc::new(ManualClock::starting_now())).unwrap()
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = TelemetryConfig {
            batch_size: 0,
            ..TelemetryConfig::default()
        };
        let err = TelemetryCollector::new(config, Arc::new(ManualClock::starting_now()))
            .unwrap_err();
        assert_eq!(
            err,
            KeelError::Storage(StorageError::CapacityInvalid { store: "telemetry" })
        );
    }

    #[tokio::test]
    async fn test_anomaly_sequence() {
        let telemetry = collector_with(100);
        let mut flags = Vec::new();
        for v in [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 1000.0] {
            let sample = telemetry
                .record_metric(NewMetric::new("response_ms", v))
                .await
                .unwrap();
            flags.push(sample.anomaly);
        }
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        assert!(flags[9]);

        let anomalies = telemetry.recent_anomalies(10).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].metric_name, "response_ms");
        assert_eq!(anomalies[0].value, 1000.0);
        assert!(anomalies[0].z_score > 3.0);

        let stats = telemetry.get_stats().await.unwrap();
        assert_eq!(stats.anomalies_detected, 1);
        assert_eq!(stats.tracked_metrics, vec!["response_ms".to_string()]);
    }

    #[tokio::test]
    async fn test_metric_buffer_flushes_at_batch_size() {
        let telemetry = collector_with(100);
        for i in 0..99 {
            telemetry
                .record_metric(NewMetric::new("m", i as f64))
                .await
                .unwrap();
        }
        let stats = telemetry.get_stats().await.unwrap();
        assert_eq!(stats.buffered_metrics, 99);
        assert_eq!(stats.processed_batches, 0);

        telemetry
            .record_metric(NewMetric::new("m", 99.0))
            .await
            .unwrap();
        let stats = telemetry.get_stats().await.unwrap();
        assert_eq!(stats.buffered_metrics, 0);
        assert_eq!(stats.processed_batches, 1);
        assert_eq!(stats.total_metrics, 100);
    }

    #[tokio::test]
    async fn test_event_buffer_and_manual_flush() {
        let telemetry = collector_with(3);
        telemetry
            .record_event(NewEvent::new("login", Map::new()).user("alice"))
            .await
            .unwrap();
        telemetry
            .record_metric(NewMetric::new("m", 1.0))
            .await
            .unwrap();

        assert_eq!(telemetry.flush().await.unwrap(), 2);
        assert_eq!(telemetry.flush().await.unwrap(), 0);

        let stats = telemetry.get_stats().await.unwrap();
        assert_eq!(stats.buffered_events, 0);
        assert_eq!(stats.processed_batches, 1);
        assert_eq!(stats.total_events, 1);
    }

    #[tokio::test]
    async fn test_record_event_stamps_source() {
        let telemetry = collector_with(100);
        let record = telemetry
            .record_event(NewEvent::new("deploy", Map::new()).tag("env", "prod"))
            .await
            .unwrap();
        assert_eq!(record.source, "keel");
        assert_eq!(record.tags["env"], "prod");
    }

    #[tokio::test]
    async fn test_performance_metric_failure_records_error_counter() {
        let telemetry = collector_with(100);
        let sample = telemetry
            .record_performance_metric("complete", Duration::from_millis(250), false)
            .await
            .unwrap();
        assert_eq!(sample.name, "complete.duration");
        assert_eq!(sample.metric_type, MetricType::Timer);
        assert_eq!(sample.tags["success"], "false");
        assert!((sample.value - 250.0).abs() < 1e-6);

        let stats = telemetry.get_stats().await.unwrap();
        assert_eq!(stats.total_metrics, 2);
        assert_eq!(
            stats.tracked_metrics,
            vec!["complete.duration".to_string(), "complete.errors".to_string()]
        );
    }

    #[tokio::test]
    async fn test_performance_metric_success_records_only_timing() {
        let telemetry = collector_with(100);
        telemetry
            .record_performance_metric("complete", Duration::from_millis(5), true)
            .await
            .unwrap();
        assert_eq!(telemetry.get_stats().await.unwrap().total_metrics, 1);
    }

    #[tokio::test]
    async fn test_metric_summary() {
        let telemetry = collector_with(100);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            telemetry
                .record_metric(NewMetric::new("s", v))
                .await
                .unwrap();
        }
        let summary = telemetry.get_metric_summary("s").await.unwrap().unwrap();
        assert_eq!(summary.count, 8);
        assert!((summary.mean - 5.0).abs() < 1e-9);
        assert!((summary.std_dev - 2.0).abs() < 1e-9);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
        assert!(telemetry.get_metric_summary("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_anomalies_newest_first() {
        let telemetry = collector_with(100);
        telemetry.record_metric(NewMetric::new("a", 1.0)).await.unwrap();
        telemetry.record_metric(NewMetric::new("a", 50.0)).await.unwrap();
        telemetry.record_metric(NewMetric::new("b", 1.0)).await.unwrap();
        telemetry.record_metric(NewMetric::new("b", 70.0)).await.unwrap();

        let anomalies = telemetry.recent_anomalies(10).await.unwrap();
        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0].metric_name, "b");
        assert_eq!(anomalies[1].metric_name, "a");
        assert_eq!(telemetry.recent_anomalies(1).await.unwrap().len(), 1);
    }
}
