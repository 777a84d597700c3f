//! Prometheus-compatible agent metrics.
//!
//! A process-local collector; the exposition endpoint lives outside the
//! core and consumes [`AgentMetrics::export`].

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Type of metric for Prometheus compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    /// Monotonically increasing value.
    Counter,
    /// Value that can go up or down.
    Gauge,
}

/// Value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// Counter value.
    Counter(u64),
    /// Gauge value.
    Gauge(f64),
}

/// A single metric with metadata and value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name.
    pub name: String,
    /// Help text.
    pub help: String,
    /// Type of metric.
    pub metric_type: MetricType,
    /// Current value.
    pub value: MetricValue,
    /// Label key-value pairs.
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Inner {
    volumes: HashMap<String, f64>,
    exports: HashMap<String, f64>,
    volume_size_bytes: HashMap<(String, String), f64>,
    volume_used_bytes: HashMap<(String, String), f64>,
}

/// Gauge collector shared by the engine and both reconcilers.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    inner: Mutex<Inner>,
}

impl AgentMetrics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the volume count gauge for a tenant.
    pub fn set_volumes(&self, tenant: &str, count: f64) {
        self.inner.lock().volumes.insert(tenant.to_string(), count);
    }

    /// Sets the live export count gauge for a tenant.
    pub fn set_exports(&self, tenant: &str, count: f64) {
        self.inner.lock().exports.insert(tenant.to_string(), count);
    }

    /// Sets the quota-size gauge for a volume.
    pub fn set_volume_size(&self, tenant: &str, volume: &str, bytes: f64) {
        self.inner
            .lock()
            .volume_size_bytes
            .insert((tenant.to_string(), volume.to_string()), bytes);
    }

    /// Sets the used-bytes gauge for a volume.
    pub fn set_volume_used(&self, tenant: &str, volume: &str, bytes: f64) {
        self.inner
            .lock()
            .volume_used_bytes
            .insert((tenant.to_string(), volume.to_string()), bytes);
    }

    /// Drops the per-volume gauges of a deleted volume.
    pub fn forget_volume(&self, tenant: &str, volume: &str) {
        let key = (tenant.to_string(), volume.to_string());
        let mut inner = self.inner.lock();
        inner.volume_size_bytes.remove(&key);
        inner.volume_used_bytes.remove(&key);
    }

    /// Snapshots all metrics for exposition.
    pub fn export(&self) -> Vec<Metric> {
        let inner = self.inner.lock();
        let mut metrics = Vec::new();

        for (tenant, count) in &inner.volumes {
            metrics.push(Metric {
                name: "cowshed_agent_volumes".to_string(),
                help: "Current number of volumes.".to_string(),
                metric_type: MetricType::Gauge,
                value: MetricValue::Gauge(*count),
                labels: vec![("tenant".to_string(), tenant.clone())],
            });
        }

        for (tenant, count) in &inner.exports {
            metrics.push(Metric {
                name: "cowshed_agent_exports".to_string(),
                help: "Current number of NFS exports.".to_string(),
                metric_type: MetricType::Gauge,
                value: MetricValue::Gauge(*count),
                labels: vec![("tenant".to_string(), tenant.clone())],
            });
        }

        for ((tenant, volume), bytes) in &inner.volume_size_bytes {
            metrics.push(Metric {
                name: "cowshed_agent_volume_size_bytes".to_string(),
                help: "Volume quota size in bytes.".to_string(),
                metric_type: MetricType::Gauge,
                value: MetricValue::Gauge(*bytes),
                labels: vec![
                    ("tenant".to_string(), tenant.clone()),
                    ("volume".to_string(), volume.clone()),
                ],
            });
        }

        for ((tenant, volume), bytes) in &inner.volume_used_bytes {
            metrics.push(Metric {
                name: "cowshed_agent_volume_used_bytes".to_string(),
                help: "Volume used space in bytes.".to_string(),
                metric_type: MetricType::Gauge,
                value: MetricValue::Gauge(*bytes),
                labels: vec![
                    ("tenant".to_string(), tenant.clone()),
                    ("volume".to_string(), volume.clone()),
                ],
            });
        }

        metrics
    }

    /// Reads back a gauge by name and labels. Test helper.
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.export()
            .into_iter()
            .find(|m| {
                m.name == name
                    && m.labels.len() == labels.len()
                    && m.labels
                        .iter()
                        .zip(labels)
                        .all(|((k, v), (lk, lv))| k == lk && v == lv)
            })
            .map(|m| match m.value {
                MetricValue::Gauge(v) => v,
                MetricValue::Counter(v) => v as f64,
            })
    }
}
