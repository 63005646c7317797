// Request metrics for the producer endpoints

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use speech_core::MetricsSnapshot;

const LATENCY_WINDOW: usize = 1000;

/// Counters and a latency window for one endpoint
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    max_latency_ms: AtomicU64,
    latency_samples: Mutex<Vec<u64>>,
}

impl EndpointMetrics {
    pub fn record(&self, latency: Duration, ok: bool) {
        let latency_ms = latency.as_millis() as u64;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.push(latency_ms);
            if samples.len() > LATENCY_WINDOW {
                samples.remove(0);
            }
        }
    }

    fn percentile(sorted: &[u64], p: usize) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let index = (sorted.len() * p / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> EndpointStats {
        let mut sorted = self
            .latency_samples
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        sorted.sort_unstable();
        let avg_latency_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms,
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: Self::percentile(&sorted, 50),
            p95_latency_ms: Self::percentile(&sorted, 95),
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub speak: EndpointMetrics,
    pub chat: EndpointMetrics,
}

#[derive(Serialize, Debug)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}

#[derive(Serialize)]
pub struct EndpointMetricsResponse {
    pub speak: EndpointStats,
    pub chat: EndpointStats,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub playback: MetricsSnapshot,
    pub endpoints: EndpointMetricsResponse,
}
