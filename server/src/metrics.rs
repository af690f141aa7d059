// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Latency and error tracking for one HTTP endpoint
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub total_latency_ms: Arc<AtomicU64>,
    pub min_latency_ms: Arc<AtomicU64>,
    pub max_latency_ms: Arc<AtomicU64>,
    // Last MAX_LATENCY_SAMPLES samples, for percentiles
    pub latency_samples: Arc<Mutex<Vec<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.push(latency_ms);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> EndpointStats {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for call sessions and speech instances
#[derive(Debug, Clone, Default)]
pub struct CallMetrics {
    pub sessions_started: Arc<AtomicU64>,
    pub sessions_ended: Arc<AtomicU64>,
    pub speeches_started: Arc<AtomicU64>,
    pub speeches_completed: Arc<AtomicU64>,
    pub speeches_cancelled: Arc<AtomicU64>,
    pub speeches_failed: Arc<AtomicU64>,
    pub barge_ins: Arc<AtomicU64>,
    pub frames_sent: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub malformed_messages: Arc<AtomicU64>,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_sessions: usize) -> CallMetricsResponse {
        let load = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);
        CallMetricsResponse {
            active_sessions: active_sessions as u64,
            sessions_started: load(&self.sessions_started),
            sessions_ended: load(&self.sessions_ended),
            speeches_started: load(&self.speeches_started),
            speeches_completed: load(&self.speeches_completed),
            speeches_cancelled: load(&self.speeches_cancelled),
            speeches_failed: load(&self.speeches_failed),
            barge_ins: load(&self.barge_ins),
            frames_sent: load(&self.frames_sent),
            frames_dropped: load(&self.frames_dropped),
            malformed_messages: load(&self.malformed_messages),
        }
    }
}

/// Everything `/metrics` reports
#[derive(Debug, Clone)]
pub struct AppMetrics {
    pub calls: CallMetrics,
    pub speak: EndpointMetrics,
    pub started_at: Instant,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self {
            calls: CallMetrics::new(),
            speak: EndpointMetrics::new(),
            started_at: Instant::now(),
        }
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub calls: CallMetricsResponse,
    pub speak: EndpointStats,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    pub fn collect(started_at: Instant) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: started_at.elapsed().as_secs(),
            system_load: load_average(),
        }
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()?
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CallMetricsResponse {
    pub active_sessions: u64,
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub speeches_started: u64,
    pub speeches_completed: u64,
    pub speeches_cancelled: u64,
    pub speeches_failed: u64,
    pub barge_ins: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub malformed_messages: u64,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}
