// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tts_core::{CacheStats, SynthesisMetrics};

/// Latency samples kept per endpoint for percentiles.
const LATENCY_WINDOW: usize = 1000;

/// Per-endpoint metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub total_latency_ms: Arc<AtomicU64>,
    pub min_latency_ms: Arc<AtomicU64>,
    pub max_latency_ms: Arc<AtomicU64>,
    latency_samples: Arc<Mutex<Vec<u64>>>,
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
            if samples.len() > LATENCY_WINDOW {
                samples.remove(0);
            }
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one finished request, counting it as an error when `ok` is false.
    pub fn record(&self, started: Instant, ok: bool) {
        self.record_request(started.elapsed().as_millis() as u64);
        if !ok {
            self.record_error();
        }
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

/// Aggregates of the per-call synthesis metrics.
#[derive(Debug, Clone)]
pub struct TtsMetrics {
    pub synthesis_count: Arc<AtomicU64>,
    pub streaming_count: Arc<AtomicU64>,
    pub failure_count: Arc<AtomicU64>,
    total_synthesis_us: Arc<AtomicU64>,
    total_first_chunk_us: Arc<AtomicU64>,
    total_rtf_milli: Arc<AtomicU64>,
    pub total_samples: Arc<AtomicU64>,
}

impl TtsMetrics {
    pub fn new() -> Self {
        Self {
            synthesis_count: Arc::new(AtomicU64::new(0)),
            streaming_count: Arc::new(AtomicU64::new(0)),
            failure_count: Arc::new(AtomicU64::new(0)),
            total_synthesis_us: Arc::new(AtomicU64::new(0)),
            total_first_chunk_us: Arc::new(AtomicU64::new(0)),
            total_rtf_milli: Arc::new(AtomicU64::new(0)),
            total_samples: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_synthesis(&self, metrics: &SynthesisMetrics) {
        self.synthesis_count.fetch_add(1, Ordering::Relaxed);
        self.total_synthesis_us
            .fetch_add((metrics.total_time * 1e6) as u64, Ordering::Relaxed);
        self.total_rtf_milli
            .fetch_add((metrics.real_time_factor * 1e3) as u64, Ordering::Relaxed);
        self.total_samples
            .fetch_add(metrics.sample_count as u64, Ordering::Relaxed);
        if let Some(first) = metrics.first_chunk_latency {
            self.streaming_count.fetch_add(1, Ordering::Relaxed);
            self.total_first_chunk_us
                .fetch_add((first * 1e6) as u64, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    fn average(total: &AtomicU64, count: &AtomicU64, scale: f64) -> f64 {
        let count = count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        total.load(Ordering::Relaxed) as f64 / scale / count as f64
    }

    pub fn stats(&self) -> TtsMetricsResponse {
        TtsMetricsResponse {
            synthesis_count: self.synthesis_count.load(Ordering::Relaxed),
            streaming_count: self.streaming_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            avg_synthesis_time_ms: Self::average(&self.total_synthesis_us, &self.synthesis_count, 1e3),
            avg_rtf: Self::average(&self.total_rtf_milli, &self.synthesis_count, 1e3),
            avg_first_chunk_latency_ms: Self::average(&self.total_first_chunk_us, &self.streaming_count, 1e3),
            total_samples: self.total_samples.load(Ordering::Relaxed),
        }
    }
}

impl Default for TtsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub generate: EndpointMetrics,
    pub speech: EndpointMetrics,
    pub batch: EndpointMetrics,
    pub stream: EndpointMetrics,
    pub upload: EndpointMetrics,
    pub tts: TtsMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
pub struct DetailedMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub tts: TtsMetricsResponse,
    pub voice_cache: CacheStats,
    pub inference_in_flight: usize,
    pub inference_capacity: usize,
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
    pub fn collect(started: Instant) -> Self {
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
            uptime_seconds: started.elapsed().as_secs(),
            system_load: load_average(),
        }
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    std::fs::read_to_string("/proc/loadavg")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}

#[derive(Serialize)]
pub struct EndpointMetricsResponse {
    pub generate: EndpointStats,
    pub speech: EndpointStats,
    pub batch: EndpointStats,
    pub stream: EndpointStats,
    pub upload: EndpointStats,
}

impl From<&AppMetrics> for EndpointMetricsResponse {
    fn from(metrics: &AppMetrics) -> Self {
        Self {
            generate: metrics.generate.stats(),
            speech: metrics.speech.stats(),
            batch: metrics.batch.stats(),
            stream: metrics.stream.stats(),
            upload: metrics.upload.stats(),
        }
    }
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

#[derive(Debug, Serialize)]
pub struct TtsMetricsResponse {
    pub synthesis_count: u64,
    pub streaming_count: u64,
    pub failure_count: u64,
    pub avg_synthesis_time_ms: f64,
    pub avg_rtf: f64,
    pub avg_first_chunk_latency_ms: f64,
    pub total_samples: u64,
}
