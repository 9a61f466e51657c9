//! Timing of a single synthesis call.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Timings attached to one synthesis result. All durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisMetrics {
    pub total_time: f64,
    /// Only set for streaming synthesis.
    pub first_chunk_latency: Option<f64>,
    pub audio_duration: f64,
    #[serde(rename = "rtf")]
    pub real_time_factor: f64,
    #[serde(rename = "samples")]
    pub sample_count: usize,
}

impl SynthesisMetrics {
    fn new(total: Duration, first_chunk: Option<Duration>, sample_count: usize, sample_rate: u32) -> Self {
        let total_time = total.as_secs_f64();
        let audio_duration = audio_duration(sample_count, sample_rate);
        Self {
            total_time,
            first_chunk_latency: first_chunk.map(|d| d.as_secs_f64()),
            audio_duration,
            real_time_factor: real_time_factor(total_time, audio_duration),
            sample_count,
        }
    }
}

/// Seconds of audio represented by `sample_count` mono samples.
pub fn audio_duration(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / f64::from(sample_rate)
}

/// Processing time over audio time; 0 when there is no audio.
pub fn real_time_factor(total_time: f64, audio_duration: f64) -> f64 {
    if audio_duration > 0.0 {
        total_time / audio_duration
    } else {
        0.0
    }
}

/// Wall-clock timer for one synthesis call.
///
/// Streaming callers feed it every produced chunk; the metrics are only
/// complete once [`SynthesisTimer::finish`] is called at end of stream.
#[derive(Debug, Clone)]
pub struct SynthesisTimer {
    started: Instant,
    first_chunk: Option<Duration>,
    sample_count: usize,
    sample_rate: u32,
}

impl SynthesisTimer {
    pub fn start(sample_rate: u32) -> Self {
        Self::starting_at(Instant::now(), sample_rate)
    }

    pub fn starting_at(started: Instant, sample_rate: u32) -> Self {
        Self {
            started,
            first_chunk: None,
            sample_count: 0,
            sample_rate,
        }
    }

    pub fn record_chunk(&mut self, samples: usize) {
        if self.first_chunk.is_none() {
            self.first_chunk = Some(self.started.elapsed());
        }
        self.sample_count += samples;
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Metrics for a streaming call.
    pub fn finish(self) -> SynthesisMetrics {
        SynthesisMetrics::new(self.started.elapsed(), self.first_chunk, self.sample_count, self.sample_rate)
    }

    /// Metrics for a complete call that produced `samples` in one buffer.
    pub fn finish_complete(self, samples: usize) -> SynthesisMetrics {
        SynthesisMetrics::new(self.started.elapsed(), None, samples, self.sample_rate)
    }
}
