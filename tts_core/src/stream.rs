//! Streaming synthesis.
//!
//! A blocking producer drives the backend's chunk iterator and forwards every
//! chunk through a bounded channel. The producer starts on the first poll of
//! the lazy [`SynthesisStream`], which yields chunks in order and ends with
//! exactly one [`StreamEvent::Done`] carrying the call's metrics. The backend
//! runs at most `buffer + 1` chunks ahead of the consumer. Dropping the stream
//! closes the channel; the producer notices on its next send, stops, and gives
//! its admission slot back.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::admission::AdmissionPermit;
use crate::backend::InferenceBackend;
use crate::error::{BackendError, TtsError, TtsResult};
use crate::metrics::{SynthesisMetrics, SynthesisTimer};

/// One contiguous piece of generated audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioChunk {
    /// Zero-based index of the chunk within its stream.
    pub position: usize,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(AudioChunk),
    /// Terminal event of a successful stream.
    Done(SynthesisMetrics),
}

/// Lazy, single-pass stream of one streaming synthesis.
pub struct SynthesisStream {
    sample_rate: u32,
    inner: Pin<Box<dyn Stream<Item = TtsResult<StreamEvent>> + Send>>,
}

impl SynthesisStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl fmt::Debug for SynthesisStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisStream")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl Stream for SynthesisStream {
    type Item = TtsResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Everything a producer needs, moved onto the blocking pool.
pub(crate) struct StreamJob<B: InferenceBackend> {
    pub backend: Arc<B>,
    pub state: B::State,
    pub text: String,
    pub chunk_budget: usize,
    pub buffer: usize,
    pub permit: AdmissionPermit,
    pub timer: SynthesisTimer,
}

pub(crate) fn spawn<B: InferenceBackend>(job: StreamJob<B>) -> SynthesisStream {
    let StreamJob {
        backend,
        state,
        text,
        chunk_budget,
        buffer,
        permit,
        timer,
    } = job;
    let sample_rate = backend.sample_rate();
    let (tx, mut rx) = mpsc::channel::<Result<Vec<f32>, BackendError>>(buffer.max(1));

    let events = async_stream::stream! {
        // Nothing is generated before the first poll; the slot is already held.
        let producer = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let chunks = match backend.generate_stream(state, &text, chunk_budget) {
                Ok(chunks) => chunks,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };

            for chunk in chunks {
                let failed = chunk.is_err();
                if tx.blocking_send(chunk).is_err() {
                    debug!("stream consumer went away, stopping generation");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        let mut timer = timer;
        let mut position = 0;

        while let Some(chunk) = rx.recv().await {
            match chunk {
                Ok(samples) if samples.is_empty() => continue,
                Ok(samples) => {
                    timer.record_chunk(samples.len());
                    yield Ok(StreamEvent::Chunk(AudioChunk { position, samples }));
                    position += 1;
                    tokio::task::yield_now().await;
                }
                Err(source) => {
                    warn!(chunks = position, error = %source, "streaming synthesis failed");
                    yield Err(TtsError::Synthesis { source });
                    return;
                }
            }
        }

        // The channel also closes when the producer panics.
        if let Err(e) = producer.await {
            yield Err(TtsError::Worker(e.to_string()));
            return;
        }

        let metrics = timer.finish();
        info!(
            chunks = position,
            samples = metrics.sample_count,
            total_time = metrics.total_time,
            first_chunk_latency = metrics.first_chunk_latency,
            rtf = metrics.real_time_factor,
            "streaming synthesis finished"
        );
        yield Ok(StreamEvent::Done(metrics));
    };

    SynthesisStream {
        sample_rate,
        inner: Box::pin(events),
    }
}
