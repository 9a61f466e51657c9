//! In-process backend for tests.
//!
//! Produces deterministic silence-shaped audio and counts every call so tests
//! can assert how often the engine reached the backend.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{ChunkIter, InferenceBackend};
use crate::error::BackendError;
use crate::voice::VoiceKey;

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub sample_rate: u32,
    /// Voice names the mock knows without a file on disk.
    pub catalog: Vec<String>,
    /// Samples produced per word of input text.
    pub samples_per_word: usize,
    pub build_delay: Duration,
    /// Delay before each generated chunk (or the whole buffer in complete mode).
    pub generate_delay: Duration,
    /// Fail the stream after this many chunks have been produced.
    pub fail_after_chunks: Option<usize>,
    /// Fail complete generation.
    pub fail_complete: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            catalog: vec!["alba".into(), "marius".into(), "javert".into()],
            samples_per_word: 240,
            build_delay: Duration::ZERO,
            generate_delay: Duration::ZERO,
            fail_after_chunks: None,
            fail_complete: false,
        }
    }
}

/// State handed out by [`MockBackend`]: the resource it was built from and a
/// serial number unique per construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockVoice {
    pub resource: String,
    pub serial: usize,
}

#[derive(Debug, Default)]
struct Counters {
    builds: AtomicUsize,
    generations: AtomicUsize,
    exports: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Counters {
    fn enter(self: &Arc<Self>) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }
}

// Marks one generation as running until dropped.
struct InFlight(Arc<Counters>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockBackend {
    config: MockConfig,
    catalog: HashSet<String>,
    counters: Arc<Counters>,
}

impl MockBackend {
    pub fn build_calls(&self) -> usize {
        self.counters.builds.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.counters.generations.load(Ordering::SeqCst)
    }

    pub fn export_calls(&self) -> usize {
        self.counters.exports.load(Ordering::SeqCst)
    }

    /// Generations running right now, streaming ones included until dropped.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Samples the mock produces for `text`.
    pub fn samples_for(&self, text: &str) -> usize {
        text.split_whitespace().count() * self.config.samples_per_word
    }
}

impl InferenceBackend for MockBackend {
    type Config = MockConfig;
    type State = MockVoice;

    fn load(config: MockConfig) -> Result<Self, BackendError> {
        if config.sample_rate == 0 {
            return Err(BackendError::Unsupported("sample rate must be positive".into()));
        }
        Ok(Self {
            catalog: config.catalog.iter().cloned().collect(),
            config,
            counters: Arc::new(Counters::default()),
        })
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn build_state(&self, resource: &VoiceKey) -> Result<MockVoice, BackendError> {
        let serial = self.counters.builds.fetch_add(1, Ordering::SeqCst) + 1;
        std::thread::sleep(self.config.build_delay);

        let known = self.catalog.contains(resource.as_str()) || resource.as_path().is_file();
        if !known {
            return Err(BackendError::NotFound {
                resource: resource.to_string(),
            });
        }
        Ok(MockVoice {
            resource: resource.to_string(),
            serial,
        })
    }

    fn generate_complete(&self, _state: MockVoice, text: &str) -> Result<Vec<f32>, BackendError> {
        self.counters.generations.fetch_add(1, Ordering::SeqCst);
        let _running = self.counters.enter();
        std::thread::sleep(self.config.generate_delay);
        if self.config.fail_complete {
            return Err(BackendError::Generation("mock failure".into()));
        }
        Ok(vec![0.0; self.samples_for(text)])
    }

    fn generate_stream(&self, _state: MockVoice, text: &str, chunk_budget: usize) -> Result<ChunkIter, BackendError> {
        self.counters.generations.fetch_add(1, Ordering::SeqCst);
        let running = self.counters.enter();
        let words: Vec<usize> = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .chunks(chunk_budget.max(1))
            .map(<[&str]>::len)
            .collect();
        let samples_per_word = self.config.samples_per_word;
        let delay = self.config.generate_delay;
        let fail_after = self.config.fail_after_chunks;

        let chunks = words.into_iter().enumerate().map(move |(index, count)| {
            let _running = &running;
            std::thread::sleep(delay);
            if fail_after.is_some_and(|limit| index >= limit) {
                return Err(BackendError::Generation(format!("mock failure at chunk {index}")));
            }
            Ok(vec![0.0; count * samples_per_word])
        });
        Ok(Box::new(chunks))
    }

    fn serialize_state(&self, state: &MockVoice, path: &Path) -> Result<(), BackendError> {
        self.counters.exports.fetch_add(1, Ordering::SeqCst);
        fs::write(path, state.resource.as_bytes())?;
        Ok(())
    }
}
