//! Contract between the engine and an inference backend.
//!
//! The engine treats the model as a black box that can build per-voice
//! conditioning state and turn text into mono `f32` samples. Every method here
//! is blocking and is only ever called from the blocking worker pool.

use std::path::Path;

use crate::error::BackendError;
use crate::voice::VoiceKey;

/// Lazily produced chunks of samples from one streaming generation.
pub type ChunkIter = Box<dyn Iterator<Item = Result<Vec<f32>, BackendError>> + Send>;

pub trait InferenceBackend: Send + Sync + 'static {
    /// Backend-specific load configuration.
    type Config: Send + 'static;

    /// Per-voice conditioning state. Generation receives an owned copy, so the
    /// instance held by the cache is never touched by a call.
    type State: Clone + Send + Sync + 'static;

    /// Load the model. The sample rate reported afterwards is fixed for the
    /// lifetime of the backend.
    fn load(config: Self::Config) -> Result<Self, BackendError>
    where
        Self: Sized;

    fn sample_rate(&self) -> u32;

    /// Build conditioning state for a resolved voice resource.
    fn build_state(&self, resource: &VoiceKey) -> Result<Self::State, BackendError>;

    /// Generate the whole utterance in one call.
    fn generate_complete(&self, state: Self::State, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Generate incrementally. `chunk_budget` bounds how much text each internal
    /// step consumes; smaller budgets give earlier first chunks.
    fn generate_stream(
        &self,
        state: Self::State,
        text: &str,
        chunk_budget: usize,
    ) -> Result<ChunkIter, BackendError>;

    /// Persist state to a durable artifact that `build_state` can load later.
    fn serialize_state(&self, state: &Self::State, path: &Path) -> Result<(), BackendError>;
}
