//! Voice-cloning TTS orchestration.
//!
//! [`TtsEngine`] sits between a transport layer and an [`InferenceBackend`]:
//! it validates requests, resolves voice identifiers, caches per-voice
//! conditioning state, bounds concurrent inference and measures every call.

pub mod admission;
pub mod backend;
pub mod cache;
pub mod error;
pub mod metrics;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod piper;
pub mod stream;
pub mod text;
pub mod validation;
pub mod voice;
pub mod wav;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

pub use admission::{AdmissionController, AdmissionPermit};
pub use backend::{ChunkIter, InferenceBackend};
pub use cache::{CacheStats, VoiceCache};
pub use error::{BackendError, TtsError, TtsResult, ValidationError};
pub use metrics::{SynthesisMetrics, SynthesisTimer};
pub use stream::{AudioChunk, StreamEvent, SynthesisStream};
pub use voice::{VoiceInfo, VoiceKey, VoiceKind, VoiceResolver};

use stream::StreamJob;
use validation::{validate_chunk_budget, validate_text, validate_voice_id};

/// Engine knobs. The server builds this from its environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest accepted text, in characters.
    pub max_text_length: usize,
    /// Concurrent inference calls across the process.
    pub max_concurrent: usize,
    /// Longest wait for an inference slot; `None` waits indefinitely.
    pub admission_timeout: Option<Duration>,
    pub default_chunk_budget: usize,
    /// Chunks buffered between a streaming producer and its consumer.
    pub stream_buffer: usize,
    /// Voice states kept in memory; `None` keeps all of them.
    pub cache_capacity: Option<NonZeroUsize>,
    /// Premade voice names.
    pub catalog: Vec<String>,
    pub uploads_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_text_length: 10_000,
            max_concurrent: 2,
            admission_timeout: None,
            default_chunk_budget: 80,
            stream_buffer: 3,
            cache_capacity: None,
            catalog: Vec::new(),
            uploads_dir: PathBuf::from("./uploaded_voices"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynthesisMode {
    #[default]
    Complete,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub mode: SynthesisMode,
    /// Per-step text budget for streaming; the engine default when `None`.
    pub chunk_budget: Option<usize>,
}

impl SynthesisRequest {
    pub fn complete(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            mode: SynthesisMode::Complete,
            chunk_budget: None,
        }
    }

    pub fn streaming(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            mode: SynthesisMode::Streaming,
            ..Self::complete(text, voice)
        }
    }

    pub fn with_chunk_budget(mut self, chunk_budget: usize) -> Self {
        self.chunk_budget = Some(chunk_budget);
        self
    }
}

/// Result of a complete synthesis: one buffer for the whole utterance.
#[derive(Debug, Clone)]
pub struct CompleteSynthesis {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub metrics: SynthesisMetrics,
}

#[derive(Debug)]
pub enum SynthesisOutput {
    Complete(CompleteSynthesis),
    Streaming(SynthesisStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub model_loaded: bool,
    pub sample_rate: Option<u32>,
}

/// Orchestrates synthesis over one shared backend.
pub struct TtsEngine<B: InferenceBackend> {
    backend: Arc<B>,
    resolver: VoiceResolver,
    cache: VoiceCache<B>,
    admission: AdmissionController,
    config: EngineConfig,
}

impl<B: InferenceBackend> TtsEngine<B> {
    /// Load the backend on the blocking pool and build an engine around it.
    pub async fn init(config: EngineConfig, backend_config: B::Config) -> TtsResult<Self> {
        let started = Instant::now();
        let backend = tokio::task::spawn_blocking(move || B::load(backend_config))
            .await
            .map_err(|e| TtsError::Worker(e.to_string()))?
            .map_err(TtsError::Init)?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            sample_rate = backend.sample_rate(),
            "inference backend loaded"
        );
        Ok(Self::with_backend(config, backend))
    }

    /// Build an engine around an already loaded backend.
    pub fn with_backend(config: EngineConfig, backend: B) -> Self {
        let backend = Arc::new(backend);
        Self {
            resolver: VoiceResolver::new(config.catalog.clone(), config.uploads_dir.clone()),
            cache: VoiceCache::new(Arc::clone(&backend), config.cache_capacity),
            admission: AdmissionController::new(config.max_concurrent, config.admission_timeout),
            backend,
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &VoiceResolver {
        &self.resolver
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn sample_rate(&self) -> u32 {
        self.backend.sample_rate()
    }

    /// Shutdown closes the admission gate, so the gate is the source of truth.
    pub fn is_shut_down(&self) -> bool {
        self.admission.is_closed()
    }

    pub fn health(&self) -> Health {
        if self.is_shut_down() {
            return Health {
                model_loaded: false,
                sample_rate: None,
            };
        }
        Health {
            model_loaded: true,
            sample_rate: Some(self.sample_rate()),
        }
    }

    fn ensure_running(&self) -> TtsResult<()> {
        if self.is_shut_down() {
            return Err(TtsError::ShutDown);
        }
        Ok(())
    }

    /// Premade voices first, in catalog order, then uploads sorted by name.
    pub fn list_voices(&self) -> Vec<VoiceInfo> {
        let premade = self.resolver.catalog().iter().map(|name| VoiceInfo {
            name: name.clone(),
            kind: VoiceKind::Premade,
            path: None,
            cached: self.cache.contains(&VoiceKey::new(name.as_str())),
        });
        let uploads = self.resolver.list_uploads().into_iter().map(|upload| VoiceInfo {
            cached: self.cache.contains(&upload.key),
            path: Some(upload.key.to_string()),
            name: upload.name,
            kind: upload.kind,
        });
        premade.chain(uploads).collect()
    }

    /// Conditioning state for a voice identifier, loading it on first use.
    pub async fn voice_state(&self, voice_id: &str) -> TtsResult<Arc<B::State>> {
        validate_voice_id(voice_id)?;
        let key = self.resolver.resolve(voice_id);
        self.cache
            .get_or_create(&key)
            .await
            .map_err(|e| e.for_voice(voice_id))
    }

    pub async fn synthesize(&self, request: SynthesisRequest) -> TtsResult<SynthesisOutput> {
        match request.mode {
            SynthesisMode::Complete => self
                .synthesize_complete(&request.text, &request.voice)
                .await
                .map(SynthesisOutput::Complete),
            SynthesisMode::Streaming => self
                .synthesize_stream(&request.text, &request.voice, request.chunk_budget)
                .await
                .map(SynthesisOutput::Streaming),
        }
    }

    /// Synthesize the whole utterance and return it as one buffer.
    pub async fn synthesize_complete(&self, text: &str, voice: &str) -> TtsResult<CompleteSynthesis> {
        let timer = SynthesisTimer::start(self.sample_rate());
        self.ensure_running()?;
        validate_text(text, self.config.max_text_length)?;

        let state = self.voice_state(voice).await?;
        let permit = self.admission.acquire().await?;

        let backend = Arc::clone(&self.backend);
        let state = (*state).clone();
        let owned_text = text.to_string();
        let samples = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            backend.generate_complete(state, &owned_text)
        })
        .await
        .map_err(|e| TtsError::Worker(e.to_string()))?
        .map_err(|source| {
            warn!(voice, error = %source, "synthesis failed");
            TtsError::Synthesis { source }
        })?;

        let metrics = timer.finish_complete(samples.len());
        info!(
            voice,
            chars = text.chars().count(),
            samples = metrics.sample_count,
            total_time = metrics.total_time,
            rtf = metrics.real_time_factor,
            "synthesis finished"
        );
        Ok(CompleteSynthesis {
            samples,
            sample_rate: self.sample_rate(),
            metrics,
        })
    }

    /// Start a streaming synthesis. Validation, voice loading and admission
    /// happen before this returns. Generation starts on the first poll and
    /// runs at most `stream_buffer + 1` chunks ahead of the consumer.
    pub async fn synthesize_stream(
        &self,
        text: &str,
        voice: &str,
        chunk_budget: Option<usize>,
    ) -> TtsResult<SynthesisStream> {
        let timer = SynthesisTimer::start(self.sample_rate());
        self.ensure_running()?;
        validate_text(text, self.config.max_text_length)?;
        let chunk_budget = chunk_budget.unwrap_or(self.config.default_chunk_budget);
        validate_chunk_budget(chunk_budget)?;

        let state = self.voice_state(voice).await?;
        let permit = self.admission.acquire().await?;

        Ok(stream::spawn(StreamJob {
            backend: Arc::clone(&self.backend),
            state: (*state).clone(),
            text: text.to_string(),
            chunk_budget,
            buffer: self.config.stream_buffer,
            permit,
            timer,
        }))
    }

    /// Build state straight from a raw voice asset and write it next to the
    /// asset as `<stem>.safetensors`. The cache is neither read nor filled.
    pub async fn export_voice(&self, asset: &Path) -> TtsResult<PathBuf> {
        self.ensure_running()?;
        let started = Instant::now();
        let target = asset.with_extension(voice::EMBEDDING_EXTENSION);

        let backend = Arc::clone(&self.backend);
        let key = VoiceKey::from(asset);
        let out = target.clone();
        tokio::task::spawn_blocking(move || {
            let state = backend.build_state(&key)?;
            backend.serialize_state(&state, &out)
        })
        .await
        .map_err(|e| TtsError::Worker(e.to_string()))?
        .map_err(|source| {
            warn!(asset = %asset.display(), error = %source, "voice export failed");
            TtsError::Export {
                asset: asset.to_path_buf(),
                source,
            }
        })?;

        // States built from the overwritten files are stale.
        self.cache.invalidate(&VoiceKey::from(asset));
        self.cache.invalidate(&VoiceKey::from(target.as_path()));

        info!(
            asset = %asset.display(),
            embedding = %target.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "exported voice embedding"
        );
        Ok(target)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Refuse new work, fail pending admissions and drop cached voices.
    /// Streams already admitted run to completion.
    pub fn shutdown(&self) {
        if self.admission.is_closed() {
            return;
        }
        self.admission.close();
        self.cache.clear();
        info!("tts engine shut down");
    }
}
