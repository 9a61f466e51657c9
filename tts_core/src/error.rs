use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by an inference backend.
///
/// Backends classify their failures here so callers never have to inspect
/// message text to decide what went wrong.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("resource {resource} is unreadable: {detail}")]
    Unreadable { resource: String, detail: String },

    #[error("unsupported by this backend: {0}")]
    Unsupported(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Request rejected before the backend is touched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Text cannot be empty")]
    EmptyText,

    #[error("Text too long ({length} characters, max {max})")]
    TextTooLong { length: usize, max: usize },

    #[error("Invalid voice identifier: {0}")]
    InvalidVoiceId(String),

    #[error("Chunk budget must be a positive integer")]
    InvalidChunkBudget,
}

/// Domain errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Voice not found or unreadable: {voice}")]
    VoiceLoad {
        voice: String,
        #[source]
        source: BackendError,
    },

    #[error("Synthesis failed")]
    Synthesis {
        #[source]
        source: BackendError,
    },

    #[error("No synthesis capacity available after {0:?}")]
    CapacityTimeout(Duration),

    #[error("Voice export failed for {}", asset.display())]
    Export {
        asset: PathBuf,
        #[source]
        source: BackendError,
    },

    #[error("Inference backend failed to initialize")]
    Init(#[source] BackendError),

    #[error("TTS engine is shut down")]
    ShutDown,

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl TtsError {
    /// Re-label a voice load failure with the identifier the caller used.
    pub(crate) fn for_voice(self, voice_id: &str) -> Self {
        match self {
            TtsError::VoiceLoad { source, .. } => TtsError::VoiceLoad {
                voice: voice_id.to_string(),
                source,
            },
            other => other,
        }
    }

    /// Backend detail attached to this error, if any.
    pub fn detail(&self) -> Option<String> {
        match self {
            TtsError::VoiceLoad { source, .. }
            | TtsError::Synthesis { source }
            | TtsError::Export { source, .. }
            | TtsError::Init(source) => Some(source.to_string()),
            _ => None,
        }
    }
}

pub type TtsResult<T> = Result<T, TtsError>;
