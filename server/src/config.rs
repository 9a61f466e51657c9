// Configuration for the server, read from the environment

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tts_core::EngineConfig;

/// Inference backends this binary can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Piper,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piper" => Ok(BackendKind::Piper),
            other => Err(format!("unknown TTS_BACKEND '{other}' (expected 'piper')")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub api_key: Option<String>,
    pub backend: BackendKind,
    pub model_map: PathBuf,
    pub default_voice: Option<String>,
    pub premade_voices: Option<Vec<String>>,
    pub uploads_dir: PathBuf,
    pub max_text_length: usize,
    pub max_concurrent: usize,
    pub admission_timeout_secs: Option<u64>,
    pub chunk_budget: usize,
    pub stream_buffer: usize,
    pub voice_cache_capacity: Option<usize>,
    pub max_upload_bytes: usize,
    pub max_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            rate_limit_per_minute: 60,
            request_timeout_secs: 120,
            cors_allowed_origins: None,
            api_key: None,
            backend: BackendKind::Piper,
            model_map: PathBuf::from("models/map.json"),
            default_voice: None,
            premade_voices: None,
            uploads_dir: PathBuf::from("./uploaded_voices"),
            max_text_length: 10_000,
            max_concurrent: 2,
            admission_timeout_secs: None,
            chunk_budget: 80,
            stream_buffer: 3,
            voice_cache_capacity: None,
            max_upload_bytes: 20 * 1024 * 1024,
            max_batch: 16,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_string(key).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = match env_string("TTS_BACKEND").map(|v| v.parse::<BackendKind>()) {
            Some(Ok(kind)) => kind,
            Some(Err(e)) => {
                tracing::warn!("{e}, using piper");
                defaults.backend
            }
            None => defaults.backend,
        };

        Self {
            host: env_string("TTS_HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE").unwrap_or(defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs),
            cors_allowed_origins: env_list("CORS_ALLOWED_ORIGINS"),
            api_key: env_string("TTS_API_KEY"),
            backend,
            model_map: env_string("TTS_MODEL_MAP").map(PathBuf::from).unwrap_or(defaults.model_map),
            default_voice: env_string("TTS_DEFAULT_VOICE"),
            premade_voices: env_list("TTS_PREMADE_VOICES"),
            uploads_dir: env_string("TTS_UPLOADS_DIR").map(PathBuf::from).unwrap_or(defaults.uploads_dir),
            max_text_length: env_parse("TTS_MAX_TEXT_LENGTH").unwrap_or(defaults.max_text_length),
            max_concurrent: env_parse("TTS_MAX_CONCURRENT").unwrap_or(defaults.max_concurrent),
            admission_timeout_secs: env_parse("TTS_ADMISSION_TIMEOUT_SECS"),
            chunk_budget: env_parse("TTS_CHUNK_BUDGET").unwrap_or(defaults.chunk_budget),
            stream_buffer: env_parse("TTS_STREAM_BUFFER").unwrap_or(defaults.stream_buffer),
            voice_cache_capacity: env_parse("TTS_VOICE_CACHE_CAPACITY"),
            max_upload_bytes: env_parse("TTS_MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            max_batch: env_parse("TTS_MAX_BATCH").unwrap_or(defaults.max_batch),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Engine settings. `catalog` is used when `TTS_PREMADE_VOICES` is unset.
    pub fn engine_config(&self, catalog: Vec<String>) -> EngineConfig {
        EngineConfig {
            max_text_length: self.max_text_length,
            max_concurrent: self.max_concurrent,
            admission_timeout: self.admission_timeout_secs.map(Duration::from_secs),
            default_chunk_budget: self.chunk_budget,
            stream_buffer: self.stream_buffer,
            cache_capacity: self.voice_cache_capacity.and_then(NonZeroUsize::new),
            catalog: self.premade_voices.clone().unwrap_or(catalog),
            uploads_dir: self.uploads_dir.clone(),
        }
    }

    /// Voice used when a request names none.
    pub fn fallback_voice(&self, catalog: &[String]) -> String {
        self.default_voice
            .clone()
            .or_else(|| catalog.first().cloned())
            .unwrap_or_else(|| "alba".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("Piper".parse::<BackendKind>(), Ok(BackendKind::Piper));
        assert!("kokoro".parse::<BackendKind>().is_err());
    }

    #[test]
    fn engine_config_prefers_explicit_premade_list() {
        let config = ServerConfig {
            premade_voices: Some(vec!["alba".into()]),
            voice_cache_capacity: Some(0),
            admission_timeout_secs: Some(5),
            ..ServerConfig::default()
        };
        let engine = config.engine_config(vec!["amy".into(), "thorsten".into()]);
        assert_eq!(engine.catalog, vec!["alba".to_string()]);
        assert!(engine.cache_capacity.is_none());
        assert_eq!(engine.admission_timeout, Some(Duration::from_secs(5)));

        let engine = ServerConfig::default().engine_config(vec!["amy".into()]);
        assert_eq!(engine.catalog, vec!["amy".to_string()]);
    }

    #[test]
    fn fallback_voice_order() {
        let mut config = ServerConfig::default();
        assert_eq!(config.fallback_voice(&[]), "alba");
        assert_eq!(config.fallback_voice(&["amy".into()]), "amy");
        config.default_voice = Some("thorsten".into());
        assert_eq!(config.fallback_voice(&["amy".into()]), "thorsten");
    }
}
