//! Piper ONNX voices as an [`InferenceBackend`].
//!
//! Voices are the models listed in a map file:
//!
//! ```json
//! {
//!   "thorsten": { "config": "models/de_DE/thorsten.onnx.json", "display_name": "Thorsten" },
//!   "amy": "models/en_US/amy.onnx.json"
//! }
//! ```
//!
//! A grouped entry `{ "default_voice": ..., "voices": { id: entry } }` is
//! flattened into its voice ids. Piper voices are separate models, so there is
//! no voice cloning: embeddings and raw audio are reported as unsupported.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use serde::Deserialize;
use tracing::{debug, info};

use crate::backend::{ChunkIter, InferenceBackend};
use crate::error::BackendError;
use crate::text::{chunk_for_streaming, pause_after, pause_samples, split_at_pauses};
use crate::voice::VoiceKey;

#[derive(Debug, Clone)]
pub struct PiperConfig {
    /// Path to the voice map JSON.
    pub map_file: PathBuf,
    /// Voice that fixes the backend sample rate. Defaults to the first entry
    /// of the map in name order.
    pub default_voice: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MapEntry {
    Path(String),
    Grouped { voices: BTreeMap<String, VoiceEntry> },
    Voice(VoiceEntry),
}

#[derive(Debug, Clone, Deserialize)]
struct VoiceEntry {
    config: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// Per-voice state: a loaded synthesizer and its output rate.
#[derive(Clone)]
pub struct PiperVoice {
    synth: Arc<PiperSpeechSynthesizer>,
    sample_rate: u32,
}

impl std::fmt::Debug for PiperVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiperVoice")
            .field("synth", &"<PiperSpeechSynthesizer>")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

pub struct PiperBackend {
    voices: BTreeMap<String, VoiceEntry>,
    sample_rate: u32,
}

impl PiperBackend {
    /// Voice names from the map, sorted.
    pub fn voice_names(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }

    /// Display name of a catalog voice, if the map gives one.
    pub fn display_name(&self, voice: &str) -> Option<&str> {
        self.voices.get(voice)?.display_name.as_deref()
    }

    fn config_path(&self, resource: &VoiceKey) -> Result<PathBuf, BackendError> {
        if let Some(entry) = self.voices.get(resource.as_str()) {
            return Ok(PathBuf::from(&entry.config));
        }

        let path = resource.as_path();
        if !resource.is_path() || !path.is_file() {
            return Err(BackendError::NotFound {
                resource: resource.to_string(),
            });
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(path.to_path_buf()),
            _ => Err(BackendError::Unsupported(format!(
                "piper voices are model configs, cannot clone a voice from {}",
                path.display()
            ))),
        }
    }
}

fn parse_map(text: &str) -> Result<BTreeMap<String, VoiceEntry>, serde_json::Error> {
    let raw: BTreeMap<String, MapEntry> = serde_json::from_str(text)?;
    let mut voices = BTreeMap::new();
    for (name, entry) in raw {
        match entry {
            MapEntry::Path(config) => {
                voices.insert(
                    name,
                    VoiceEntry {
                        config,
                        display_name: None,
                    },
                );
            }
            MapEntry::Voice(entry) => {
                voices.insert(name, entry);
            }
            MapEntry::Grouped { voices: group } => voices.extend(group),
        }
    }
    Ok(voices)
}

/// Read `audio.sample_rate` from a Piper model config.
fn read_sample_rate(config_path: &Path) -> Result<u32, BackendError> {
    let unreadable = |detail: String| BackendError::Unreadable {
        resource: config_path.display().to_string(),
        detail,
    };
    let text = fs::read_to_string(config_path).map_err(|e| unreadable(e.to_string()))?;
    let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| unreadable(e.to_string()))?;
    json.get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .and_then(|sr| u32::try_from(sr).ok())
        .ok_or_else(|| unreadable("missing or invalid 'audio.sample_rate'".to_string()))
}

fn synthesize_segment(synth: &PiperSpeechSynthesizer, text: &str) -> Result<Vec<f32>, BackendError> {
    let parts: PiperSpeechStreamParallel = synth
        .synthesize_parallel(text.to_string(), None)
        .map_err(|e| BackendError::Generation(e.to_string()))?;

    let mut samples = Vec::new();
    for part in parts {
        samples.extend(part.map_err(|e| BackendError::Generation(e.to_string()))?.into_vec());
    }
    Ok(samples)
}

impl InferenceBackend for PiperBackend {
    type Config = PiperConfig;
    type State = PiperVoice;

    fn load(config: PiperConfig) -> Result<Self, BackendError> {
        let map_text = match fs::read_to_string(&config.map_file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackendError::NotFound {
                    resource: config.map_file.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let voices = parse_map(&map_text).map_err(|e| BackendError::Unreadable {
            resource: config.map_file.display().to_string(),
            detail: e.to_string(),
        })?;

        let default_voice = match config.default_voice {
            Some(name) => name,
            None => voices
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| BackendError::Unsupported("voice map has no entries".to_string()))?,
        };
        let entry = voices.get(&default_voice).ok_or_else(|| BackendError::NotFound {
            resource: default_voice.clone(),
        })?;
        let sample_rate = read_sample_rate(Path::new(&entry.config))?;

        info!(voices = voices.len(), default_voice = %default_voice, sample_rate, "loaded piper voice map");
        Ok(Self { voices, sample_rate })
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn build_state(&self, resource: &VoiceKey) -> Result<PiperVoice, BackendError> {
        let config_path = self.config_path(resource)?;
        let sample_rate = read_sample_rate(&config_path)?;
        if sample_rate != self.sample_rate {
            return Err(BackendError::Unsupported(format!(
                "voice {resource} runs at {sample_rate} Hz, engine runs at {} Hz",
                self.sample_rate
            )));
        }

        let unreadable = |detail: String| BackendError::Unreadable {
            resource: config_path.display().to_string(),
            detail,
        };
        let model = piper_rs::from_config_path(&config_path).map_err(|e| unreadable(e.to_string()))?;
        let synth = PiperSpeechSynthesizer::new(model).map_err(|e| unreadable(e.to_string()))?;
        debug!(voice = %resource, config = %config_path.display(), "piper synthesizer ready");

        Ok(PiperVoice {
            synth: Arc::new(synth),
            sample_rate,
        })
    }

    fn generate_complete(&self, state: PiperVoice, text: &str) -> Result<Vec<f32>, BackendError> {
        let segments: Vec<String> = split_at_pauses(text)
            .into_iter()
            .filter(|segment| !segment.trim().is_empty())
            .collect();

        let mut samples = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            samples.extend(synthesize_segment(&state.synth, segment.trim())?);
            if i + 1 < segments.len() {
                let silence = pause_samples(pause_after(segment), state.sample_rate);
                samples.resize(samples.len() + silence, 0.0);
            }
        }
        Ok(samples)
    }

    fn generate_stream(&self, state: PiperVoice, text: &str, chunk_budget: usize) -> Result<ChunkIter, BackendError> {
        let segments = chunk_for_streaming(text, chunk_budget);
        let last = segments.len().saturating_sub(1);

        let chunks = segments.into_iter().enumerate().map(move |(i, segment)| {
            let mut samples = synthesize_segment(&state.synth, &segment)?;
            if i < last {
                let silence = pause_samples(pause_after(&segment), state.sample_rate);
                samples.resize(samples.len() + silence, 0.0);
            }
            Ok(samples)
        });
        Ok(Box::new(chunks))
    }

    fn serialize_state(&self, _state: &PiperVoice, path: &Path) -> Result<(), BackendError> {
        Err(BackendError::Unsupported(format!(
            "piper voices cannot be exported to {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_accepts_paths_objects_and_groups() {
        let voices = parse_map(
            r#"{
                "amy": "models/amy.onnx.json",
                "thorsten": { "config": "models/thorsten.onnx.json", "display_name": "Thorsten" },
                "de_DE": {
                    "default_voice": "kerstin",
                    "voices": { "kerstin": { "config": "models/kerstin.onnx.json" } }
                }
            }"#,
        )
        .unwrap();

        let names: Vec<&str> = voices.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["amy", "kerstin", "thorsten"]);
        assert_eq!(voices["amy"].config, "models/amy.onnx.json");
        assert_eq!(voices["thorsten"].display_name.as_deref(), Some("Thorsten"));
    }

    #[test]
    fn sample_rate_comes_from_model_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.onnx.json");
        fs::write(&path, r#"{"audio": {"sample_rate": 22050}}"#).unwrap();
        assert_eq!(read_sample_rate(&path).unwrap(), 22_050);

        fs::write(&path, r#"{"audio": {}}"#).unwrap();
        assert!(matches!(read_sample_rate(&path), Err(BackendError::Unreadable { .. })));
    }

    #[test]
    fn load_reports_missing_map() {
        let err = PiperBackend::load(PiperConfig {
            map_file: PathBuf::from("does/not/exist.json"),
            default_voice: None,
        })
        .err()
        .unwrap();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[test]
    fn audio_assets_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("amy.onnx.json");
        fs::write(&config, r#"{"audio": {"sample_rate": 22050}}"#).unwrap();
        let map = dir.path().join("map.json");
        fs::write(&map, format!(r#"{{"amy": {:?}}}"#, config.display().to_string())).unwrap();

        let backend = PiperBackend::load(PiperConfig {
            map_file: map,
            default_voice: None,
        })
        .unwrap();
        assert_eq!(backend.sample_rate(), 22_050);
        assert_eq!(backend.voice_names(), vec!["amy".to_string()]);

        let wav = dir.path().join("bob.wav");
        fs::write(&wav, b"RIFF").unwrap();
        let err = backend.config_path(&VoiceKey::from(wav.as_path())).unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));

        let missing = dir.path().join("nobody.safetensors");
        let err = backend.config_path(&VoiceKey::from(missing.as_path())).unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
        // bare names outside the map never fall through to the filesystem
        let err = backend.config_path(&VoiceKey::new("nobody")).unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }
}
