use std::path::Path;

use tts_core::voice::AUDIO_EXTENSIONS;

use crate::error::ApiError;

/// Longest stored voice name, in characters.
const MAX_VOICE_NAME_LENGTH: usize = 64;

/// Audio encodings served by the speech endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    /// Raw little-endian `f32` samples.
    Pcm,
}

/// Validate the OpenAI-style `response_format` field.
pub fn validate_response_format(format: &str) -> Result<AudioFormat, ApiError> {
    match format.to_ascii_lowercase().as_str() {
        "wav" => Ok(AudioFormat::Wav),
        "pcm" => Ok(AudioFormat::Pcm),
        other => Err(ApiError::InvalidInput(format!(
            "Unsupported response_format '{other}'. Supported: wav, pcm"
        ))),
    }
}

pub fn validate_batch_size(len: usize, max: usize) -> Result<(), ApiError> {
    if len == 0 {
        return Err(ApiError::InvalidInput("Batch must contain at least one request".to_string()));
    }
    if len > max {
        return Err(ApiError::InvalidInput(format!(
            "Batch too large ({len} requests, max {max})"
        )));
    }
    Ok(())
}

/// Reduce an uploaded file name to a safe `(voice name, extension)` pair.
///
/// Directory components are dropped, the extension must be a supported audio
/// container and characters outside `[A-Za-z0-9_-]` in the name become `_`.
pub fn sanitize_upload_name(filename: &str) -> Result<(String, String), ApiError> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let path = Path::new(base);

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
        .ok_or_else(|| {
            ApiError::InvalidInput(format!(
                "Invalid file type. Allowed: {}",
                AUDIO_EXTENSIONS
                    .iter()
                    .map(|e| format!(".{e}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

    let stem: String = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if stem.trim_matches('_').is_empty() {
        return Err(ApiError::InvalidInput("File name must contain a voice name".to_string()));
    }
    if stem.chars().count() > MAX_VOICE_NAME_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Voice name too long (max {MAX_VOICE_NAME_LENGTH} characters)"
        )));
    }
    Ok((stem, ext))
}
