use std::io;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tts_core::validation::validate_chunk_budget;
use tts_core::wav::{encode_wav, encode_wav_base64, pcm_f32_le};
use tts_core::{CompleteSynthesis, InferenceBackend, StreamEvent, VoiceInfo};

use crate::error::ApiError;
use crate::metrics::{DetailedMetricsResponse, EndpointMetricsResponse, SystemMetrics};
use crate::validation::{sanitize_upload_name, validate_batch_size, validate_response_format, AudioFormat};
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    /// Streaming chunk budget; accepted for compatibility on complete requests.
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub input: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "default_response_format")]
    pub response_format: String,
    /// Accepted and ignored.
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

fn default_response_format() -> String {
    "wav".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<GenerateRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub text: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<VoiceInfo>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub voice_name: String,
    pub path: String,
    pub embedding_path: String,
}

#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    pub success: bool,
    pub cleared: usize,
}

fn encoding_error(e: hound::Error) -> ApiError {
    ApiError::InternalError(format!("WAV encoding error: {e}"))
}

fn wav_response(out: &CompleteSynthesis, filename: &str, with_timings: bool) -> Result<Response, ApiError> {
    let wav = encode_wav(&out.samples, out.sample_rate).map_err(encoding_error)?;
    let mut response = (
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        wav,
    )
        .into_response();

    if with_timings {
        let metrics = &out.metrics;
        let headers = response.headers_mut();
        for (name, value) in [
            ("x-generation-time", metrics.total_time),
            ("x-audio-duration", metrics.audio_duration),
            ("x-rtf", metrics.real_time_factor),
        ] {
            if let Ok(value) = value.to_string().parse() {
                headers.insert(name, value);
            }
        }
    }
    Ok(response)
}

pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Real-Time TTS Server",
        status: "running",
    })
}

pub async fn health<B: InferenceBackend>(State(state): State<AppState<B>>) -> Json<HealthResponse> {
    let health = state.engine.health();
    Json(HealthResponse {
        status: if health.model_loaded { "healthy" } else { "unavailable" },
        model_loaded: health.model_loaded,
        sample_rate: health.sample_rate,
    })
}

pub async fn list_voices<B: InferenceBackend>(State(state): State<AppState<B>>) -> Json<VoicesResponse> {
    Json(VoicesResponse {
        voices: state.engine.list_voices(),
    })
}

async fn synthesize_complete<B: InferenceBackend>(
    state: &AppState<B>,
    text: &str,
    voice: &str,
) -> Result<CompleteSynthesis, ApiError> {
    match state.engine.synthesize_complete(text, voice).await {
        Ok(out) => {
            state.metrics.tts.record_synthesis(&out.metrics);
            Ok(out)
        }
        Err(e) => {
            state.metrics.tts.record_failure();
            Err(e.into())
        }
    }
}

/// Complete synthesis returned as a WAV file with timing headers.
pub async fn generate<B: InferenceBackend>(
    State(state): State<AppState<B>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = async {
        if let Some(budget) = req.max_tokens {
            validate_chunk_budget(budget).map_err(tts_core::TtsError::from)?;
        }
        let voice = state.voice_or_default(req.voice.as_deref());
        let out = synthesize_complete(&state, &req.text, &voice).await?;
        wav_response(&out, "tts_output.wav", true)
    }
    .await;
    state.metrics.generate.record(started, result.is_ok());
    result
}

/// OpenAI-compatible speech endpoint.
pub async fn speech<B: InferenceBackend>(
    State(state): State<AppState<B>>,
    Json(req): Json<SpeechRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    debug!(model = ?req.model, speed = ?req.speed, stream = req.stream, "speech request");

    let result = async {
        let format = validate_response_format(&req.response_format)?;
        let voice = state.voice_or_default(req.voice.as_deref());

        if req.stream {
            return stream_pcm(&state, &req.input, &voice).await;
        }

        let out = synthesize_complete(&state, &req.input, &voice).await?;
        match format {
            AudioFormat::Wav => wav_response(&out, "speech.wav", false),
            AudioFormat::Pcm => Ok((
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::HeaderName::from_static("x-sample-rate"), out.sample_rate.to_string()),
                ],
                pcm_f32_le(&out.samples),
            )
                .into_response()),
        }
    }
    .await;
    state.metrics.speech.record(started, result.is_ok());
    result
}

/// Stream raw `f32` PCM chunks as they are produced. A synthesis failure after
/// the first byte aborts the body.
async fn stream_pcm<B: InferenceBackend>(state: &AppState<B>, text: &str, voice: &str) -> Result<Response, ApiError> {
    let stream = match state.engine.synthesize_stream(text, voice, None).await {
        Ok(stream) => stream,
        Err(e) => {
            state.metrics.tts.record_failure();
            return Err(e.into());
        }
    };
    let sample_rate = stream.sample_rate();
    let metrics = state.metrics.clone();

    let body = stream.filter_map(move |event| {
        let metrics = metrics.clone();
        async move {
            match event {
                Ok(StreamEvent::Chunk(chunk)) => Some(Ok(Bytes::from(pcm_f32_le(&chunk.samples)))),
                Ok(StreamEvent::Done(done)) => {
                    metrics.tts.record_synthesis(&done);
                    None
                }
                Err(e) => {
                    metrics.tts.record_failure();
                    Some(Err(io::Error::other(e.to_string())))
                }
            }
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "audio/pcm".to_string()),
            (header::HeaderName::from_static("x-sample-rate"), sample_rate.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Sequential complete synthesis for several texts.
pub async fn batch<B: InferenceBackend>(
    State(state): State<AppState<B>>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let started = Instant::now();
    if let Err(e) = validate_batch_size(req.requests.len(), state.config.max_batch) {
        state.metrics.batch.record(started, false);
        return Err(e);
    }

    let mut results = Vec::with_capacity(req.requests.len());
    for item in req.requests {
        let voice = state.voice_or_default(item.voice.as_deref());
        let encoded = match synthesize_complete(&state, &item.text, &voice).await {
            Ok(out) => encode_wav_base64(&out.samples, out.sample_rate).map_err(encoding_error),
            Err(e) => Err(e),
        };
        results.push(match encoded {
            Ok(audio) => BatchItem {
                text: item.text,
                status: "success",
                audio_base64: Some(audio),
                error: None,
            },
            Err(e) => BatchItem {
                text: item.text,
                status: "error",
                audio_base64: None,
                error: Some(e.to_string()),
            },
        });
    }

    state.metrics.batch.record(started, true);
    Ok(Json(BatchResponse { results }))
}

/// Store an uploaded voice sample and export its embedding.
pub async fn upload_voice<B: InferenceBackend>(
    State(state): State<AppState<B>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let started = Instant::now();
    let result = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::InvalidInput(format!("Invalid multipart body: {e}")))?
        {
            if field.name() != Some("file") {
                continue;
            }
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| ApiError::InvalidInput("Upload is missing a file name".to_string()))?;
            let (voice_name, ext) = sanitize_upload_name(&filename)?;
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::InvalidInput(format!("Failed to read upload: {e}")))?;

            let resolver = state.engine.resolver();
            let path = resolver.upload_path(&voice_name, &ext);
            tokio::fs::create_dir_all(resolver.uploads_dir())
                .await
                .map_err(|e| ApiError::InternalError(format!("Cannot create uploads directory: {e}")))?;
            tokio::fs::write(&path, &data)
                .await
                .map_err(|e| ApiError::InternalError(format!("Cannot store upload: {e}")))?;
            info!(voice = %voice_name, bytes = data.len(), path = %path.display(), "stored voice upload");

            let embedding = state.engine.export_voice(&path).await?;
            return Ok(Json(UploadResponse {
                success: true,
                filename: format!("{voice_name}.{ext}"),
                voice_name,
                path: path.display().to_string(),
                embedding_path: embedding.display().to_string(),
            }));
        }
        Err(ApiError::InvalidInput("Missing 'file' field".to_string()))
    }
    .await;
    state.metrics.upload.record(started, result.is_ok());
    result
}

pub async fn clear_cache<B: InferenceBackend>(State(state): State<AppState<B>>) -> Json<ClearCacheResponse> {
    let cleared = state.engine.cache_stats().entries;
    state.engine.clear_cache();
    Json(ClearCacheResponse { success: true, cleared })
}

pub async fn metrics<B: InferenceBackend>(State(state): State<AppState<B>>) -> Json<DetailedMetricsResponse> {
    Json(DetailedMetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics::collect(state.started),
        endpoints: EndpointMetricsResponse::from(state.metrics.as_ref()),
        tts: state.metrics.tts.stats(),
        voice_cache: state.engine.cache_stats(),
        inference_in_flight: state.engine.admission().in_flight(),
        inference_capacity: state.engine.admission().capacity(),
    })
}
