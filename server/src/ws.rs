//! WebSocket streaming endpoint.
//!
//! One socket serves any number of requests in sequence. The client sends
//! `{"text", "voice", "max_tokens"}`; the server answers with one `audio`
//! message per chunk and a closing `done` (with metrics) or `error` message.

use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tts_core::{InferenceBackend, StreamEvent, SynthesisMetrics};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Audio { data: &'a [f32], sample_rate: u32 },
    Done { metrics: &'a SynthesisMetrics },
    Error { message: String },
}

/// The client is gone; stop serving the socket.
struct Disconnected;

async fn send(socket: &mut WebSocket, message: &ServerMessage<'_>) -> Result<(), Disconnected> {
    let text = serde_json::to_string(message).map_err(|_| Disconnected)?;
    socket.send(Message::Text(text.into())).await.map_err(|_| Disconnected)
}

pub async fn stream_ws<B: InferenceBackend>(ws: WebSocketUpgrade, State(state): State<AppState<B>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<B: InferenceBackend>(mut socket: WebSocket, state: AppState<B>) {
    info!("websocket client connected");
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "websocket receive failed");
                break;
            }
        };

        let request: StreamRequest = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                let message = format!("Invalid request: {e}");
                if send(&mut socket, &ServerMessage::Error { message }).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if serve_request(&mut socket, &state, request).await.is_err() {
            break;
        }
    }
    info!("websocket client disconnected");
}

async fn serve_request<B: InferenceBackend>(
    socket: &mut WebSocket,
    state: &AppState<B>,
    request: StreamRequest,
) -> Result<(), Disconnected> {
    let started = Instant::now();
    let voice = state.voice_or_default(request.voice.as_deref());

    let mut stream = match state
        .engine
        .synthesize_stream(&request.text, &voice, request.max_tokens)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            state.metrics.tts.record_failure();
            state.metrics.stream.record(started, false);
            return send(socket, &ServerMessage::Error { message: e.to_string() }).await;
        }
    };
    let sample_rate = stream.sample_rate();

    // Dropping the stream on an early return cancels generation.
    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Chunk(chunk)) => {
                send(
                    socket,
                    &ServerMessage::Audio {
                        data: &chunk.samples,
                        sample_rate,
                    },
                )
                .await?;
            }
            Ok(StreamEvent::Done(metrics)) => {
                state.metrics.tts.record_synthesis(&metrics);
                state.metrics.stream.record(started, true);
                send(socket, &ServerMessage::Done { metrics: &metrics }).await?;
            }
            Err(e) => {
                state.metrics.tts.record_failure();
                state.metrics.stream.record(started, false);
                send(socket, &ServerMessage::Error { message: e.to_string() }).await?;
            }
        }
    }
    Ok(())
}
