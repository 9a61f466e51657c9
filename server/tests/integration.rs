//! Integration tests for the HTTP surface

mod common;

use std::time::Duration;

use axum::http::{Request, StatusCode};
use base64::Engine;
use serde_json::json;
use tower::ServiceExt;
use tts_core::mock::MockConfig;

use common::*;

#[tokio::test]
async fn test_health_check() {
    let test = create_test_app();
    for uri in ["/api/health", "/health"] {
        let response = test.app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let health = body_json(response).await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["model_loaded"], true);
        assert_eq!(health["sample_rate"], 24_000);
    }
}

#[tokio::test]
async fn test_root_reports_service_info() {
    let test = create_test_app_with(MockConfig::default(), |c| c.api_key = Some("secret".into()));
    let response = test.app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let info = body_json(response).await;
    assert_eq!(info["message"], "Real-Time TTS Server");
    assert_eq!(info["status"], "running");
}

#[tokio::test]
async fn test_list_voices() {
    let test = create_test_app();
    std::fs::write(test.uploads.path().join("bob.wav"), b"RIFF").unwrap();

    let response = test.app.oneshot(get("/api/voices")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let voices = body["voices"].as_array().unwrap();
    assert_eq!(voices[0]["name"], "alba");
    assert_eq!(voices[0]["type"], "premade");
    assert_eq!(voices[0]["cached"], false);

    let bob = voices.iter().find(|v| v["name"] == "bob").unwrap();
    assert_eq!(bob["type"], "custom");
    assert!(bob["path"].as_str().unwrap().ends_with("bob.wav"));
}

#[tokio::test]
async fn test_generate_returns_wav_with_timings() {
    let test = create_test_app();
    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "Hello world", "voice": "alba"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "audio/wav");
    for name in ["x-generation-time", "x-audio-duration", "x-rtf"] {
        let value: f64 = headers[name].to_str().unwrap().parse().unwrap();
        assert!(value >= 0.0, "{name}");
    }
    assert_eq!(headers["x-audio-duration"], "0.02");

    let wav = body_bytes(response).await;
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(wav.len(), 44 + 480 * 2);
}

#[tokio::test]
async fn test_generate_uses_default_voice() {
    let test = create_test_app_with(MockConfig::default(), |c| c.default_voice = Some("marius".into()));
    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "Hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(test.engine.list_voices().iter().any(|v| v.name == "marius" && v.cached));
}

#[tokio::test]
async fn test_generate_validation_empty_text() {
    let test = create_test_app();
    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "   ", "voice": "alba"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["error"], "Text cannot be empty");
    assert_eq!(error["code"], 400);
}

#[tokio::test]
async fn test_generate_validation_long_text() {
    let test = create_test_app_with(MockConfig::default(), |c| c.max_text_length = 100);
    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "a".repeat(101)})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(test.engine.backend().build_calls(), 0);
}

#[tokio::test]
async fn test_generate_unknown_voice() {
    let test = create_test_app();
    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "Hello", "voice": "nobody"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error = body_json(response).await;
    assert_eq!(error["error"], "Voice not found or unreadable: nobody");
    assert!(error["detail"].is_string());
}

#[tokio::test]
async fn test_generate_failure_is_server_error() {
    let mock = MockConfig {
        fail_complete: true,
        ..MockConfig::default()
    };
    let test = create_test_app_with(mock, |_| {});
    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "Hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_speech_formats() {
    let test = create_test_app();

    let response = test
        .app
        .clone()
        .oneshot(post_json("/v1/audio/speech", json!({"model": "tts-1", "input": "one two", "voice": "alba"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/wav");
    assert_eq!(&body_bytes(response).await[0..4], b"RIFF");

    let response = test
        .app
        .clone()
        .oneshot(post_json(
            "/v1/audio/speech",
            json!({"input": "one two", "voice": "alba", "response_format": "pcm", "speed": 1.5}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-sample-rate"], "24000");
    assert_eq!(body_bytes(response).await.len(), 480 * 4);

    let response = test
        .app
        .oneshot(post_json(
            "/v1/audio/speech",
            json!({"input": "one two", "response_format": "mp3"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_speech_streams_pcm() {
    let test = create_test_app_with(MockConfig::default(), |c| c.chunk_budget = 1);
    let response = test
        .app
        .oneshot(post_json(
            "/v1/audio/speech",
            json!({"input": "one two three", "voice": "alba", "stream": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/pcm");
    let pcm = body_bytes(response).await;
    assert_eq!(pcm.len(), 3 * 240 * 4);
}

#[tokio::test]
async fn test_batch_reports_each_result() {
    let test = create_test_app();
    let response = test
        .app
        .oneshot(post_json(
            "/v1/audio/batch",
            json!({"requests": [
                {"text": "first one", "voice": "alba"},
                {"text": "second", "voice": "nobody"}
            ]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0]["status"], "success");
    let wav = base64::engine::general_purpose::STANDARD
        .decode(results[0]["audio_base64"].as_str().unwrap())
        .unwrap();
    assert_eq!(&wav[0..4], b"RIFF");

    assert_eq!(results[1]["status"], "error");
    assert_eq!(results[1]["text"], "second");
    assert!(results[1]["error"].as_str().unwrap().contains("nobody"));
    assert!(results[1].get("audio_base64").is_none());
}

#[tokio::test]
async fn test_batch_size_limit() {
    let test = create_test_app_with(MockConfig::default(), |c| c.max_batch = 2);
    let requests: Vec<_> = (0..3).map(|i| json!({"text": format!("text {i}")})).collect();
    let response = test
        .app
        .oneshot(post_json("/v1/audio/batch", json!({ "requests": requests })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_voice_exports_embedding() {
    let test = create_test_app();
    let response = test
        .app
        .clone()
        .oneshot(post_upload("/api/upload-voice", "my voice.WAV", b"RIFF0000WAVE"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["voice_name"], "my_voice");
    assert_eq!(body["filename"], "my_voice.wav");
    assert!(test.uploads.path().join("my_voice.wav").is_file());
    assert!(test.uploads.path().join("my_voice.safetensors").is_file());
    assert_eq!(test.engine.backend().export_calls(), 1);

    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "cloned", "voice": "my_voice"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reupload_replaces_cached_voice() {
    let test = create_test_app();
    let upload = |contents: &'static [u8]| post_upload("/api/upload-voice", "dana.wav", contents);

    let response = test.app.clone().oneshot(upload(b"RIFF first")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = test
        .app
        .clone()
        .oneshot(post_json("/api/generate", json!({"text": "first take", "voice": "dana"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test.engine.cache_stats().entries, 1);

    let response = test.app.clone().oneshot(upload(b"RIFF second")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test.engine.cache_stats().entries, 0);

    let builds = test.engine.backend().build_calls();
    let response = test
        .app
        .oneshot(post_json("/api/generate", json!({"text": "second take", "voice": "dana"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test.engine.backend().build_calls(), builds + 1);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let test = create_test_app();
    let response = test
        .app
        .oneshot(post_upload("/api/upload-voice", "notes.txt", b"hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!test.uploads.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_clear_cache() {
    let test = create_test_app();
    let response = test
        .app
        .clone()
        .oneshot(post_json("/api/generate", json!({"text": "warm up", "voice": "alba"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method("POST")
        .uri("/api/cache/clear")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = test.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["cleared"], 1);
    assert_eq!(test.engine.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let test = create_test_app();
    test.app
        .clone()
        .oneshot(post_json("/api/generate", json!({"text": "count me", "voice": "alba"})))
        .await
        .unwrap();

    let response = test.app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let metrics = body_json(response).await;
    assert_eq!(metrics["tts"]["synthesis_count"], 1);
    assert_eq!(metrics["tts"]["total_samples"], 480);
    assert_eq!(metrics["endpoints"]["generate"]["request_count"], 1);
    assert_eq!(metrics["voice_cache"]["entries"], 1);
    assert_eq!(metrics["inference_capacity"], 2);
    assert!(metrics["system"]["memory_total_mb"].is_number());
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let test = create_test_app_with(MockConfig::default(), |c| c.api_key = Some("secret".into()));

    let response = test.app.clone().oneshot(get("/api/voices")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], 401);

    let request = Request::builder()
        .uri("/api/voices")
        .header("x-api-key", "secret")
        .body(axum::body::Body::empty())
        .unwrap();
    assert_eq!(test.app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/api/voices")
        .header("authorization", "Bearer secret")
        .body(axum::body::Body::empty())
        .unwrap();
    assert_eq!(test.app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);

    let request = Request::builder()
        .uri("/api/voices")
        .header("x-api-key", "wrong")
        .body(axum::body::Body::empty())
        .unwrap();
    assert_eq!(test.app.clone().oneshot(request).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let response = test.app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_capacity_timeout_is_service_unavailable() {
    let mock = MockConfig {
        generate_delay: Duration::from_millis(200),
        ..MockConfig::default()
    };
    let test = create_test_app_with(mock, |c| {
        c.max_concurrent = 1;
        c.admission_timeout_secs = Some(0);
    });

    let busy = {
        let app = test.app.clone();
        tokio::spawn(async move {
            app.oneshot(post_json("/api/generate", json!({"text": "slow", "voice": "alba"})))
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = test
        .app
        .clone()
        .oneshot(post_json("/api/generate", json!({"text": "blocked", "voice": "alba"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(busy.await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_shutdown_rejects_requests() {
    let test = create_test_app();
    test.engine.shutdown();

    let response = test
        .app
        .clone()
        .oneshot(post_json("/api/generate", json!({"text": "too late", "voice": "alba"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let health = body_json(test.app.oneshot(get("/api/health")).await.unwrap()).await;
    assert_eq!(health["model_loaded"], false);
}
