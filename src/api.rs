//! HTTP API surface: welcome, health, and transcription.
//!
//! This module owns multipart parsing and response shaping while delegating
//! decoding, inference, and IPA conversion to [`AsrPipeline`].

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::audio::extension_hint;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::pipeline::AsrPipeline;

/// Message returned by `GET /`.
pub const WELCOME_MESSAGE: &str =
    "Welcome! This API is for transcription. Try /health or /transcribe.";

/// Multipart field names accepted for the audio upload.
const FILE_FIELDS: &[&str] = &["audioFile", "file"];

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Runtime configuration loaded at startup.
    pub cfg: AppConfig,
    /// Model and transliterator, read-only after startup.
    pub pipeline: AsrPipeline,
}

impl AppState {
    pub fn new(cfg: AppConfig, pipeline: AsrPipeline) -> Self {
        Self { cfg, pipeline }
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.cfg.max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/transcribe", post(transcribe))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Welcome endpoint (`GET /`).
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": WELCOME_MESSAGE }))
}

/// Liveness probe (`GET /health`).
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Successful transcription body. `ipa` and `ipa_error` are never both set.
#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub success: bool,
    pub transcription: String,
    pub ipa: Option<String>,
    pub ipa_error: Option<String>,
}

/// Handles an audio upload (`POST /transcribe`).
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<TranscribeResponse>, AppError> {
    let upload = parse_upload(&mut multipart).await?;
    let hint = upload.filename.as_deref().and_then(extension_hint);

    let output = state
        .pipeline
        .run_bytes(upload.bytes, hint)
        .await
        .inspect_err(|err| warn!(error = %err, "transcription request failed"))?;

    Ok(Json(TranscribeResponse {
        success: true,
        ipa: output.ipa.ipa().map(ToOwned::to_owned),
        ipa_error: output.ipa.error().map(ToOwned::to_owned),
        transcription: output.transcription,
    }))
}

struct Upload {
    filename: Option<String>,
    bytes: Vec<u8>,
}

/// Reads the audio file field, ignoring any other fields.
async fn parse_upload(multipart: &mut Multipart) -> Result<Upload, AppError> {
    let mut upload: Option<Upload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_multipart(format!("invalid multipart body: {err}")))?
    {
        let is_file = field
            .name()
            .is_some_and(|name| FILE_FIELDS.contains(&name));
        if !is_file || upload.is_some() {
            continue;
        }

        let filename = field.file_name().map(ToOwned::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_multipart(format!("failed to read file bytes: {err}")))?;
        upload = Some(Upload {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    let upload = upload.ok_or_else(|| {
        AppError::invalid_request("missing required multipart field: audioFile")
    })?;
    if upload.bytes.is_empty() {
        return Err(AppError::audio_decode("uploaded file is empty"));
    }
    Ok(upload)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::audio::pcm16_wav;
    use crate::config::{AppConfig, DeviceKind, IpaEngineKind};
    use crate::pipeline::tests::pipeline;

    use super::{build_router, AppState};

    const BOUNDARY: &str = "X-BOUNDARY";

    fn test_cfg() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            model_dir: "/tmp/unused".into(),
            model_dir_explicit: true,
            auto_download: false,
            hf_repo: "facebook/wav2vec2-base-960h".to_string(),
            hf_revision: "main".to_string(),
            weights_file: "model.safetensors".to_string(),
            hf_token: None,
            device: DeviceKind::Cpu,
            max_upload_bytes: 4 * 1024 * 1024,
            ipa_engine: IpaEngineKind::English,
        }
    }

    fn app(transcript: &'static str) -> axum::Router {
        app_with_cfg(test_cfg(), transcript)
    }

    fn app_with_cfg(cfg: AppConfig, transcript: &'static str) -> axum::Router {
        build_router(Arc::new(AppState::new(cfg, pipeline(transcript))))
    }

    fn upload_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .uri("/transcribe")
            .method("POST")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn parse_json_response(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), 1024 * 1024)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let res = app("").oneshot(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(parse_json_response(res).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn root_returns_welcome_message() {
        let req = Request::builder()
            .uri("/")
            .body(Body::empty())
            .expect("request");
        let res = app("").oneshot(req).await.expect("response");
        let payload = parse_json_response(res).await;
        assert_eq!(payload["message"], super::WELCOME_MESSAGE);
    }

    #[tokio::test]
    async fn transcribe_returns_text_and_ipa() {
        let wav = pcm16_wav(16_000, 1, &[500i16; 4_000]);
        let res = app("THE SHIP")
            .oneshot(upload_request(upload_body("audioFile", "clip.wav", &wav)))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], true);
        assert_eq!(payload["transcription"], "THE SHIP");
        assert_eq!(payload["ipa"], "θɛ ʃɪp");
        assert!(payload["ipa_error"].is_null());
    }

    #[tokio::test]
    async fn transcribe_reports_ipa_error_when_nothing_converts() {
        let wav = pcm16_wav(16_000, 1, &[500i16; 4_000]);
        let res = app("123 456")
            .oneshot(upload_request(upload_body("file", "clip.wav", &wav)))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], true);
        assert!(payload["ipa"].is_null());
        assert!(payload["ipa_error"].is_string());
    }

    #[tokio::test]
    async fn unparseable_audio_is_a_500_with_error_body() {
        let res = app("ANY")
            .oneshot(upload_request(upload_body(
                "audioFile",
                "clip.wav",
                b"not-a-real-media",
            )))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], false);
        assert!(payload["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn empty_upload_fails_like_undecodable_audio() {
        let res = app("ANY")
            .oneshot(upload_request(upload_body("audioFile", "clip.wav", b"")))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], false);
        assert_eq!(payload["error"], "uploaded file is empty");
    }

    #[tokio::test]
    async fn upload_over_the_size_limit_is_rejected() {
        let cfg = AppConfig {
            max_upload_bytes: 1024,
            ..test_cfg()
        };
        let wav = pcm16_wav(16_000, 1, &[500i16; 16_000]);
        let res = app_with_cfg(cfg, "ANY")
            .oneshot(upload_request(upload_body("audioFile", "clip.wav", &wav)))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], false);
        assert!(payload["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn missing_file_field_is_rejected() {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
        );
        let res = app("ANY")
            .oneshot(upload_request(body.into_bytes()))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], false);
    }
}
