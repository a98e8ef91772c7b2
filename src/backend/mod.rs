//! Acoustic model abstraction.
//!
//! The pipeline and the HTTP layer depend on the [`Transcriber`] trait instead
//! of a concrete model, which keeps request handling decoupled from inference
//! code and lets tests substitute a fixed transcript.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::AppError;

pub mod ctc;
pub mod wav2vec2;

/// Input payload consumed by an acoustic model.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    /// Audio samples as 16 kHz mono PCM in `f32` range `[-1.0, 1.0]`.
    pub audio_16khz_mono_f32: Vec<f32>,
}

/// Decoded output of one forward pass.
#[derive(Debug, Clone)]
pub struct TranscriptResult {
    /// Greedy CTC transcription with normalized whitespace.
    pub text: String,
    /// Number of output frames the model produced.
    pub frames: usize,
}

/// Contract implemented by acoustic models.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Runs exactly one forward pass and decodes it.
    async fn transcribe(&self, req: TranscribeRequest) -> Result<TranscriptResult, AppError>;
}

/// Loads the wav2vec2 CTC model described by `cfg`.
pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn Transcriber>, AppError> {
    Ok(Arc::new(wav2vec2::Wav2Vec2Backend::load(cfg)?))
}
