//! Audio bytes to transcription and IPA.

use std::sync::Arc;

use tracing::{info, warn};

use crate::audio::decode_to_mono_16khz_f32;
use crate::backend::{TranscribeRequest, Transcriber};
use crate::config::IpaEngineKind;
use crate::error::AppError;
use crate::phonetics::{
    convert_to_ipa, text_to_phonemes, Arpabet, EnglishOrthography, IpaOutcome, Transliterator,
};

/// Output of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub transcription: String,
    pub ipa: IpaOutcome,
}

/// Long-lived service object: one acoustic model plus one transliterator.
///
/// Built once at startup and shared read-only across requests.
#[derive(Clone)]
pub struct AsrPipeline {
    model: Arc<dyn Transcriber>,
    transliterator: Arc<dyn Transliterator>,
}

impl AsrPipeline {
    pub fn new(model: Arc<dyn Transcriber>, transliterator: Arc<dyn Transliterator>) -> Self {
        Self {
            model,
            transliterator,
        }
    }

    pub fn transliterator(&self) -> &dyn Transliterator {
        self.transliterator.as_ref()
    }

    /// Decodes uploaded bytes and runs them through [`AsrPipeline::run_samples`].
    pub async fn run_bytes(
        &self,
        bytes: Vec<u8>,
        extension_hint: Option<String>,
    ) -> Result<PipelineOutput, AppError> {
        let samples = tokio::task::spawn_blocking(move || {
            decode_to_mono_16khz_f32(&bytes, extension_hint.as_deref())
        })
        .await
        .map_err(|err| AppError::internal(format!("audio decode task failed: {err}")))??;

        self.run_samples(samples).await
    }

    /// One forward pass over 16 kHz mono samples, then the IPA step.
    pub async fn run_samples(&self, samples: Vec<f32>) -> Result<PipelineOutput, AppError> {
        let sample_count = samples.len();
        let result = self
            .model
            .transcribe(TranscribeRequest {
                audio_16khz_mono_f32: samples,
            })
            .await?;

        let ipa = convert_to_ipa(self.transliterator.as_ref(), &result.text);
        if let IpaOutcome::Failed(err) = &ipa {
            warn!(error = %err, "ipa conversion failed");
        }

        info!(
            samples = sample_count,
            frames = result.frames,
            chars = result.text.len(),
            "transcription complete"
        );

        Ok(PipelineOutput {
            transcription: result.text,
            ipa,
        })
    }

    /// Character-level phonemes of a transcription.
    pub fn char_phonemes(&self, transcription: &str) -> Vec<String> {
        text_to_phonemes(self.transliterator(), &transcription.to_lowercase())
    }
}

/// Builds the configured transliteration engine.
pub fn build_transliterator(kind: IpaEngineKind) -> Arc<dyn Transliterator> {
    match kind {
        IpaEngineKind::English => Arc::new(EnglishOrthography),
        IpaEngineKind::Arpabet => Arc::new(Arpabet),
    }
}
