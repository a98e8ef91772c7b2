//! Waveform to model input conversion.

use std::path::Path;

use serde::Deserialize;

use crate::audio::TARGET_SAMPLE_RATE;
use crate::error::AppError;

const NORMALIZE_EPS: f64 = 1e-7;

/// Subset of `preprocessor_config.json` used at inference time.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureExtractorConfig {
    #[serde(default = "default_do_normalize")]
    pub do_normalize: bool,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
}

fn default_do_normalize() -> bool {
    true
}

fn default_sampling_rate() -> u32 {
    TARGET_SAMPLE_RATE
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        Self {
            do_normalize: default_do_normalize(),
            sampling_rate: default_sampling_rate(),
        }
    }
}

impl FeatureExtractorConfig {
    /// Loads the preprocessor config, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, AppError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|err| AppError::internal(format!("failed to read {path:?}: {err}")))?;
        let cfg: Self = serde_json::from_str(&data)
            .map_err(|err| AppError::internal(format!("failed to parse {path:?}: {err}")))?;
        if cfg.sampling_rate != TARGET_SAMPLE_RATE {
            return Err(AppError::config(format!(
                "model expects {} Hz audio; only {TARGET_SAMPLE_RATE} Hz is supported",
                cfg.sampling_rate
            )));
        }
        Ok(cfg)
    }

    /// Produces model input values from a 16 kHz waveform.
    pub fn extract(&self, samples: &[f32]) -> Vec<f32> {
        if self.do_normalize {
            zero_mean_unit_var(samples)
        } else {
            samples.to_vec()
        }
    }
}

/// Normalizes to zero mean and unit variance, as wav2vec2 checkpoints expect.
pub fn zero_mean_unit_var(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = (var + NORMALIZE_EPS).sqrt();
    samples
        .iter()
        .map(|&x| ((x as f64 - mean) / std) as f32)
        .collect()
}
