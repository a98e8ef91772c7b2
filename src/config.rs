//! Configuration loading from environment variables.
//!
//! Values are intentionally validated early so startup fails fast with
//! actionable errors.

use crate::error::AppError;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_MAX_UPLOAD_MB: usize = 25;
pub const MAX_MAX_UPLOAD_MB: usize = 512;

/// Compute device requested for acoustic model inference.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceKind {
    /// CUDA, then Metal, then CPU, whichever is available first.
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Metal => "metal",
        }
    }

    fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(AppError::config(format!(
                "invalid ASR_DEVICE={other:?}; expected auto, cpu, cuda, or metal"
            ))),
        }
    }
}

/// Transliteration engine used for the IPA step.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IpaEngineKind {
    /// English orthography rules over the decoded words.
    English,
    /// ARPAbet symbol table, for models whose vocabulary emits phonemes.
    Arpabet,
}

impl IpaEngineKind {
    fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "english" | "eng-latn" => Ok(Self::English),
            "arpabet" => Ok(Self::Arpabet),
            other => Err(AppError::config(format!(
                "invalid IPA_ENGINE={other:?}; expected english or arpabet"
            ))),
        }
    }
}

/// Runtime configuration for the HTTP server and the acoustic model.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host interface to bind, for example `127.0.0.1`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Directory holding `config.json`, `vocab.json`, and the weights file.
    pub model_dir: PathBuf,
    /// Whether `model_dir` came from explicit `ASR_MODEL_DIR`.
    pub model_dir_explicit: bool,
    /// Enables startup download when model files are missing.
    pub auto_download: bool,
    /// Hugging Face repository used for model download.
    pub hf_repo: String,
    /// Git revision of `hf_repo` to download.
    pub hf_revision: String,
    /// Weights filename inside the model directory.
    pub weights_file: String,
    /// Optional Hugging Face token for authenticated model downloads.
    pub hf_token: Option<String>,
    /// Requested inference device.
    pub device: DeviceKind,
    /// Upper bound for a multipart upload, in bytes.
    pub max_upload_bytes: usize,
    /// Engine used for the transcription-to-IPA step.
    pub ipa_engine: IpaEngineKind,
}

impl AppConfig {
    /// Builds configuration from environment variables.
    ///
    /// Variables:
    /// - `HOST` (default `127.0.0.1`)
    /// - `PORT` (default `8000`)
    /// - `ASR_MODEL_DIR` (optional explicit local model directory)
    /// - `ASR_AUTO_DOWNLOAD` (default `true`)
    /// - `ASR_HF_REPO` (default `facebook/wav2vec2-base-960h`)
    /// - `ASR_HF_REVISION` (default `main`)
    /// - `ASR_WEIGHTS_FILE` (default `model.safetensors`)
    /// - `ASR_CACHE_DIR` (default `$HOME/.cache/voxpreference/models`)
    /// - `HF_TOKEN` (optional Hugging Face token)
    /// - `ASR_DEVICE` (default `auto`)
    /// - `MAX_UPLOAD_MB` (default `25`, min `1`, max `512`)
    /// - `IPA_ENGINE` (default `english`)
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_str("HOST", "127.0.0.1");
        let port = env_u16("PORT", 8000)?;
        let auto_download = env_bool("ASR_AUTO_DOWNLOAD", true)?;
        let hf_repo = env_str("ASR_HF_REPO", "facebook/wav2vec2-base-960h");
        let hf_revision = env_str("ASR_HF_REVISION", "main");
        let weights_file = env_str("ASR_WEIGHTS_FILE", "model.safetensors");
        let cache_dir = env_str("ASR_CACHE_DIR", &default_cache_dir());

        let explicit_dir = env_opt("ASR_MODEL_DIR");
        let model_dir_explicit = explicit_dir.is_some();
        let model_dir = explicit_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&cache_dir).join(repo_cache_name(&hf_repo)));

        let device = DeviceKind::parse(&env_str("ASR_DEVICE", "auto"))?;

        let max_upload_mb = env_usize_bounded(
            "MAX_UPLOAD_MB",
            DEFAULT_MAX_UPLOAD_MB,
            1,
            MAX_MAX_UPLOAD_MB,
        )?;
        let ipa_engine = IpaEngineKind::parse(&env_str("IPA_ENGINE", "english"))?;

        Ok(Self {
            host,
            port,
            model_dir,
            model_dir_explicit,
            auto_download,
            hf_repo,
            hf_revision,
            weights_file,
            hf_token: env_opt("HF_TOKEN"),
            device,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            ipa_engine,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.model_dir.join("config.json")
    }

    pub fn vocab_path(&self) -> PathBuf {
        self.model_dir.join("vocab.json")
    }

    pub fn preprocessor_path(&self) -> PathBuf {
        self.model_dir.join("preprocessor_config.json")
    }

    pub fn weights_path(&self) -> PathBuf {
        self.model_dir.join(&self.weights_file)
    }
}

/// Directory name used for a repository inside the cache, `org/name` -> `org--name`.
pub fn repo_cache_name(repo: &str) -> String {
    repo.trim_matches('/').replace('/', "--")
}

fn default_cache_dir() -> String {
    format!(
        "{}/.cache/voxpreference/models",
        std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string())
    )
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<u16>().map_err(|_| {
        AppError::config(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::config(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn env_bool(name: &str, default: bool) -> Result<bool, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_bool(name, &raw)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::config(format!(
            "invalid {name}={raw:?}; expected true/false"
        ))),
    }
}

fn env_usize_bounded(
    name: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_usize_bounded(name, &raw, min, max)
}

fn parse_usize_bounded(name: &str, raw: &str, min: usize, max: usize) -> Result<usize, AppError> {
    let trimmed = raw.trim();
    let parsed = trimmed.parse::<usize>().map_err(|_| {
        AppError::config(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(AppError::config(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}
