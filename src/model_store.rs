//! Model file resolution and optional Hugging Face download support.
//!
//! This module guarantees that `cfg.model_dir` holds a readable `config.json`,
//! `vocab.json`, and weights file before the acoustic model is loaded.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::AppError;

const LOCK_TIMEOUT: Duration = Duration::from_secs(600);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

const OPTIONAL_FILES: &[&str] = &["preprocessor_config.json"];

fn required_files(cfg: &AppConfig) -> Vec<String> {
    vec![
        "config.json".to_string(),
        "vocab.json".to_string(),
        cfg.weights_file.clone(),
    ]
}

/// Ensures all model files exist locally, downloading missing ones if allowed.
pub fn ensure_model_ready(cfg: &AppConfig) -> Result<(), AppError> {
    let missing = required_files(cfg)
        .into_iter()
        .filter(|name| !model_file_exists(&cfg.model_dir.join(name)))
        .collect::<Vec<_>>();
    if missing.is_empty() {
        return Ok(());
    }

    if !cfg.auto_download {
        let hint = if cfg.model_dir_explicit {
            "point ASR_MODEL_DIR at a complete checkpoint or enable ASR_AUTO_DOWNLOAD"
        } else {
            "set ASR_MODEL_DIR to an existing checkpoint or enable ASR_AUTO_DOWNLOAD"
        };
        return Err(AppError::config(format!(
            "model files {} not found in {:?}; {hint}",
            missing.join(", "),
            cfg.model_dir
        )));
    }

    fs::create_dir_all(&cfg.model_dir).map_err(|err| {
        AppError::internal(format!(
            "failed to create model directory {:?}: {err}",
            cfg.model_dir
        ))
    })?;

    for name in &missing {
        fetch_file(cfg, name, true)?;
    }
    for name in OPTIONAL_FILES {
        if !model_file_exists(&cfg.model_dir.join(name)) {
            fetch_file(cfg, name, false)?;
        }
    }
    Ok(())
}

/// Downloads one file under a sibling lock. Returns `false` if an optional file is absent upstream.
fn fetch_file(cfg: &AppConfig, name: &str, required: bool) -> Result<bool, AppError> {
    let target_path = cfg.model_dir.join(name);
    let lock_path = lock_path_for(&target_path);
    let _guard = acquire_lock(&lock_path)?;

    if model_file_exists(&target_path) {
        return Ok(true);
    }

    info!(repo = %cfg.hf_repo, file = name, "downloading model file");
    match download_to_path(cfg, name, &target_path) {
        Ok(()) => Ok(true),
        Err(DownloadError::NotFound(_)) if !required => {
            warn!(repo = %cfg.hf_repo, file = name, "optional model file not published; using defaults");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn model_file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn lock_path_for(target_path: &Path) -> PathBuf {
    let lock_name = format!(
        "{}.lock",
        target_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("model")
    );
    target_path.with_file_name(lock_name)
}

fn acquire_lock(path: &Path) -> Result<LockGuard, AppError> {
    let start = Instant::now();
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "pid={}", std::process::id());
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if start.elapsed() >= LOCK_TIMEOUT {
                    return Err(AppError::internal(format!(
                        "timed out waiting for model download lock at {:?}",
                        path
                    )));
                }
                thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(err) => {
                return Err(AppError::internal(format!(
                    "failed to acquire model download lock at {:?}: {err}",
                    path
                )));
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error("model file not found at {0}; verify ASR_HF_REPO, ASR_HF_REVISION and ASR_WEIGHTS_FILE")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

impl From<DownloadError> for AppError {
    fn from(err: DownloadError) -> Self {
        AppError::internal(err.to_string())
    }
}

fn download_to_path(cfg: &AppConfig, name: &str, target_path: &Path) -> Result<(), DownloadError> {
    let url = hf_resolve_url(&cfg.hf_repo, &cfg.hf_revision, name);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(1800))
        .build()
        .map_err(|err| DownloadError::Other(format!("failed to create HTTP client: {err}")))?;

    let mut request = client.get(&url);
    if let Some(token) = cfg.hf_token.as_deref() {
        request = request.bearer_auth(token);
    }

    let mut response = request.send().map_err(|err| {
        DownloadError::Other(format!(
            "failed to download {url}: {err}; check network connectivity"
        ))
    })?;

    if !response.status().is_success() {
        return match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DownloadError::Other(format!(
                "Hugging Face rejected download of {url} with {}; set HF_TOKEN for authenticated access",
                response.status()
            ))),
            StatusCode::NOT_FOUND => Err(DownloadError::NotFound(url)),
            status => Err(DownloadError::Other(format!(
                "download of {url} failed with HTTP status {status}"
            ))),
        };
    }

    let tmp_path = part_path_for(target_path);
    let mut out = File::create(&tmp_path).map_err(|err| {
        DownloadError::Other(format!(
            "failed to create temporary file {:?}: {err}",
            tmp_path
        ))
    })?;
    std::io::copy(&mut response, &mut out).map_err(|err| {
        DownloadError::Other(format!("failed writing download to {:?}: {err}", tmp_path))
    })?;
    out.flush().map_err(|err| {
        DownloadError::Other(format!("failed to flush {:?}: {err}", tmp_path))
    })?;

    let size = out.metadata().map(|m| m.len()).unwrap_or_default();
    if size == 0 {
        let _ = fs::remove_file(&tmp_path);
        return Err(DownloadError::Other(format!(
            "downloaded empty file from {url}; refusing to continue"
        )));
    }

    fs::rename(&tmp_path, target_path).map_err(|err| {
        DownloadError::Other(format!(
            "failed to move {:?} to {:?}: {err}",
            tmp_path, target_path
        ))
    })?;

    info!(file = name, bytes = size, "model file ready");
    Ok(())
}

fn part_path_for(target_path: &Path) -> PathBuf {
    let name = target_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("model");
    target_path.with_file_name(format!("{name}.part"))
}

fn hf_resolve_url(repo: &str, revision: &str, filename: &str) -> String {
    format!(
        "https://huggingface.co/{}/resolve/{}/{}",
        repo.trim_matches('/'),
        revision.trim_matches('/'),
        filename.trim_matches('/')
    )
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceKind, IpaEngineKind};

    fn offline_cfg(model_dir: PathBuf) -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            model_dir,
            model_dir_explicit: true,
            auto_download: false,
            hf_repo: "facebook/wav2vec2-base-960h".to_string(),
            hf_revision: "main".to_string(),
            weights_file: "model.safetensors".to_string(),
            hf_token: None,
            device: DeviceKind::Cpu,
            max_upload_bytes: 1024,
            ipa_engine: IpaEngineKind::English,
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "voxpreference-model-store-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn resolve_url_normalizes_edges() {
        assert_eq!(
            hf_resolve_url("/facebook/wav2vec2-base-960h/", "main", "/vocab.json/"),
            "https://huggingface.co/facebook/wav2vec2-base-960h/resolve/main/vocab.json"
        );
    }

    #[test]
    fn lock_and_part_paths_use_sibling_files() {
        let path = Path::new("/tmp/model.safetensors");
        assert_eq!(
            lock_path_for(path).to_string_lossy(),
            "/tmp/model.safetensors.lock"
        );
        assert_eq!(
            part_path_for(path).to_string_lossy(),
            "/tmp/model.safetensors.part"
        );
    }

    #[test]
    fn missing_files_without_download_is_an_error() {
        let dir = scratch_dir("missing");
        fs::write(dir.join("config.json"), b"{}").unwrap();
        let err = ensure_model_ready(&offline_cfg(dir.clone())).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("vocab.json"));
        assert!(message.contains("model.safetensors"));
        assert!(!message.contains("config.json,"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn complete_directory_is_ready() {
        let dir = scratch_dir("complete");
        for name in ["config.json", "vocab.json", "model.safetensors"] {
            fs::write(dir.join(name), b"x").unwrap();
        }
        assert!(ensure_model_ready(&offline_cfg(dir.clone())).is_ok());
        let _ = fs::remove_dir_all(dir);
    }
}
