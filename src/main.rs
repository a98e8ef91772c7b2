mod api;
mod audio;
mod backend;
mod config;
mod error;
mod features;
mod model_store;
mod phonetics;
mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::api::{build_router, AppState};
use crate::backend::build_backend;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::pipeline::{build_transliterator, AsrPipeline};

/// wav2vec2 transcription service with IPA output.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Transcribe one local audio file and print the result.
    Predict {
        /// Path to an audio file in any supported container.
        audio_path: PathBuf,
    },
    /// Convert text or ARPAbet phonemes to IPA without loading a model.
    Ipa {
        /// ARPAbet symbols such as `AH0 Z S AA1` instead of English text.
        #[arg(long)]
        arpabet: bool,
        /// Words or phoneme symbols to convert.
        #[arg(required = true)]
        units: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxpreference_asr=info,tower_http=info,axum=info".into()),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    run(cli.command.unwrap_or(Command::Serve)).await
}

/// Model settings are read from the environment only by the subcommands that load a model.
async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Serve => {
            let cfg = AppConfig::from_env()?;
            let pipeline = load_pipeline(&cfg).await?;
            serve(cfg, pipeline).await
        }
        Command::Predict { audio_path } => {
            let cfg = AppConfig::from_env()?;
            let pipeline = load_pipeline(&cfg).await?;
            predict(&pipeline, audio_path).await
        }
        Command::Ipa { arpabet, units } => {
            println!("{}", convert_units_to_ipa(arpabet, &units));
            Ok(())
        }
    }
}

/// Space-joined IPA for English words or ARPAbet symbols.
fn convert_units_to_ipa(arpabet: bool, units: &[String]) -> String {
    if arpabet {
        phonetics::phonemes_to_ipa(&phonetics::Arpabet, units)
    } else {
        phonetics::words_to_phonemes(&phonetics::EnglishOrthography, &units.join(" ")).join(" ")
    }
}

/// Fetches model files if needed and loads the model once.
async fn load_pipeline(cfg: &AppConfig) -> Result<AsrPipeline, AppError> {
    let load_cfg = cfg.clone();
    let model = tokio::task::spawn_blocking(move || {
        model_store::ensure_model_ready(&load_cfg)?;
        build_backend(&load_cfg)
    })
    .await
    .map_err(|err| AppError::internal(format!("model load task failed: {err}")))??;

    Ok(AsrPipeline::new(model, build_transliterator(cfg.ipa_engine)))
}

async fn serve(cfg: AppConfig, pipeline: AsrPipeline) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        model_dir = ?cfg.model_dir,
        device = cfg.device.as_str(),
        "starting voxpreference-asr"
    );

    let state = Arc::new(AppState::new(cfg, pipeline));
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn predict(
    pipeline: &AsrPipeline,
    audio_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(&audio_path).await?;
    let hint = audio_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(audio::extension_hint);

    let output = pipeline.run_bytes(bytes, hint).await?;
    println!("Transcription: {}", output.transcription);
    match output.ipa.ipa() {
        Some(ipa) => println!("IPA: {ipa}"),
        None => println!("IPA error: {}", output.ipa.error().unwrap_or_default()),
    }
    println!(
        "Phonemes: {:?}",
        pipeline.char_phonemes(&output.transcription)
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predict_subcommand_takes_a_path() {
        let cli = Cli::try_parse_from(["voxpreference-asr", "predict", "clip.wav"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Predict { audio_path }) if audio_path == PathBuf::from("clip.wav")
        ));
    }

    #[test]
    fn ipa_subcommand_converts_both_kinds_of_units() {
        let cli =
            Cli::try_parse_from(["voxpreference-asr", "ipa", "--arpabet", "AH0", "Z", "QQ"])
                .unwrap();
        let Some(Command::Ipa { arpabet, units }) = cli.command else {
            panic!("expected ipa subcommand");
        };
        assert!(arpabet);
        assert_eq!(convert_units_to_ipa(arpabet, &units), "ə z [ERROR:QQ]");
        assert_eq!(
            convert_units_to_ipa(false, &["ship".to_string(), "4".to_string()]),
            "ʃɪp [ERROR:4]"
        );
    }

    #[tokio::test]
    async fn ipa_subcommand_ignores_model_settings() {
        std::env::set_var("ASR_DEVICE", "tpu");
        assert!(AppConfig::from_env().is_err());

        let result = run(Command::Ipa {
            arpabet: false,
            units: vec!["ship".to_string()],
        })
        .await;
        std::env::remove_var("ASR_DEVICE");
        assert!(result.is_ok());
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["voxpreference-asr"]).unwrap();
        assert!(cli.command.is_none());
    }
}
