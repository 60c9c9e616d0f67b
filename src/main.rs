//! NoHate - command line front end for the classification core

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nohate::bridge::{self, Bridge};
use nohate::inference::{InferenceBackend, LexiconBackend};
use nohate::lexicon::HATE_THRESHOLD;
use nohate::storage::download::{
    DownloadConfig, DownloadError, ModelDownloader, DEFAULT_QUANT, DEFAULT_REPO,
};
use nohate::storage::models::{locate_default_model, scan_models_directory};
use nohate::storage::settings::{load_settings, ClassifierSettings};
use nohate::storage::{init_storage, models_dir};

#[derive(Parser, Debug)]
#[command(name = "nohate")]
#[command(author, version, about = "Classify text for hate speech with a local model")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a model and classify one text, printing the JSON verdict
    Classify {
        /// Text to classify
        text: String,

        /// Model file (defaults to the installed model)
        #[arg(short, long, env = "NOHATE_MODEL")]
        model: Option<PathBuf>,

        /// Classification instruction; `{{text}}` marks where the text goes
        #[arg(short, long, default_value = "")]
        prompt: String,

        /// Context window size
        #[arg(long)]
        context_size: Option<u32>,

        /// Maximum tokens to generate
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Layers to offload to GPU
        #[arg(long)]
        gpu_layers: Option<u32>,

        /// Inference backend
        #[arg(short, long, value_enum, default_value_t = Backend::Llama)]
        backend: Backend,

        /// Score at or above which the lexicon backend labels text hate
        #[arg(long, default_value_t = HATE_THRESHOLD)]
        threshold: f32,
    },

    /// Score text with the built-in keyword rules
    Score {
        /// Text to score
        text: String,

        /// Extra phrases to treat as hateful
        #[arg(long = "hate")]
        hate: Vec<String>,

        /// Extra phrases to treat as safe
        #[arg(long = "safe")]
        safe: Vec<String>,
    },

    /// List GGUF models in a directory
    Models {
        /// Directory to scan (defaults to the data directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Download a quantized model from Hugging Face
    Download {
        /// Repository to resolve the model file from
        #[arg(long, default_value = DEFAULT_REPO)]
        repo: String,

        /// Quantization suffix of the file to pick
        #[arg(long, default_value = DEFAULT_QUANT)]
        quant: String,

        /// Direct model URL; skips repository resolution
        #[arg(long)]
        url: Option<String>,

        /// Expected SHA-256 of the model file
        #[arg(long)]
        sha256: Option<String>,

        /// Target directory (defaults to the data directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// llama.cpp with a GGUF model
    Llama,
    /// Keyword lexicon; the model file is a JSON lexicon
    Lexicon,
}

fn main() -> ExitCode {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nohate=info")))
        .init();

    info!("Starting NoHate v{}", env!("CARGO_PKG_VERSION"));

    match Cli::parse().command {
        Commands::Classify {
            text,
            model,
            prompt,
            context_size,
            max_tokens,
            gpu_layers,
            backend,
            threshold,
        } => {
            let mut settings = load_settings();
            // One-shot run: a warm-up pass would only double the work
            settings.warmup = false;
            if let Some(n) = context_size {
                settings.context_size = n;
            }
            if let Some(n) = max_tokens {
                settings.max_tokens = n;
            }
            if let Some(n) = gpu_layers {
                settings.gpu_layers = n;
            }

            let Some(path) = model.or_else(|| settings.model_path.clone()).or_else(installed_model)
            else {
                eprintln!("No model given and none installed; pass --model <path>");
                return ExitCode::FAILURE;
            };

            match backend {
                Backend::Lexicon => classify(
                    LexiconBackend::with_threshold(threshold),
                    settings,
                    path,
                    &text,
                    &prompt,
                ),
                #[cfg(feature = "llama")]
                Backend::Llama => classify(
                    nohate::inference::LlamaCppBackend::new(),
                    settings,
                    path,
                    &text,
                    &prompt,
                ),
                #[cfg(not(feature = "llama"))]
                Backend::Llama => {
                    eprintln!("This build has no llama.cpp support; use --backend lexicon");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Score { text, hate, safe } => {
            let score = bridge::score_text_with_lexicon(&text, hate.as_slice(), safe.as_slice());
            println!("{score:.3}");
            ExitCode::SUCCESS
        }
        Commands::Models { dir } => {
            let dir = match dir.map_or_else(models_dir, Ok) {
                Ok(dir) => dir,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            };
            match scan_models_directory(&dir) {
                Ok(models) => {
                    for model in models {
                        let version = model
                            .gguf_version
                            .map_or_else(|| "?".to_string(), |v| format!("v{v}"));
                        println!("{}\t{}\tGGUF {}", model.filename, model.size_string(), version);
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Download {
            repo,
            quant,
            url,
            sha256,
            dir,
        } => {
            let config = DownloadConfig {
                repo,
                quant,
                ..Default::default()
            };
            match download(config, url, sha256, dir) {
                Ok(model) => {
                    println!("{}", model.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Download failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn download(
    config: DownloadConfig,
    url: Option<String>,
    sha256: Option<String>,
    dir: Option<PathBuf>,
) -> Result<PathBuf, DownloadError> {
    let dir = match dir {
        Some(dir) => dir,
        None => init_storage()?,
    };
    let downloader = ModelDownloader::new(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut last_percent = None;
    let progress = |done: u64, total: Option<u64>| {
        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = done * 100 / total;
            if last_percent.map_or(true, |last| percent >= last + 10) {
                info!("Downloaded {}% ({} of {} bytes)", percent, done, total);
                last_percent = Some(percent);
            }
        }
    };

    runtime.block_on(async {
        let url = match url {
            Some(url) => url,
            None => downloader.resolve().await?,
        };
        downloader.download(&url, &dir, sha256.as_deref(), progress).await
    })
}

fn installed_model() -> Option<PathBuf> {
    match locate_default_model() {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Installed model rejected: {}", e);
            None
        }
    }
}

fn classify<B: InferenceBackend>(
    backend: B,
    settings: ClassifierSettings,
    path: PathBuf,
    text: &str,
    prompt: &str,
) -> ExitCode {
    let bridge = Bridge::with_settings(backend, settings);
    if !bridge.load_model(&path) {
        eprintln!("Failed to load model from {}", path.display());
        return ExitCode::FAILURE;
    }

    let verdict = bridge.classify(text, prompt);
    println!("{verdict}");
    bridge.unload_model();

    if verdict.contains("\"error\"") {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
