use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use moodwav_lib::backend::http::HttpAnalysisBackend;
use moodwav_lib::backend::{AnalysisBackend, AnalysisRequest};
use moodwav_lib::settings::AppSettings;
use moodwav_lib::{Normalizer, Outcome, PreparedUpload, RawAudioBlob};

#[derive(Parser, Debug)]
#[command(author, version, about = "Normalize audio clips to 16 kHz mono WAV for emotion analysis")]
struct Args {
    /// Settings file (JSON). Missing file means defaults.
    #[arg(long, global = true, default_value = "moodwav.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a clip and write the file that would be uploaded.
    Convert {
        input: PathBuf,

        /// Output path (default: the upload file name next to the input).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Declared MIME type (default: guessed from the extension).
        #[arg(long)]
        mime: Option<String>,
    },
    /// Convert a clip and send it to the analysis API.
    Analyze {
        input: PathBuf,

        #[arg(long)]
        base_url: Option<String>,

        /// `movie` or `tv`.
        #[arg(long)]
        content_type: Option<String>,

        #[arg(short = 'n', long)]
        num_recommendations: Option<u32>,

        #[arg(long)]
        mime: Option<String>,
    },
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") | Some("aac") => "audio/mp4",
        Some("ogg") | Some("oga") | Some("opus") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        _ => "",
    }
}

fn read_blob(path: &Path, mime: Option<String>) -> Result<RawAudioBlob> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    let mime = mime.unwrap_or_else(|| guess_mime(path).to_string());
    let mut blob = RawAudioBlob::new(bytes, mime);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        blob = blob.with_file_name(name);
    }
    Ok(blob)
}

fn report(upload: &PreparedUpload) {
    match &upload.outcome {
        Outcome::Converted { frames } => log::info!(
            "{} ({}, {} frames, {:.2}s)",
            upload.file_name,
            upload.mime_type,
            frames,
            *frames as f64 / moodwav_lib::TARGET_SAMPLE_RATE as f64
        ),
        Outcome::Fallback { reason } => log::warn!(
            "Sending original bytes as {} ({}): {}",
            upload.file_name,
            upload.mime_type,
            reason
        ),
    }
}

async fn run(args: Args) -> Result<()> {
    let mut settings = AppSettings::load(&args.settings);
    let normalizer = Arc::new(Normalizer::new(&settings.resampler));

    match args.command {
        Command::Convert {
            input,
            output,
            mime,
        } => {
            let blob = read_blob(&input, mime)?;
            let upload = normalizer.prepare_async(blob).await?;
            report(&upload);

            let output = output.unwrap_or_else(|| input.with_file_name(&upload.file_name));
            if output == input {
                bail!(
                    "Refusing to overwrite the input {}; pass --output",
                    input.display()
                );
            }
            std::fs::write(&output, &upload.bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("{}", serde_json::json!({
                "output": output.display().to_string(),
                "mime_type": upload.mime_type,
                "outcome": upload.outcome,
            }));
        }
        Command::Analyze {
            input,
            base_url,
            content_type,
            num_recommendations,
            mime,
        } => {
            if let Some(url) = base_url {
                settings.backend.base_url = url;
            }
            if let Some(kind) = content_type {
                settings.backend.content_type = kind;
            }
            if let Some(n) = num_recommendations {
                settings.backend.num_recommendations = n;
            }

            let blob = read_blob(&input, mime)?;
            let upload = normalizer.prepare_async(blob).await?;
            report(&upload);

            let backend = HttpAnalysisBackend::new(&settings.backend)?;
            log::info!("Uploading to {} at {}", backend.name(), settings.backend.base_url);
            let response = backend
                .analyze_audio(&upload, &AnalysisRequest::from(&settings.backend))
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
