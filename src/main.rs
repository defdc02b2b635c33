//! Comfyrelay - image-generation job relay for a node-graph engine

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfyrelay_client::Preference;
use comfyrelay_core::{Artifact, InputImage, JobParams, RelayConfig, CONTENT_TYPE_JPEG, CONTENT_TYPE_PNG};
use comfyrelay_gateway::request::job_from_params;
use comfyrelay_gateway::{start_gateway, AppState};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "comfyrelay", about = "Comfyrelay: submit graph jobs to an image engine")]
struct Cli {
    /// TOML config file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve,
    /// Run one job and write every artifact to a directory
    Run {
        /// Template file name inside the workflow directory
        #[arg(short, long, default_value = "SDXL.json")]
        template: String,
        #[arg(short, long)]
        positive: String,
        #[arg(short, long, default_value = "")]
        negative: String,
        #[arg(long, allow_negative_numbers = true)]
        seed: Option<i64>,
        #[arg(long, default_value = "1024")]
        width: u32,
        #[arg(long, default_value = "1024")]
        height: u32,
        #[arg(long, default_value = "20")]
        steps: u32,
        #[arg(long, default_value = "8.0")]
        cfg: f64,
        #[arg(long, default_value = "1.0")]
        denoise: f64,
        #[arg(long, default_value = "euler")]
        sampler: String,
        /// Checkpoint override
        #[arg(long)]
        checkpoint: Option<String>,
        /// PNG uploaded to the engine before submission
        #[arg(long)]
        input_image: Option<PathBuf>,
        /// Transcode PNG output to JPEG
        #[arg(long)]
        jpeg: bool,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Show version
    Version,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyrelay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            init_tracing();
            let config = RelayConfig::resolve(cli.config.as_deref())?;
            start_gateway(config).await?;
        }

        Commands::Run {
            template,
            positive,
            negative,
            seed,
            width,
            height,
            steps,
            cfg,
            denoise,
            sampler,
            checkpoint,
            input_image,
            jpeg,
            out,
        } => {
            init_tracing();
            let config = RelayConfig::resolve(cli.config.as_deref())?;

            let params = JobParams {
                prompt_file: template,
                negative_prompt: negative,
                seed,
                width,
                height,
                steps,
                cfg,
                denoise,
                sampler_name: sampler,
                tensors_file_name: checkpoint,
                ..JobParams::new(positive)
            };
            let mut job = job_from_params(&params, &config.workflow_dir, &config.upload_name)?;
            if let Some(path) = input_image {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("reading input image {}", path.display()))?;
                job = job.with_input_image(InputImage {
                    name: config.upload_name.clone(),
                    bytes,
                });
            }

            let state = AppState::from_config(config);
            let shutdown = state.shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
            });

            let preference = if jpeg { Preference::Jpeg } else { Preference::Original };
            let artifacts = state.run(job, preference).await?;
            let written = write_artifacts(&out, &artifacts)?;
            info!("Run finished");
            println!("{} artifact(s) written to {}", written, out.display());
        }

        Commands::Version => {
            println!("comfyrelay v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        CONTENT_TYPE_PNG => "png",
        CONTENT_TYPE_JPEG => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn write_artifacts(dir: &Path, artifacts: &[Artifact]) -> anyhow::Result<usize> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (i, artifact) in artifacts.iter().enumerate() {
        let path = dir.join(format!(
            "comfyrelay_{:05}.{}",
            i + 1,
            extension_for(&artifact.content_type)
        ));
        std::fs::write(&path, &artifact.bytes)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {} ({} bytes)", path.display(), artifact.len());
    }
    Ok(artifacts.len())
}
