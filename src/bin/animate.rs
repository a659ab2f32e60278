//! Generate an animated sequence from a YAML run configuration.
//!
//! ```bash
//! animate --config runs/dance.yaml
//! ```
//!
//! Output lands in `outputs/<timestamp>/`: a verbatim copy of the
//! configuration next to the generated `result.gif`.

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use animate_video::config::GenerationConfig;
use animate_video::frames::{align_frame_counts, decode_gif, export_gif};
use animate_video::pipeline::{GenerationParams, VideoPipeline};
use animate_video::staging::RunDir;

#[derive(Parser, Debug)]
#[command(author, version, about = "Conditioned video generation from a YAML config")]
struct Args {
    /// Path to the YAML run configuration
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("animate_video=info".parse()?)
                .add_directive("animate=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = GenerationConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    let run = RunDir::create("outputs", chrono::Local::now())
        .context("creating output directory")?;
    run.stage_config(&args.config)
        .context("copying config into output directory")?;
    info!(dir = %run.path().display(), "Staged run directory");

    let mut sequences = Vec::with_capacity(config.controlnet.len());
    for entry in &config.controlnet {
        let frames = decode_gif(&entry.image_path)
            .with_context(|| format!("decoding {}", entry.image_path))?;
        info!(path = %entry.image_path, frames = frames.len(), "Decoded conditioning input");
        sequences.push(frames);
    }
    let num_frames = align_frame_counts(&mut sequences);
    info!(num_frames, "Reconciled conditioning frame count");

    let device = match Device::cuda_if_available(0) {
        Ok(device) if !device.is_cpu() => {
            info!("Using CUDA device 0");
            device
        }
        Ok(device) => device,
        Err(e) => {
            warn!("CUDA not available: {e}, falling back to CPU");
            Device::Cpu
        }
    };

    info!("Assembling pipeline");
    let mut pipeline = VideoPipeline::assemble(&config, device, DType::F16)
        .context("assembling pipeline")?;

    let params = GenerationParams::from_config(&config, num_frames);
    info!(
        steps = params.steps,
        guidance = params.guidance_scale,
        seed = params.seed,
        "Generating"
    );
    let result = pipeline
        .generate(&params, &sequences)
        .context("generation failed")?;

    let out = run.result_path();
    export_gif(&result, &out).with_context(|| format!("writing {}", out.display()))?;
    info!(path = %out.display(), frames = result.len(), "Done");

    Ok(())
}
