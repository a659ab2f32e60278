//! Pipeline assembly and inference.
//!
//! [`VideoPipeline`] composes the base stable-diffusion components (CLIP text
//! encoder, UNet, VAE from `candle-transformers`) with the motion adapter and
//! the conditioning networks, drives the denoising loop, and decodes the
//! final latents into frames.

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{clip, unet_2d, vae};
use image::RgbImage;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::info;

use crate::config::GenerationConfig;
use crate::frames::{frames_to_tensor, tensor_to_frame};
use crate::loader::{self, LoaderError, WeightLoader, load_model_config};
use crate::lora::{LoraError, LoraWeights};
use crate::models::{ControlNetConfig, ControlNetModel, MotionAdapter, MotionAdapterConfig, MultiControlNet};
use crate::scheduler::{
    BetaSchedule, DpmSolverConfig, DpmSolverMultistepScheduler, LcmScheduler, LcmSchedulerConfig,
    NoiseScheduler, TimestepSpacing,
};
use crate::utils::SeededRng;

/// VAE latent scaling factor for SD-family models.
const LATENT_SCALE: f64 = 0.18215;
/// CLIP context length.
const TOKEN_LIMIT: usize = 77;
/// Spatial downsampling between pixel and latent space.
const VAE_FACTOR: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Lora(#[from] LoraError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Which scheduler the pipeline runs with. Exhaustive two-way choice driven
/// by `lcm_lora.enable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    LatentConsistency,
    DpmSolverMultistep,
}

impl SchedulerKind {
    pub fn for_config(config: &GenerationConfig) -> Self {
        if config.lcm_lora.enable {
            Self::LatentConsistency
        } else {
            Self::DpmSolverMultistep
        }
    }
}

/// Fixed overrides the pipeline applies on top of the base model's scheduler
/// configuration.
pub fn dpm_overrides(mut config: DpmSolverConfig) -> DpmSolverConfig {
    config.beta_schedule = BetaSchedule::Linear;
    config.clip_sample = false;
    config.timestep_spacing = TimestepSpacing::Linspace;
    config.steps_offset = 1;
    config
}

/// Everything a single `generate` call needs besides the conditioning frames.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_frames: usize,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance_scale: f64,
    /// Conditioning scales, index-aligned with the networks and the frame
    /// sequences
    pub conditioning_scales: Vec<f64>,
    pub seed: u64,
}

impl GenerationParams {
    /// Derive the invocation parameters from the configuration and the
    /// resolved frame count.
    pub fn from_config(config: &GenerationConfig, num_frames: usize) -> Self {
        Self {
            prompt: config.prompt.clone(),
            negative_prompt: config.negative_prompt.clone(),
            num_frames,
            width: 512,
            height: 512,
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            conditioning_scales: config.conditioning_scales(),
            seed: config.seed,
        }
    }
}

/// The assembled generation pipeline. Built once per run, used once.
pub struct VideoPipeline {
    tokenizer: Tokenizer,
    text_encoder: clip::ClipTextTransformer,
    unet: unet_2d::UNet2DConditionModel,
    vae: vae::AutoEncoderKL,
    motion: MotionAdapter,
    controlnet: MultiControlNet,
    scheduler: Box<dyn NoiseScheduler>,
    device: Device,
    dtype: DType,
}

impl VideoPipeline {
    /// Load every configured module and assemble the pipeline.
    pub fn assemble(
        config: &GenerationConfig,
        device: Device,
        dtype: DType,
    ) -> Result<Self, PipelineError> {
        let loader = WeightLoader::new(device.clone(), dtype);
        let base = loader::resolve_source(&config.pretrained_model_path)?;

        info!("Loading tokenizer");
        let tokenizer_path = base.join("tokenizer").join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| PipelineError::Tokenizer(e.to_string()))?;

        info!("Loading text encoder");
        let text_encoder = clip::ClipTextTransformer::new(
            loader.load_dir(base.join("text_encoder"))?,
            &clip::Config::v1_5(),
        )?;

        info!("Loading motion adapter");
        let motion_source = loader::resolve_source(&config.motion_module_path)?;
        let motion_config = module_config_or_default::<MotionAdapterConfig>(&motion_source);
        let motion = MotionAdapter::new(loader.load_source(&config.motion_module_path)?, &motion_config)?;

        info!(count = config.controlnet.len(), "Loading conditioning networks");
        let mut nets = Vec::with_capacity(config.controlnet.len());
        for entry in &config.controlnet {
            let source = loader::resolve_source(&entry.model_path)?;
            let net_config = module_config_or_default::<ControlNetConfig>(&source);
            nets.push(ControlNetModel::new(
                loader.load_source(&entry.model_path)?,
                &net_config,
            )?);
        }
        let controlnet = MultiControlNet::new(nets);

        info!(single_file = config.vae.single_file, "Loading VAE");
        let vae_source = loader::resolve_source(&config.vae.model_path)?;
        let (vae_vb, vae_config) = if config.vae.single_file {
            (loader.load_file(&vae_source)?, vae::AutoEncoderKLConfig::default())
        } else {
            (loader.load_dir(&vae_source)?, vae_config_from_dir(&vae_source))
        };
        let vae = vae::AutoEncoderKL::new(vae_vb, 3, 3, vae_config)?;

        let kind = SchedulerKind::for_config(config);
        info!(?kind, "Loading UNet and scheduler");
        let unet_dir = base.join("unet");
        let unet_config = unet_2d::UNet2DConditionModelConfig::default();
        let (unet, scheduler): (_, Box<dyn NoiseScheduler>) = match kind {
            SchedulerKind::LatentConsistency => {
                // validate() guarantees the path is present when enabled
                let lora_path = config.lcm_lora.model_path.as_deref().ok_or_else(|| {
                    PipelineError::InvalidRequest(
                        "lcm_lora.model_path missing with lcm_lora.enable".to_string(),
                    )
                })?;
                let mut tensors = load_tensor_map(&unet_dir, dtype, &device)?;
                let lora = LoraWeights::load(loader::resolve_source(lora_path)?, dtype, &device)?;
                let applied = lora.merge_into(&mut tensors, config.lcm_lora.weight)?;
                info!(layers = applied, "Merged consistency LoRA into UNet");

                let vb = candle_nn::VarBuilder::from_tensors(tensors, dtype, &device);
                let unet = unet_2d::UNet2DConditionModel::new(vb, 4, 4, false, unet_config)?;
                let scheduler_config = LcmSchedulerConfig {
                    beta_schedule: BetaSchedule::Linear,
                    ..Default::default()
                };
                (unet, Box::new(LcmScheduler::new(scheduler_config)) as _)
            }
            SchedulerKind::DpmSolverMultistep => {
                let unet = unet_2d::UNet2DConditionModel::new(
                    loader.load_dir(&unet_dir)?,
                    4,
                    4,
                    false,
                    unet_config,
                )?;
                let scheduler_path = base.join("scheduler").join("scheduler_config.json");
                let base_config = if scheduler_path.exists() {
                    load_model_config::<DpmSolverConfig>(&scheduler_path)?
                } else {
                    DpmSolverConfig::default()
                };
                let scheduler = DpmSolverMultistepScheduler::new(dpm_overrides(base_config));
                (unet, Box::new(scheduler) as _)
            }
        };

        Ok(Self {
            tokenizer,
            text_encoder,
            unet,
            vae,
            motion,
            controlnet,
            scheduler,
            device,
            dtype,
        })
    }

    fn check_request(
        &self,
        params: &GenerationParams,
        conditioning: &[Vec<RgbImage>],
    ) -> Result<(), PipelineError> {
        let n = self.controlnet.len();
        if conditioning.len() != n || params.conditioning_scales.len() != n {
            return Err(PipelineError::InvalidRequest(format!(
                "{n} conditioning networks but {} frame sequences and {} scales",
                conditioning.len(),
                params.conditioning_scales.len()
            )));
        }
        if params.num_frames == 0 {
            return Err(PipelineError::InvalidRequest(
                "num_frames must be at least 1".to_string(),
            ));
        }
        for (i, seq) in conditioning.iter().enumerate() {
            if seq.len() != params.num_frames {
                return Err(PipelineError::InvalidRequest(format!(
                    "conditioning sequence {i} has {} frames, expected {}",
                    seq.len(),
                    params.num_frames
                )));
            }
        }
        if params.width % VAE_FACTOR != 0 || params.height % VAE_FACTOR != 0 {
            return Err(PipelineError::InvalidRequest(format!(
                "width and height must be divisible by {VAE_FACTOR}, got {}x{}",
                params.width, params.height
            )));
        }
        Ok(())
    }

    /// Run the full denoising loop and decode the generated frames.
    ///
    /// Blocking; returns the complete frame sequence or the first error.
    pub fn generate(
        &mut self,
        params: &GenerationParams,
        conditioning: &[Vec<RgbImage>],
    ) -> Result<Vec<RgbImage>, PipelineError> {
        self.check_request(params, conditioning)?;

        let mut rng = SeededRng::new(params.seed);
        let use_cfg = params.guidance_scale > 1.0;

        let text_emb = self.encode_prompt(&params.prompt)?;
        let negative_emb = if use_cfg {
            Some(self.encode_prompt(&params.negative_prompt)?)
        } else {
            None
        };

        let mut cond_tensors = Vec::with_capacity(conditioning.len());
        for seq in conditioning {
            let t = frames_to_tensor(seq, params.width, params.height, &self.device)?
                .to_dtype(self.dtype)?;
            cond_tensors.push(t);
        }

        let latent_h = params.height / VAE_FACTOR;
        let latent_w = params.width / VAE_FACTOR;
        // Frames ride the batch axis: [F, 4, h, w]
        let mut latents = rng
            .randn((params.num_frames, 4, latent_h, latent_w), &self.device)?
            .to_dtype(self.dtype)?;

        self.scheduler.set_timesteps(params.steps)?;
        let timesteps = self.scheduler.timesteps().to_vec();
        info!(steps = timesteps.len(), frames = params.num_frames, "Denoising");

        for (i, &t) in timesteps.iter().enumerate() {
            let noise_cond = self.predict_noise(&latents, t, &text_emb, &cond_tensors, params)?;

            let noise = match &negative_emb {
                Some(neg) => {
                    let noise_uncond =
                        self.predict_noise(&latents, t, neg, &cond_tensors, params)?;
                    let delta = ((&noise_cond - &noise_uncond)? * params.guidance_scale)?;
                    (noise_uncond + delta)?
                }
                None => noise_cond,
            };

            latents = self.scheduler.step(&noise, t, &latents, &mut rng)?;
            info!(step = i + 1, total = timesteps.len(), t, "step done");
        }

        // Decode one frame at a time to bound peak memory
        info!("Decoding latents");
        let scaled = (latents / LATENT_SCALE)?;
        let mut frames = Vec::with_capacity(params.num_frames);
        for f in 0..params.num_frames {
            let latent = scaled.i(f)?.unsqueeze(0)?;
            let image = self.vae.decode(&latent)?.squeeze(0)?;
            frames.push(tensor_to_frame(&image)?);
        }
        Ok(frames)
    }

    /// One full noise prediction: UNet, conditioning residuals, temporal
    /// mixing.
    fn predict_noise(
        &self,
        latents: &Tensor,
        timestep: usize,
        text_emb: &Tensor,
        cond_tensors: &[Tensor],
        params: &GenerationParams,
    ) -> Result<Tensor, PipelineError> {
        let f = latents.dim(0)?;
        let emb = text_emb.repeat((f, 1, 1))?;

        let eps = self.unet.forward(latents, timestep as f64, &emb)?;
        let residual = self.controlnet.forward(
            latents,
            timestep as f64,
            cond_tensors,
            &params.conditioning_scales,
        )?;
        let eps = (eps + residual)?;

        // [F, C, h, w] -> [1, C, F, h, w] for the temporal pass
        let eps5 = eps.unsqueeze(0)?.transpose(1, 2)?.contiguous()?;
        let eps5 = self.motion.forward(&eps5)?;
        let eps = eps5.transpose(1, 2)?.squeeze(0)?.contiguous()?;
        Ok(eps)
    }

    /// Tokenize and encode one prompt to CLIP hidden states `[1, 77, D]`.
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor, PipelineError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| PipelineError::Tokenizer(e.to_string()))?;
        let pad_id = self
            .tokenizer
            .token_to_id("<|endoftext|>")
            .unwrap_or(49407);

        let mut ids: Vec<u32> = encoding.get_ids().to_vec();
        ids.truncate(TOKEN_LIMIT);
        while ids.len() < TOKEN_LIMIT {
            ids.push(pad_id);
        }

        let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_encoder.forward(&input)?)
    }
}

/// Collect every tensor of a module directory into one map at the target
/// dtype (needed when weights are rewritten before model construction).
fn load_tensor_map(
    dir: &Path,
    dtype: DType,
    device: &Device,
) -> Result<HashMap<String, Tensor>, PipelineError> {
    let files = loader::find_safetensors_files(dir)?;
    if files.is_empty() {
        return Err(LoaderError::NoWeightsFound {
            path: dir.display().to_string(),
        }
        .into());
    }
    let mut tensors = HashMap::new();
    for file in &files {
        for (name, tensor) in candle_core::safetensors::load(file, device)? {
            tensors.insert(name, tensor.to_dtype(dtype)?);
        }
    }
    Ok(tensors)
}

/// Read `config.json` next to a module checkpoint, falling back to defaults
/// when it is absent or the source is a bare checkpoint file.
fn module_config_or_default<T>(source: &Path) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    let dir = if source.is_dir() {
        source
    } else {
        match source.parent() {
            Some(parent) => parent,
            None => return T::default(),
        }
    };
    match load_model_config::<T>(dir.join("config.json")) {
        Ok(config) => config,
        Err(_) => T::default(),
    }
}

/// Minimal subset of a diffusers VAE `config.json`.
fn vae_config_from_dir(dir: &Path) -> vae::AutoEncoderKLConfig {
    #[derive(serde::Deserialize)]
    struct VaeConfigJson {
        #[serde(default)]
        block_out_channels: Option<Vec<usize>>,
        #[serde(default)]
        layers_per_block: Option<usize>,
        #[serde(default)]
        latent_channels: Option<usize>,
        #[serde(default)]
        norm_num_groups: Option<usize>,
    }

    let defaults = vae::AutoEncoderKLConfig::default();
    match load_model_config::<VaeConfigJson>(dir.join("config.json")) {
        Ok(json) => vae::AutoEncoderKLConfig {
            block_out_channels: json
                .block_out_channels
                .unwrap_or(defaults.block_out_channels.clone()),
            layers_per_block: json.layers_per_block.unwrap_or(defaults.layers_per_block),
            latent_channels: json.latent_channels.unwrap_or(defaults.latent_channels),
            norm_num_groups: json.norm_num_groups.unwrap_or(defaults.norm_num_groups),
            ..defaults
        },
        Err(_) => defaults,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlNetEntry, LcmLoraConfig, VaeSource};

    fn config(lcm: bool) -> GenerationConfig {
        GenerationConfig {
            motion_module_path: "mm".to_string(),
            controlnet: vec![
                ControlNetEntry {
                    model_path: "a".to_string(),
                    image_path: "a.gif".to_string(),
                    conditioning_scale: 1.0,
                },
                ControlNetEntry {
                    model_path: "b".to_string(),
                    image_path: "b.gif".to_string(),
                    conditioning_scale: 0.5,
                },
            ],
            vae: VaeSource {
                single_file: true,
                model_path: "vae".to_string(),
            },
            pretrained_model_path: "base".to_string(),
            lcm_lora: LcmLoraConfig {
                enable: lcm,
                model_path: lcm.then(|| "lcm.safetensors".to_string()),
                weight: 0.8,
            },
            prompt: "p".to_string(),
            negative_prompt: "n".to_string(),
            seed: 42,
            steps: 20,
            guidance_scale: 7.5,
        }
    }

    #[test]
    fn scheduler_choice_is_exclusive() {
        assert_eq!(
            SchedulerKind::for_config(&config(true)),
            SchedulerKind::LatentConsistency
        );
        assert_eq!(
            SchedulerKind::for_config(&config(false)),
            SchedulerKind::DpmSolverMultistep
        );
    }

    #[test]
    fn dpm_overrides_pin_pipeline_settings() {
        let base = DpmSolverConfig {
            beta_schedule: BetaSchedule::ScaledLinear,
            clip_sample: true,
            timestep_spacing: TimestepSpacing::Leading,
            steps_offset: 0,
            ..Default::default()
        };
        let forced = dpm_overrides(base);
        assert_eq!(forced.beta_schedule, BetaSchedule::Linear);
        assert!(!forced.clip_sample);
        assert_eq!(forced.timestep_spacing, TimestepSpacing::Linspace);
        assert_eq!(forced.steps_offset, 1);
    }

    #[test]
    fn params_keep_scale_order_and_dimensions() {
        let params = GenerationParams::from_config(&config(false), 20);
        assert_eq!(params.conditioning_scales, vec![1.0, 0.5]);
        assert_eq!(params.num_frames, 20);
        assert_eq!((params.width, params.height), (512, 512));
        assert_eq!(params.steps, 20);
        assert_eq!(params.seed, 42);
    }
}
