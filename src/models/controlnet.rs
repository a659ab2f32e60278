//! Conditioning networks.
//!
//! A [`ControlNetModel`] turns an auxiliary image (pose, depth, edges) into a
//! residual on the noise prediction at latent resolution. The output
//! projection is a zero tensor in a fresh checkpoint, so an untrained network
//! contributes nothing. [`MultiControlNet`] holds the configured networks in
//! order and sums their residuals with index-aligned frames and scales.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, GroupNorm, Linear, VarBuilder, conv2d, group_norm, linear};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ControlNetConfig {
    /// Channels of the conditioning image (3 for RGB)
    pub conditioning_channels: usize,
    /// Channels of the latent tensor the residual applies to
    pub latent_channels: usize,
    /// Feature widths of the conditioning embedder; each transition halves
    /// the spatial resolution
    pub block_channels: Vec<usize>,
    /// Number of residual blocks at latent resolution
    pub num_res_blocks: usize,
    pub groups: usize,
}

impl Default for ControlNetConfig {
    fn default() -> Self {
        Self {
            conditioning_channels: 3,
            latent_channels: 4,
            // Three stride-2 transitions: 512 px -> 64 latent
            block_channels: vec![16, 32, 96, 256],
            num_res_blocks: 2,
            groups: 8,
        }
    }
}

/// Strided conv stack taking the conditioning image from pixel space down to
/// latent resolution.
struct ConditioningEmbedding {
    conv_in: Conv2d,
    blocks: Vec<(Conv2d, Conv2d)>,
}

impl ConditioningEmbedding {
    fn new(config: &ControlNetConfig, vb: VarBuilder) -> Result<Self> {
        let channels = &config.block_channels;
        let pad = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let pad_down = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };

        let conv_in = conv2d(
            config.conditioning_channels,
            channels[0],
            3,
            pad,
            vb.pp("conv_in"),
        )?;
        let mut blocks = Vec::with_capacity(channels.len() - 1);
        for i in 0..channels.len() - 1 {
            let keep = conv2d(channels[i], channels[i], 3, pad, vb.pp(format!("blocks.{i}.0")))?;
            let down = conv2d(
                channels[i],
                channels[i + 1],
                3,
                pad_down,
                vb.pp(format!("blocks.{i}.1")),
            )?;
            blocks.push((keep, down));
        }
        Ok(Self { conv_in, blocks })
    }

    fn forward(&self, cond: &Tensor) -> Result<Tensor> {
        let mut x = self.conv_in.forward(cond)?.silu()?;
        for (keep, down) in &self.blocks {
            x = keep.forward(&x)?.silu()?;
            x = down.forward(&x)?.silu()?;
        }
        Ok(x)
    }
}

/// Residual block with timestep conditioning.
struct ResnetBlock {
    norm1: GroupNorm,
    conv1: Conv2d,
    time_proj: Linear,
    norm2: GroupNorm,
    conv2: Conv2d,
}

impl ResnetBlock {
    fn new(channels: usize, time_dim: usize, groups: usize, vb: VarBuilder) -> Result<Self> {
        let pad = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            norm1: group_norm(groups, channels, 1e-5, vb.pp("norm1"))?,
            conv1: conv2d(channels, channels, 3, pad, vb.pp("conv1"))?,
            time_proj: linear(time_dim, channels, vb.pp("time_proj"))?,
            norm2: group_norm(groups, channels, 1e-5, vb.pp("norm2"))?,
            conv2: conv2d(channels, channels, 3, pad, vb.pp("conv2"))?,
        })
    }

    fn forward(&self, x: &Tensor, temb: &Tensor) -> Result<Tensor> {
        let h = self.conv1.forward(&self.norm1.forward(x)?.silu()?)?;
        let t = self
            .time_proj
            .forward(&temb.silu()?)?
            .unsqueeze(2)?
            .unsqueeze(3)?;
        let h = h.broadcast_add(&t)?;
        let h = self.conv2.forward(&self.norm2.forward(&h)?.silu()?)?;
        x + h
    }
}

/// One conditioning network.
pub struct ControlNetModel {
    config: ControlNetConfig,
    cond_embedding: ConditioningEmbedding,
    latent_proj: Conv2d,
    time_fc1: Linear,
    time_fc2: Linear,
    res_blocks: Vec<ResnetBlock>,
    out_proj: Conv2d,
}

impl ControlNetModel {
    pub fn new(vb: VarBuilder, config: &ControlNetConfig) -> Result<Self> {
        let feat = *config
            .block_channels
            .last()
            .ok_or_else(|| candle_core::Error::Msg("block_channels is empty".to_string()))?;
        let time_dim = feat;

        let cond_embedding = ConditioningEmbedding::new(config, vb.pp("cond_embedding"))?;
        let latent_proj = conv2d(
            config.latent_channels,
            feat,
            1,
            Conv2dConfig::default(),
            vb.pp("latent_proj"),
        )?;
        let time_fc1 = linear(feat, time_dim, vb.pp("time_embedding.fc1"))?;
        let time_fc2 = linear(time_dim, time_dim, vb.pp("time_embedding.fc2"))?;

        let mut res_blocks = Vec::with_capacity(config.num_res_blocks);
        for i in 0..config.num_res_blocks {
            res_blocks.push(ResnetBlock::new(
                feat,
                time_dim,
                config.groups,
                vb.pp(format!("res_blocks.{i}")),
            )?);
        }
        let out_proj = conv2d(
            feat,
            config.latent_channels,
            1,
            Conv2dConfig::default(),
            vb.pp("out_proj"),
        )?;

        Ok(Self {
            config: config.clone(),
            cond_embedding,
            latent_proj,
            time_fc1,
            time_fc2,
            res_blocks,
            out_proj,
        })
    }

    pub fn config(&self) -> &ControlNetConfig {
        &self.config
    }

    /// Residual for one frame batch.
    ///
    /// `latents`: `[N, latent_channels, h, w]`; `cond`: `[N,
    /// conditioning_channels, H, W]` where `H = h * 2^(transitions)`.
    pub fn forward(&self, latents: &Tensor, timestep: f64, cond: &Tensor) -> Result<Tensor> {
        let n = latents.dim(0)?;
        let feat = *self.config.block_channels.last().unwrap_or(&0);

        let temb = timestep_embedding(timestep, feat, latents)?;
        let temb = self.time_fc2.forward(&self.time_fc1.forward(&temb)?.silu()?)?;
        let temb = temb.broadcast_as((n, temb.dim(1)?))?.contiguous()?;

        let cond_feat = self.cond_embedding.forward(cond)?;
        let mut x = (self.latent_proj.forward(latents)? + cond_feat)?;
        for block in &self.res_blocks {
            x = block.forward(&x, &temb)?;
        }
        self.out_proj.forward(&x)
    }
}

/// Sinusoidal timestep embedding `[1, dim]` on the same device/dtype as
/// `like`.
fn timestep_embedding(timestep: f64, dim: usize, like: &Tensor) -> Result<Tensor> {
    let half = dim / 2;
    let mut data = Vec::with_capacity(dim);
    for i in 0..half {
        let freq = (-(i as f64) * (10000f64).ln() / half as f64).exp();
        data.push((timestep * freq).sin() as f32);
    }
    for i in 0..dim - half {
        let freq = (-(i as f64) * (10000f64).ln() / half as f64).exp();
        data.push((timestep * freq).cos() as f32);
    }
    Tensor::from_vec(data, (1, dim), like.device())?.to_dtype(like.dtype())
}

/// Ordered collection of conditioning networks.
///
/// Index alignment is the invariant: the i-th network consumes the i-th
/// conditioning tensor and is weighted by the i-th scale.
pub struct MultiControlNet {
    nets: Vec<ControlNetModel>,
}

impl MultiControlNet {
    pub fn new(nets: Vec<ControlNetModel>) -> Self {
        Self { nets }
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    /// Sum of per-network residuals, each scaled by its conditioning scale.
    pub fn forward(
        &self,
        latents: &Tensor,
        timestep: f64,
        conds: &[Tensor],
        scales: &[f64],
    ) -> Result<Tensor> {
        if conds.len() != self.nets.len() || scales.len() != self.nets.len() {
            candle_core::bail!(
                "conditioning mismatch: {} networks, {} frame sequences, {} scales",
                self.nets.len(),
                conds.len(),
                scales.len()
            );
        }

        let mut total = latents.zeros_like()?;
        for ((net, cond), &scale) in self.nets.iter().zip(conds).zip(scales) {
            let residual = net.forward(latents, timestep, cond)?;
            total = (total + (residual * scale)?)?;
        }
        Ok(total)
    }
}
