//! Motion adapter: temporal modelling over the frame axis.
//!
//! The base UNet denoises frames independently. The motion adapter runs a
//! small temporal transformer per spatial location across the frame axis of
//! the noise prediction, which couples the frames of a clip without touching
//! the UNet itself. Output projections are zero tensors in a fresh
//! checkpoint, so an untrained adapter is a no-op on the prediction.

use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder, layer_norm, linear, ops::softmax_last_dim};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MotionAdapterConfig {
    /// Channels of the tensor being modulated (latent channels)
    pub in_channels: usize,
    /// Transformer width
    pub inner_dim: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    /// Longest frame sequence the positional table covers
    pub max_frames: usize,
}

impl Default for MotionAdapterConfig {
    fn default() -> Self {
        Self {
            in_channels: 4,
            inner_dim: 128,
            num_heads: 8,
            num_layers: 2,
            max_frames: 32,
        }
    }
}

/// Multi-head self-attention across the frame axis.
struct TemporalAttention {
    to_q: Linear,
    to_k: Linear,
    to_v: Linear,
    to_out: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl TemporalAttention {
    fn new(dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = dim / num_heads;
        Ok(Self {
            to_q: linear(dim, dim, vb.pp("to_q"))?,
            to_k: linear(dim, dim, vb.pp("to_k"))?,
            to_v: linear(dim, dim, vb.pp("to_v"))?,
            to_out: linear(dim, dim, vb.pp("to_out"))?,
            num_heads,
            head_dim,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, f, d) = x.dims3()?;
        let h = self.num_heads;

        let split = |t: Tensor| -> Result<Tensor> {
            // [B, F, D] -> [B, H, F, head_dim]
            t.reshape((b, f, h, self.head_dim))?.transpose(1, 2)?.contiguous()
        };
        let q = split(self.to_q.forward(x)?)?;
        let k = split(self.to_k.forward(x)?)?;
        let v = split(self.to_v.forward(x)?)?;

        let scale = (self.head_dim as f64).powf(-0.5);
        let attn = (q.matmul(&k.transpose(2, 3)?)? * scale)?;
        let attn = softmax_last_dim(&attn)?;
        let out = attn.matmul(&v)?;

        let out = out.transpose(1, 2)?.contiguous()?.reshape((b, f, d))?;
        self.to_out.forward(&out)
    }
}

struct FeedForward {
    fc1: Linear,
    fc2: Linear,
}

impl FeedForward {
    fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, dim * 4, vb.pp("fc1"))?,
            fc2: linear(dim * 4, dim, vb.pp("fc2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&self.fc1.forward(x)?.gelu()?)
    }
}

struct TemporalTransformerBlock {
    norm1: LayerNorm,
    attn: TemporalAttention,
    norm2: LayerNorm,
    ff: FeedForward,
}

impl TemporalTransformerBlock {
    fn new(dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm1: layer_norm(dim, 1e-5, vb.pp("norm1"))?,
            attn: TemporalAttention::new(dim, num_heads, vb.pp("attn"))?,
            norm2: layer_norm(dim, 1e-5, vb.pp("norm2"))?,
            ff: FeedForward::new(dim, vb.pp("ff"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = (x + self.attn.forward(&self.norm1.forward(x)?)?)?;
        &x + self.ff.forward(&self.norm2.forward(&x)?)?
    }
}

/// Temporal transformer applied residually to a `[B, C, F, H, W]` tensor.
pub struct MotionAdapter {
    config: MotionAdapterConfig,
    proj_in: Linear,
    pos_embed: Tensor,
    blocks: Vec<TemporalTransformerBlock>,
    proj_out: Linear,
}

impl MotionAdapter {
    pub fn new(vb: VarBuilder, config: &MotionAdapterConfig) -> Result<Self> {
        if config.inner_dim % config.num_heads != 0 {
            candle_core::bail!(
                "inner_dim {} not divisible by num_heads {}",
                config.inner_dim,
                config.num_heads
            );
        }

        let proj_in = linear(config.in_channels, config.inner_dim, vb.pp("proj_in"))?;
        let proj_out = linear(config.inner_dim, config.in_channels, vb.pp("proj_out"))?;
        let pos_embed = sinusoidal_table(config.max_frames, config.inner_dim)?
            .to_dtype(vb.dtype())?
            .to_device(vb.device())?;

        let mut blocks = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            blocks.push(TemporalTransformerBlock::new(
                config.inner_dim,
                config.num_heads,
                vb.pp(format!("blocks.{i}")),
            )?);
        }

        Ok(Self {
            config: config.clone(),
            proj_in,
            pos_embed,
            blocks,
            proj_out,
        })
    }

    pub fn config(&self) -> &MotionAdapterConfig {
        &self.config
    }

    /// Apply temporal mixing: `[B, C, F, H, W] -> [B, C, F, H, W]`,
    /// residual on the input.
    pub fn forward(&self, sample: &Tensor) -> Result<Tensor> {
        let (b, c, f, h, w) = sample.dims5()?;
        if f > self.config.max_frames {
            candle_core::bail!(
                "sequence of {f} frames exceeds the adapter's maximum of {}",
                self.config.max_frames
            );
        }

        // Each spatial location becomes a batch entry with a frame sequence:
        // [B, C, F, H, W] -> [B*H*W, F, C]
        let x = sample
            .permute((0, 3, 4, 2, 1))?
            .contiguous()?
            .reshape((b * h * w, f, c))?;

        let mut x = self.proj_in.forward(&x)?;
        let pos = self.pos_embed.narrow(0, 0, f)?.unsqueeze(0)?;
        x = x.broadcast_add(&pos)?;

        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        let x = self.proj_out.forward(&x)?;

        let x = x
            .reshape((b, h, w, f, c))?
            .permute((0, 4, 3, 1, 2))?
            .contiguous()?;
        sample.broadcast_add(&x)
    }
}

/// Fixed sinusoidal frame-position table `[max_frames, dim]`.
fn sinusoidal_table(max_frames: usize, dim: usize) -> Result<Tensor> {
    let half = dim / 2;
    let mut data = Vec::with_capacity(max_frames * dim);
    for pos in 0..max_frames {
        for i in 0..half {
            let freq = (pos as f64) / 10000f64.powf(i as f64 / half as f64);
            data.push(freq.sin() as f32);
        }
        for i in 0..dim - half {
            let freq = (pos as f64) / 10000f64.powf(i as f64 / half as f64);
            data.push(freq.cos() as f32);
        }
    }
    Tensor::from_vec(data, (max_frames, dim), &candle_core::Device::Cpu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn tiny_config() -> MotionAdapterConfig {
        MotionAdapterConfig {
            in_channels: 4,
            inner_dim: 16,
            num_heads: 4,
            num_layers: 1,
            max_frames: 8,
        }
    }

    #[test]
    fn forward_preserves_shape() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let adapter = MotionAdapter::new(vb, &tiny_config()).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 4, 6, 3, 3), &Device::Cpu).unwrap();
        let y = adapter.forward(&x).unwrap();
        assert_eq!(y.dims(), x.dims());
    }

    #[test]
    fn zero_weights_make_identity() {
        // With zero projections the residual contribution vanishes
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let adapter = MotionAdapter::new(vb, &tiny_config()).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 4, 4, 2, 2), &Device::Cpu).unwrap();
        let y = adapter.forward(&x).unwrap();

        let xv = x.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let yv = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(xv, yv);
    }

    #[test]
    fn rejects_sequences_longer_than_table() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let adapter = MotionAdapter::new(vb, &tiny_config()).unwrap();

        let x = Tensor::zeros((1, 4, 9, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(adapter.forward(&x).is_err());
    }

    #[test]
    fn uneven_head_split_rejected() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let config = MotionAdapterConfig {
            inner_dim: 10,
            num_heads: 4,
            ..tiny_config()
        };
        assert!(MotionAdapter::new(vb, &config).is_err());
    }
}
