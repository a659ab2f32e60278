//! Low-rank adaptation weights.
//!
//! A LoRA checkpoint stores pairs of down/up projection matrices plus an
//! optional alpha per layer. Merging folds `weight * (alpha / rank) * (up @
//! down)` into the matching base tensor, so the adapted model runs with zero
//! inference overhead and the original parameters stay untouched on disk.

use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LoraError {
    #[error("Failed to load LoRA weights: {path}")]
    Load {
        path: String,
        #[source]
        source: candle_core::Error,
    },

    #[error("No LoRA layer pairs found in: {path}")]
    Empty { path: String },

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// One low-rank layer: the down and up projections and their scaling.
#[derive(Debug, Clone)]
pub struct LoraLayer {
    pub down: Tensor,
    pub up: Tensor,
    pub alpha: f64,
    pub rank: usize,
}

impl LoraLayer {
    /// Delta this layer adds to its base weight at the given blend weight.
    pub fn delta(&self, blend: f64) -> candle_core::Result<Tensor> {
        let scale = (self.alpha / self.rank as f64) * blend;
        let delta = self.up.matmul(&self.down)?;
        delta * scale
    }
}

/// LoRA layers keyed by the base layer name they adapt.
#[derive(Debug)]
pub struct LoraWeights {
    layers: HashMap<String, LoraLayer>,
}

impl LoraWeights {
    /// Load a LoRA safetensors checkpoint.
    ///
    /// Both `lora_down`/`lora_up` and `lora_A`/`lora_B` naming schemes are
    /// recognized; alpha defaults to the layer rank when absent.
    pub fn load(
        path: impl AsRef<Path>,
        dtype: DType,
        device: &Device,
    ) -> Result<Self, LoraError> {
        let path = path.as_ref();
        let tensors =
            candle_core::safetensors::load(path, device).map_err(|e| LoraError::Load {
                path: path.display().to_string(),
                source: e,
            })?;

        let mut downs: HashMap<String, Tensor> = HashMap::new();
        let mut ups: HashMap<String, Tensor> = HashMap::new();
        let mut alphas: HashMap<String, f64> = HashMap::new();

        for (name, tensor) in tensors {
            let tensor = tensor.to_dtype(dtype)?;
            if name.contains(".lora_down.") || name.ends_with(".lora_A.weight") {
                downs.insert(base_layer_name(&name), tensor);
            } else if name.contains(".lora_up.") || name.ends_with(".lora_B.weight") {
                ups.insert(base_layer_name(&name), tensor);
            } else if name.ends_with(".alpha") {
                if let Ok(alpha) = tensor.to_dtype(DType::F32)?.to_scalar::<f32>() {
                    alphas.insert(base_layer_name(&name), alpha as f64);
                }
            }
        }

        let mut layers = HashMap::new();
        for (layer_name, down) in downs {
            let Some(up) = ups.remove(&layer_name) else {
                continue;
            };
            let rank = down.dim(0)?;
            let alpha = alphas.get(&layer_name).copied().unwrap_or(rank as f64);
            layers.insert(layer_name, LoraLayer { down, up, alpha, rank });
        }

        if layers.is_empty() {
            return Err(LoraError::Empty {
                path: path.display().to_string(),
            });
        }
        Ok(Self { layers })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Merge every layer's delta into the matching tensor of `base`,
    /// returning how many layers were applied. Layers without a matching base
    /// tensor are skipped.
    pub fn merge_into(
        &self,
        base: &mut HashMap<String, Tensor>,
        blend: f64,
    ) -> Result<usize, LoraError> {
        let mut applied = 0;
        for (layer_name, layer) in &self.layers {
            let weight_key = format!("{layer_name}.weight");
            let key = if base.contains_key(&weight_key) {
                weight_key
            } else if base.contains_key(layer_name) {
                layer_name.clone()
            } else {
                continue;
            };

            let delta = layer.delta(blend)?;
            let current = &base[&key];
            let delta = if delta.dims() == current.dims() {
                delta
            } else {
                // Conv weights store [out, in, 1, 1]; the LoRA product is 2D
                delta.reshape(current.dims())?
            };
            let merged = (current + delta.to_dtype(current.dtype())?)?;
            base.insert(key, merged);
            applied += 1;
        }
        Ok(applied)
    }
}

/// Strip the LoRA suffixes from a tensor name to get the base layer name.
fn base_layer_name(name: &str) -> String {
    name.replace(".lora_down.weight", "")
        .replace(".lora_up.weight", "")
        .replace(".lora_A.weight", "")
        .replace(".lora_B.weight", "")
        .replace(".alpha", "")
}
