//! Typed generation configuration loaded from a YAML file.
//!
//! The configuration is parsed into concrete structures up front and validated
//! as a whole, so a broken file reports every problem at once instead of
//! failing at the first key lookup deep inside the pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One conditioning network entry: which weights to load, which animated
/// image drives it, and how strongly its residual is applied.
///
/// The order of entries is significant: the i-th network is paired with the
/// i-th decoded frame sequence and the i-th conditioning scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlNetEntry {
    /// Checkpoint path or pretrained repository id for the network weights
    pub model_path: String,
    /// Animated image (GIF) providing the per-frame conditioning signal
    pub image_path: String,
    /// Strength applied to this network's residual
    pub conditioning_scale: f64,
}

/// Where the VAE weights come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaeSource {
    /// `true`: `model_path` is one safetensors checkpoint file.
    /// `false`: `model_path` is a pretrained repository layout
    /// (`diffusion_pytorch_model.safetensors` + `config.json`).
    pub single_file: bool,
    pub model_path: String,
}

/// Latent-consistency LoRA settings. When enabled, the pipeline swaps in the
/// consistency scheduler and merges the low-rank weights into the UNet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcmLoraConfig {
    pub enable: bool,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_lora_weight")]
    pub weight: f64,
}

fn default_lora_weight() -> f64 {
    1.0
}

/// Complete generation configuration.
///
/// Read once at startup, copied verbatim into the run directory for
/// provenance, and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Motion adapter checkpoint path or repository id
    pub motion_module_path: String,
    /// Ordered conditioning network entries
    pub controlnet: Vec<ControlNetEntry>,
    pub vae: VaeSource,
    /// Base diffusion model repository layout (unet/, text_encoder/,
    /// tokenizer/, scheduler/)
    pub pretrained_model_path: String,
    pub lcm_lora: LcmLoraConfig,
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub steps: usize,
    pub guidance_scale: f64,
}

impl GenerationConfig {
    /// Parse and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field, collecting all problems before reporting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if self.motion_module_path.is_empty() {
            issues.push("motion_module_path is empty".to_string());
        }
        if self.pretrained_model_path.is_empty() {
            issues.push("pretrained_model_path is empty".to_string());
        }
        if self.vae.model_path.is_empty() {
            issues.push("vae.model_path is empty".to_string());
        }
        if self.controlnet.is_empty() {
            issues.push("controlnet list is empty; at least one entry is required".to_string());
        }
        for (i, entry) in self.controlnet.iter().enumerate() {
            if entry.model_path.is_empty() {
                issues.push(format!("controlnet[{i}].model_path is empty"));
            }
            if entry.image_path.is_empty() {
                issues.push(format!("controlnet[{i}].image_path is empty"));
            }
            if !entry.conditioning_scale.is_finite() || entry.conditioning_scale < 0.0 {
                issues.push(format!(
                    "controlnet[{i}].conditioning_scale must be finite and >= 0, got {}",
                    entry.conditioning_scale
                ));
            }
        }
        if self.lcm_lora.enable {
            match &self.lcm_lora.model_path {
                None => issues.push(
                    "lcm_lora.model_path is required when lcm_lora.enable is true".to_string(),
                ),
                Some(p) if p.is_empty() => issues.push("lcm_lora.model_path is empty".to_string()),
                _ => {}
            }
            if !self.lcm_lora.weight.is_finite() || self.lcm_lora.weight < 0.0 {
                issues.push(format!(
                    "lcm_lora.weight must be finite and >= 0, got {}",
                    self.lcm_lora.weight
                ));
            }
        }
        if self.steps == 0 {
            issues.push("steps must be at least 1".to_string());
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            issues.push(format!(
                "guidance_scale must be finite and >= 0, got {}",
                self.guidance_scale
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }

    /// Conditioning scales in configuration order.
    pub fn conditioning_scales(&self) -> Vec<f64> {
        self.controlnet.iter().map(|c| c.conditioning_scale).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration:\n{}", .issues.iter().map(|i| format!("  - {i}")).collect::<Vec<_>>().join("\n"))]
    Invalid { issues: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> GenerationConfig {
        GenerationConfig {
            motion_module_path: "mm.safetensors".to_string(),
            controlnet: vec![ControlNetEntry {
                model_path: "cn".to_string(),
                image_path: "in.gif".to_string(),
                conditioning_scale: 1.0,
            }],
            vae: VaeSource {
                single_file: true,
                model_path: "vae.safetensors".to_string(),
            },
            pretrained_model_path: "base".to_string(),
            lcm_lora: LcmLoraConfig {
                enable: false,
                model_path: None,
                weight: 1.0,
            },
            prompt: "a cat".to_string(),
            negative_prompt: String::new(),
            seed: 42,
            steps: 20,
            guidance_scale: 7.5,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn all_issues_reported_at_once() {
        let mut config = minimal_config();
        config.controlnet.clear();
        config.steps = 0;
        config.guidance_scale = f64::NAN;

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid { issues } => {
                assert_eq!(issues.len(), 3, "expected all three issues: {issues:?}");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn lcm_lora_requires_model_path() {
        let mut config = minimal_config();
        config.lcm_lora.enable = true;
        config.lcm_lora.model_path = None;
        assert!(config.validate().is_err());

        config.lcm_lora.model_path = Some("lcm.safetensors".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negative_conditioning_scale_rejected() {
        let mut config = minimal_config();
        config.controlnet[0].conditioning_scale = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn scales_preserve_entry_order() {
        let mut config = minimal_config();
        config.controlnet.push(ControlNetEntry {
            model_path: "cn2".to_string(),
            image_path: "in2.gif".to_string(),
            conditioning_scale: 0.25,
        });
        assert_eq!(config.conditioning_scales(), vec![1.0, 0.25]);
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r#"
motion_module_path: models/motion.safetensors
controlnet:
  - model_path: models/openpose
    image_path: inputs/pose.gif
    conditioning_scale: 1.0
  - model_path: models/depth
    image_path: inputs/depth.gif
    conditioning_scale: 0.5
vae:
  single_file: false
  model_path: models/vae
pretrained_model_path: models/base
lcm_lora:
  enable: false
prompt: "a dancing robot"
negative_prompt: "blurry"
seed: 42
steps: 20
guidance_scale: 7.5
"#;
        let config: GenerationConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.controlnet.len(), 2);
        assert_eq!(config.conditioning_scales(), vec![1.0, 0.5]);
        // weight defaults to 1.0 when omitted
        assert_eq!(config.lcm_lora.weight, 1.0);
    }
}
