//! Checkpoint resolution and safetensors weight loading.
//!
//! Model sources in the configuration are either filesystem paths or
//! pretrained-repository ids. Local directories follow the diffusers layout:
//! a `diffusion_pytorch_model.safetensors` (optionally sharded behind a
//! `*.safetensors.index.json`) next to a `config.json`. Remote ids resolve
//! through the Hugging Face hub cache.

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default weight file name in a diffusers-style module directory.
pub const WEIGHTS_NAME: &str = "diffusion_pytorch_model.safetensors";
/// Index file for sharded checkpoints.
pub const INDEX_NAME: &str = "diffusion_pytorch_model.safetensors.index.json";

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Failed to read file: {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON config: {path}")]
    JsonParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing shard files: {missing:?}")]
    MissingShards { missing: Vec<String> },

    #[error("No safetensors weights found in: {path}")]
    NoWeightsFound { path: String },

    #[error("Failed to resolve pretrained repository {repo}")]
    HubResolve {
        repo: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Parsed `*.safetensors.index.json` for sharded checkpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct SafetensorsIndex {
    pub weight_map: HashMap<String, String>,
}

impl SafetensorsIndex {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| LoaderError::JsonParse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Unique shard file names referenced by the weight map, sorted.
    pub fn shard_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.weight_map.values().cloned().collect();
        files.sort();
        files.dedup();
        files
    }
}

/// Loads safetensors weights onto a fixed device at a fixed dtype.
pub struct WeightLoader {
    device: Device,
    dtype: DType,
}

impl WeightLoader {
    pub fn new(device: Device, dtype: DType) -> Self {
        Self { device, dtype }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Memory-map a single safetensors checkpoint.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<VarBuilder<'_>, LoaderError> {
        let path = path.as_ref();
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[path], self.dtype, &self.device)? };
        Ok(vb)
    }

    /// Load a module directory in the diffusers layout.
    ///
    /// Resolution order: sharded index, then the canonical single file, then
    /// any `.safetensors` files found in the directory (sorted for a stable
    /// shard order).
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<VarBuilder<'_>, LoaderError> {
        let dir = dir.as_ref();

        let index_path = dir.join(INDEX_NAME);
        if index_path.exists() {
            let index = SafetensorsIndex::load(&index_path)?;
            let mut missing = Vec::new();
            let mut shards = Vec::new();
            for name in index.shard_files() {
                let shard = dir.join(&name);
                if shard.exists() {
                    shards.push(shard);
                } else {
                    missing.push(name);
                }
            }
            if !missing.is_empty() {
                return Err(LoaderError::MissingShards { missing });
            }
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&shards, self.dtype, &self.device)?
            };
            return Ok(vb);
        }

        let single = dir.join(WEIGHTS_NAME);
        if single.exists() {
            return self.load_file(&single);
        }

        let files = find_safetensors_files(dir)?;
        if files.is_empty() {
            return Err(LoaderError::NoWeightsFound {
                path: dir.display().to_string(),
            });
        }
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&files, self.dtype, &self.device)? };
        Ok(vb)
    }

    /// Load a configured model source: a checkpoint file, a module
    /// directory, or a hub repository id.
    pub fn load_source(&self, source: &str) -> Result<VarBuilder<'_>, LoaderError> {
        let resolved = resolve_source(source)?;
        if resolved.is_file() {
            self.load_file(&resolved)
        } else {
            self.load_dir(&resolved)
        }
    }
}

/// Resolve a model source string to a local path.
///
/// Existing local paths are used as-is. Anything else is treated as a hub
/// repository id and fetched into the local cache.
pub fn resolve_source(source: &str) -> Result<PathBuf, LoaderError> {
    let path = Path::new(source);
    if path.exists() {
        return Ok(path.to_path_buf());
    }

    let api = hf_hub::api::sync::Api::new().map_err(|e| LoaderError::HubResolve {
        repo: source.to_string(),
        source: e,
    })?;
    let repo = api.model(source.to_string());
    let weights = repo.get(WEIGHTS_NAME).map_err(|e| LoaderError::HubResolve {
        repo: source.to_string(),
        source: e,
    })?;
    // Sibling files (config.json, shards) live next to the fetched weights
    let parent = weights.parent().map(Path::to_path_buf);
    Ok(parent.unwrap_or(weights))
}

/// All `.safetensors` files directly inside a directory, sorted by name.
pub fn find_safetensors_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, LoaderError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| LoaderError::FileRead {
        path: dir.display().to_string(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LoaderError::FileRead {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "safetensors") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load and deserialize a JSON model configuration file.
pub fn load_model_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, LoaderError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| LoaderError::FileRead {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| LoaderError::JsonParse {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_keeps_dtype_and_device() {
        let loader = WeightLoader::new(Device::Cpu, DType::F16);
        assert_eq!(loader.dtype(), DType::F16);
        assert!(loader.device().is_cpu());
    }

    #[test]
    fn index_shard_files_deduplicated_and_sorted() {
        let mut weight_map = HashMap::new();
        weight_map.insert("a".to_string(), "shard-2.safetensors".to_string());
        weight_map.insert("b".to_string(), "shard-1.safetensors".to_string());
        weight_map.insert("c".to_string(), "shard-1.safetensors".to_string());

        let index = SafetensorsIndex { weight_map };
        assert_eq!(
            index.shard_files(),
            vec!["shard-1.safetensors".to_string(), "shard-2.safetensors".to_string()]
        );
    }

    #[test]
    fn missing_shards_reported() {
        let dir = tempfile::tempdir().unwrap();
        let index = serde_json::json!({
            "weight_map": { "w": "shard-1.safetensors" }
        });
        std::fs::write(dir.path().join(INDEX_NAME), index.to_string()).unwrap();

        let loader = WeightLoader::new(Device::Cpu, DType::F32);
        match loader.load_dir(dir.path()) {
            Err(LoaderError::MissingShards { missing }) => {
                assert_eq!(missing, vec!["shard-1.safetensors".to_string()]);
            }
            other => panic!("expected MissingShards, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_dir_has_no_weights() {
        let dir = tempfile::tempdir().unwrap();
        let loader = WeightLoader::new(Device::Cpu, DType::F32);
        assert!(matches!(
            loader.load_dir(dir.path()),
            Err(LoaderError::NoWeightsFound { .. })
        ));
    }

    #[test]
    fn local_paths_resolve_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_source(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(resolved, dir.path());
    }
}
