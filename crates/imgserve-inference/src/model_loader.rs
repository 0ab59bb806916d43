//! Model loading for the Candle-based linear classification head

use crate::model::{ImageModel, ModelOutput};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module};
use imgserve_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// CPU inference (always available)
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize), // GPU index
    /// Metal (Apple Silicon)
    Metal(usize),
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let (kind, index) = match lower.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| Error::config(format!("invalid device index: {}", s)))?;
                (kind, index)
            }
            None => (lower.as_str(), 0),
        };

        match kind {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Cuda(index)),
            "metal" | "mps" => Ok(Self::Metal(index)),
            _ => Err(Error::config(format!("unsupported device: {}", s))),
        }
    }
}

impl DeviceType {
    /// Create Candle device from device type
    pub fn create_device(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(idx) => Device::new_cuda(idx).map_err(|e| {
                Error::model_unavailable(format!("Failed to create CUDA device: {}", e))
            }),
            Self::Metal(idx) => Device::new_metal(idx).map_err(|e| {
                Error::model_unavailable(format!("Failed to create Metal device: {}", e))
            }),
        }
    }
}

/// Source location for model weights
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// Load from local file system
    LocalPath(PathBuf),

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
        filename: String,
    },
}

impl FromStr for ModelSource {
    type Err = Error;

    /// `hf://owner/repo[@revision]/path/to/file` or a local path
    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix("hf://") else {
            return Ok(Self::LocalPath(PathBuf::from(s)));
        };

        let invalid = || {
            Error::config(format!(
                "expected hf://owner/repo[@revision]/file, got: {}",
                s
            ))
        };

        let mut parts = rest.splitn(3, '/');
        let owner = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let repo = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let filename = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;

        let (repo, revision) = match repo.split_once('@') {
            Some((repo, revision)) => (repo, Some(revision.to_string())),
            None => (repo, None),
        };

        Ok(Self::HuggingFace {
            repo_id: format!("{}/{}", owner, repo),
            revision,
            filename: filename.to_string(),
        })
    }
}

impl ModelSource {
    /// Resolve model path from source
    pub fn resolve(&self) -> Result<PathBuf> {
        match self {
            Self::LocalPath(path) => {
                if !path.is_file() {
                    return Err(Error::config(format!(
                        "Model file not found: {}",
                        path.display()
                    )));
                }
                Ok(path.clone())
            }
            Self::HuggingFace {
                repo_id,
                revision,
                filename,
            } => download_from_hub(repo_id, revision.as_deref(), filename),
        }
    }
}

#[cfg(feature = "hf-hub")]
fn download_from_hub(repo_id: &str, revision: Option<&str>, filename: &str) -> Result<PathBuf> {
    use hf_hub::{api::sync::Api, Repo, RepoType};

    info!(
        "Downloading model from Hugging Face: {} @ {}",
        repo_id,
        revision.unwrap_or("main")
    );

    let api = Api::new()
        .map_err(|e| Error::config(format!("Failed to initialize HF API: {}", e)))?;

    let repo = api.repo(Repo::with_revision(
        repo_id.to_string(),
        RepoType::Model,
        revision.unwrap_or("main").to_string(),
    ));

    repo.get(filename)
        .map_err(|e| Error::config(format!("Failed to download model from HF: {}", e)))
}

#[cfg(not(feature = "hf-hub"))]
fn download_from_hub(repo_id: &str, _revision: Option<&str>, _filename: &str) -> Result<PathBuf> {
    Err(Error::config(format!(
        "downloading {} requires the 'hf-hub' feature",
        repo_id
    )))
}

/// Linear classification head over the flattened preprocessed image.
///
/// Weights come from a safetensors file holding `head.weight`
/// (`[classes, features]`) and optionally `head.bias` (`[classes]`).
/// The output is a softmax over classes.
pub struct LinearHeadModel {
    name: String,
    head: Linear,
    features: usize,
    classes: usize,
    device: Device,
}

impl LinearHeadModel {
    /// Load weights from a safetensors file onto `device`
    pub fn load(path: impl AsRef<Path>, device: DeviceType) -> Result<Self> {
        let path = path.as_ref();
        let device = device.create_device()?;

        let mut tensors = candle_core::safetensors::load(path, &device).map_err(|e| {
            Error::model_unavailable(format!("Failed to load {}: {}", path.display(), e))
        })?;

        let weight = tensors
            .remove("head.weight")
            .ok_or_else(|| Error::model_unavailable("weights file has no 'head.weight' tensor"))?;
        let bias = tensors.remove("head.bias");

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        Self::from_tensors(name, weight, bias, device)
    }

    /// Build from in-memory tensors
    pub fn from_tensors(
        name: impl Into<String>,
        weight: Tensor,
        bias: Option<Tensor>,
        device: Device,
    ) -> Result<Self> {
        let (classes, features) = weight.dims2().map_err(|e| {
            Error::model_unavailable(format!("head.weight must be [classes, features]: {}", e))
        })?;
        if let Some(bias) = &bias {
            if bias.dims() != [classes] {
                return Err(Error::model_unavailable(format!(
                    "head.bias has shape {:?}, expected [{}]",
                    bias.dims(),
                    classes
                )));
            }
        }

        let to_f32 = |t: Tensor| {
            t.to_dtype(DType::F32)
                .map_err(|e| Error::model_unavailable(format!("Failed to convert weights: {}", e)))
        };
        let weight = to_f32(weight)?;
        let bias = bias.map(to_f32).transpose()?;

        Ok(Self {
            name: name.into(),
            head: Linear::new(weight, bias),
            features,
            classes,
            device,
        })
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn features(&self) -> usize {
        self.features
    }

    fn run(&self, batch: &Tensor) -> candle_core::Result<Tensor> {
        let flat = batch
            .to_device(&self.device)?
            .to_dtype(DType::F32)?
            .flatten_from(1)?;
        let logits = self.head.forward(&flat)?;
        candle_nn::ops::softmax_last_dim(&logits)
    }
}

#[async_trait]
impl ImageModel for LinearHeadModel {
    async fn forward(&self, batch: Tensor) -> Result<ModelOutput> {
        let features: usize = batch.dims().iter().skip(1).product();
        if features != self.features {
            return Err(Error::inference(format!(
                "model expects {} features per image, batch has shape {:?}",
                self.features,
                batch.dims()
            )));
        }

        let probs = self
            .run(&batch)
            .map_err(|e| Error::inference(format!("forward pass failed: {}", e)))?;
        Ok(ModelOutput::Tensor(probs))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resolve and load the configured model
pub fn load_model(source: &ModelSource, device: DeviceType) -> Result<LinearHeadModel> {
    let path = source.resolve()?;
    info!("Loading model from {} on {:?}", path.display(), device);

    let model = LinearHeadModel::load(&path, device)?;
    info!(
        "Loaded model '{}' ({} features, {} classes)",
        model.name(),
        model.features(),
        model.classes()
    );
    Ok(model)
}
