//! Inference configuration (PaddleClas-style YAML layout)
//!
//! ```yaml
//! Global:
//!   pretrained_model: ./output/model.safetensors
//!   device: gpu
//! Infer:
//!   batch_size: 10
//!   transforms:
//!     - DecodeImage:
//!         to_rgb: True
//!     - ResizeImage:
//!         resize_short: 256
//!     - CropImage:
//!         size: 224
//!     - NormalizeImage:
//!         scale: 1.0/255.0
//!     - ToCHWImage:
//!   PostProcess:
//!     class_id_map_file: ./labels.txt
//! ```

use crate::model::DEFAULT_PRIMARY_KEY;
use crate::model_loader::{DeviceType, ModelSource};
use crate::overrides::{set_value, Override};
use imgserve_core::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Settings for building a batching engine
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceSettings {
    #[serde(rename = "Global", default)]
    pub global: GlobalSection,

    #[serde(rename = "Infer", default)]
    pub infer: InferSection,
}

/// `Global` section
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalSection {
    /// Model artifact: local path or `hf://owner/repo[@revision]/file`
    pub pretrained_model: Option<String>,

    /// Device string (`cpu`, `gpu`, `gpu:1`, `cuda:0`, `metal`)
    #[serde(default = "default_device")]
    pub device: String,
}

impl Default for GlobalSection {
    fn default() -> Self {
        Self {
            pretrained_model: None,
            device: default_device(),
        }
    }
}

/// `Infer` section
#[derive(Debug, Clone, Deserialize)]
pub struct InferSection {
    /// Maximum items per model call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Preprocessing transforms, applied in order
    #[serde(default)]
    pub transforms: Vec<TransformSpec>,

    #[serde(rename = "PostProcess", default)]
    pub post_process: PostProcessSection,

    /// Named sub-output checked after the list wrapper
    #[serde(default = "default_primary_key")]
    pub primary_output_key: String,
}

impl Default for InferSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            transforms: Vec::new(),
            post_process: PostProcessSection::default(),
            primary_output_key: default_primary_key(),
        }
    }
}

/// `Infer.PostProcess` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostProcessSection {
    pub name: Option<String>,

    /// Label vocabulary file, one `N LABEL` pair per line
    pub class_id_map_file: Option<PathBuf>,
}

/// One configured transform: its name and raw parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    pub name: String,
    pub params: Value,
}

impl TransformSpec {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a single-key mapping (`Name: {params}`) or a bare name
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(Self::new(name.clone(), Value::Null)),
            Value::Mapping(map) if map.len() == 1 => {
                let (key, params) = map
                    .iter()
                    .next()
                    .ok_or_else(|| Error::config("empty transform entry"))?;
                let name = key
                    .as_str()
                    .ok_or_else(|| Error::config("transform name must be a string"))?;
                Ok(Self::new(name, params.clone()))
            }
            other => Err(Error::config(format!(
                "transform entries must be single-key mappings, got: {:?}",
                other
            ))),
        }
    }

    /// Parse a YAML sequence of transform entries
    pub fn list_from_value(value: &Value) -> Result<Vec<Self>> {
        match value {
            Value::Sequence(entries) => entries.iter().map(Self::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            _ => Err(Error::config("transforms must be a list")),
        }
    }
}

impl<'de> Deserialize<'de> for TransformSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Square size or `[width, height]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    Square(u32),
    Pair([u32; 2]),
}

impl SizeSpec {
    /// (width, height)
    pub fn dims(&self) -> (u32, u32) {
        match self {
            Self::Square(s) => (*s, *s),
            Self::Pair([w, h]) => (*w, *h),
        }
    }
}

/// Pixel scale factor: a number or a fraction such as `1.0/255.0`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScaleSpec {
    Number(f32),
    Expr(String),
}

impl Default for ScaleSpec {
    fn default() -> Self {
        Self::Number(1.0 / 255.0)
    }
}

impl ScaleSpec {
    pub fn value(&self) -> Result<f32> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Expr(expr) => {
                let invalid = || Error::config(format!("invalid scale: {}", expr));
                match expr.split_once('/') {
                    Some((num, den)) => {
                        let num: f32 = num.trim().parse().map_err(|_| invalid())?;
                        let den: f32 = den.trim().parse().map_err(|_| invalid())?;
                        if den == 0.0 {
                            return Err(invalid());
                        }
                        Ok(num / den)
                    }
                    None => expr.trim().parse().map_err(|_| invalid()),
                }
            }
        }
    }
}

impl InferenceSettings {
    /// Deserialize from an already patched YAML tree
    pub fn from_value(value: Value) -> Result<Self> {
        let settings: Self = serde_yaml::from_value(value)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_value(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file and apply overrides before deserializing
    pub fn load(path: impl AsRef<Path>, overrides: &[Override]) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let mut value: Value = serde_yaml::from_str(&content)?;
        for o in overrides {
            set_value(&mut value, &o.path, &o.value)?;
        }

        Self::from_value(value)
    }

    fn validate(&self) -> Result<()> {
        if self.infer.batch_size == 0 {
            return Err(Error::config("Infer.batch_size must be at least 1"));
        }
        self.device_type()?;
        Ok(())
    }

    /// Parsed device selection
    pub fn device_type(&self) -> Result<DeviceType> {
        self.global.device.parse()
    }

    /// Parsed model source, if a model is configured
    pub fn model_source(&self) -> Result<Option<ModelSource>> {
        self.global
            .pretrained_model
            .as_deref()
            .map(str::parse)
            .transpose()
    }
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}
