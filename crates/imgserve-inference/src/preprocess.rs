//! Image preprocessing: ordered transforms from raw bytes to a model-ready tensor
//!
//! Each transform consumes the value produced by the previous one. The
//! sequence starts from the encoded bytes and must finish with an array.

use crate::config::{ScaleSpec, SizeSpec, TransformSpec};
use bytes::Bytes;
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use imgserve_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Intermediate value flowing between transforms
#[derive(Debug, Clone)]
pub enum ImageData {
    /// Encoded image file bytes
    Encoded(Bytes),

    /// Decoded 8-bit, 3-channel image
    Decoded(RgbImage),

    /// Float array, HWC until `ToCHWImage` runs
    Array(Tensor),
}

impl ImageData {
    fn kind(&self) -> &'static str {
        match self {
            Self::Encoded(_) => "encoded bytes",
            Self::Decoded(_) => "decoded image",
            Self::Array(_) => "array",
        }
    }
}

/// A single preprocessing step
pub trait Transform: Send + Sync {
    /// Name as it appears in configuration
    fn name(&self) -> &'static str;

    /// Apply the step
    fn apply(&self, input: ImageData) -> Result<ImageData>;
}

fn unexpected(transform: &str, input: &ImageData) -> Error {
    Error::preprocess(format!("{} cannot be applied to {}", transform, input.kind()))
}

fn tensor_err(context: &str) -> impl Fn(candle_core::Error) -> Error + '_ {
    move |e| Error::preprocess(format!("{}: {}", context, e))
}

/// Decode image bytes (jpg, png, bmp)
#[derive(Debug, Clone, Deserialize)]
pub struct DecodeImage {
    /// Keep RGB channel order; `false` yields BGR
    #[serde(default = "default_true")]
    pub to_rgb: bool,
}

impl Transform for DecodeImage {
    fn name(&self) -> &'static str {
        "DecodeImage"
    }

    fn apply(&self, input: ImageData) -> Result<ImageData> {
        let ImageData::Encoded(bytes) = input else {
            return Err(unexpected(self.name(), &input));
        };

        let mut image = image::load_from_memory(&bytes)
            .map_err(|e| Error::preprocess(format!("failed to decode image: {}", e)))?
            .to_rgb8();

        if !self.to_rgb {
            for pixel in image.pixels_mut() {
                pixel.0.swap(0, 2);
            }
        }

        Ok(ImageData::Decoded(image))
    }
}

/// Resize either the short side (keeping aspect ratio) or to a fixed size
#[derive(Debug, Clone, Deserialize)]
pub struct ResizeImage {
    pub resize_short: Option<u32>,
    pub size: Option<SizeSpec>,
}

impl ResizeImage {
    fn target(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        match (self.resize_short, &self.size) {
            (Some(short), _) => {
                let scale = short as f64 / width.min(height) as f64;
                let w = ((width as f64 * scale).round() as u32).max(1);
                let h = ((height as f64 * scale).round() as u32).max(1);
                Ok((w, h))
            }
            (None, Some(size)) => Ok(size.dims()),
            (None, None) => Err(Error::config(
                "ResizeImage requires either 'resize_short' or 'size'",
            )),
        }
    }
}

impl Transform for ResizeImage {
    fn name(&self) -> &'static str {
        "ResizeImage"
    }

    fn apply(&self, input: ImageData) -> Result<ImageData> {
        let ImageData::Decoded(image) = input else {
            return Err(unexpected(self.name(), &input));
        };

        let (w, h) = self.target(image.width(), image.height())?;
        if (w, h) == image.dimensions() {
            return Ok(ImageData::Decoded(image));
        }

        Ok(ImageData::Decoded(imageops::resize(
            &image,
            w,
            h,
            FilterType::Triangle,
        )))
    }
}

/// Centre crop
#[derive(Debug, Clone, Deserialize)]
pub struct CropImage {
    pub size: SizeSpec,
}

impl Transform for CropImage {
    fn name(&self) -> &'static str {
        "CropImage"
    }

    fn apply(&self, input: ImageData) -> Result<ImageData> {
        let ImageData::Decoded(image) = input else {
            return Err(unexpected(self.name(), &input));
        };

        let (cw, ch) = self.size.dims();
        let (w, h) = image.dimensions();
        if w < cw || h < ch {
            return Err(Error::preprocess(format!(
                "cannot crop {}x{} out of a {}x{} image",
                cw, ch, w, h
            )));
        }

        let x = (w - cw) / 2;
        let y = (h - ch) / 2;
        Ok(ImageData::Decoded(
            imageops::crop_imm(&image, x, y, cw, ch).to_image(),
        ))
    }
}

/// Scale and standardise pixels into an `f32` array
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeImage {
    #[serde(default)]
    pub scale: ScaleSpec,
    #[serde(default = "default_mean")]
    pub mean: Vec<f32>,
    #[serde(default = "default_std")]
    pub std: Vec<f32>,
    /// `chw` emits channel-first directly; anything else keeps HWC
    #[serde(default)]
    pub order: String,
}

impl NormalizeImage {
    fn validate(self) -> Result<Self> {
        if self.mean.len() != 3 || self.std.len() != 3 {
            return Err(Error::config(format!(
                "NormalizeImage expects 3 mean and 3 std values, got {} and {}",
                self.mean.len(),
                self.std.len()
            )));
        }
        if self.std.iter().any(|s| *s == 0.0) {
            return Err(Error::config("NormalizeImage std values must be non-zero"));
        }
        self.scale.value()?;
        Ok(self)
    }
}

impl Transform for NormalizeImage {
    fn name(&self) -> &'static str {
        "NormalizeImage"
    }

    fn apply(&self, input: ImageData) -> Result<ImageData> {
        let ImageData::Decoded(image) = input else {
            return Err(unexpected(self.name(), &input));
        };

        let scale = self.scale.value()?;
        let (w, h) = image.dimensions();
        let data: Vec<f32> = image
            .as_raw()
            .iter()
            .enumerate()
            .map(|(i, px)| {
                let c = i % 3;
                (*px as f32 * scale - self.mean[c]) / self.std[c]
            })
            .collect();

        let mut array = Tensor::from_vec(data, (h as usize, w as usize, 3), &Device::Cpu)
            .map_err(tensor_err("failed to build image array"))?;
        if self.order.eq_ignore_ascii_case("chw") {
            array = array
                .permute((2, 0, 1))
                .and_then(|t| t.contiguous())
                .map_err(tensor_err("failed to transpose image array"))?;
        }

        Ok(ImageData::Array(array))
    }
}

/// HWC → CHW
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToCHWImage {}

impl Transform for ToCHWImage {
    fn name(&self) -> &'static str {
        "ToCHWImage"
    }

    fn apply(&self, input: ImageData) -> Result<ImageData> {
        let ImageData::Array(array) = input else {
            return Err(unexpected(self.name(), &input));
        };
        if array.rank() != 3 {
            return Err(Error::preprocess(format!(
                "ToCHWImage expects a rank 3 array, got shape {:?}",
                array.dims()
            )));
        }

        let chw = array
            .permute((2, 0, 1))
            .and_then(|t| t.contiguous())
            .map_err(tensor_err("failed to transpose image array"))?;
        Ok(ImageData::Array(chw))
    }
}

/// Ordered transform sequence
pub struct Preprocessor {
    transforms: Vec<Box<dyn Transform>>,
}

impl Preprocessor {
    /// Create a preprocessor from transforms, applied in the given order
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    /// Build transforms from configuration entries
    pub fn from_specs(specs: &[TransformSpec]) -> Result<Self> {
        let transforms = specs
            .iter()
            .map(build_transform)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(transforms))
    }

    /// Names of the configured transforms, in order
    pub fn transform_names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Run all transforms over one encoded image
    pub fn run(&self, payload: Bytes) -> Result<Tensor> {
        let mut data = ImageData::Encoded(payload);
        for transform in &self.transforms {
            data = transform.apply(data)?;
        }

        match data {
            ImageData::Array(tensor) => Ok(tensor),
            other => Err(Error::preprocess(format!(
                "preprocessing finished with {} instead of an array",
                other.kind()
            ))),
        }
    }
}

fn params<T: DeserializeOwned>(spec: &TransformSpec) -> Result<T> {
    let value = if spec.params.is_null() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        spec.params.clone()
    };
    serde_yaml::from_value(value)
        .map_err(|e| Error::config(format!("invalid parameters for {}: {}", spec.name, e)))
}

fn build_transform(spec: &TransformSpec) -> Result<Box<dyn Transform>> {
    let transform: Box<dyn Transform> = match spec.name.as_str() {
        "DecodeImage" => Box::new(params::<DecodeImage>(spec)?),
        "ResizeImage" => {
            let resize = params::<ResizeImage>(spec)?;
            resize.target(1, 1)?;
            Box::new(resize)
        }
        "CropImage" => Box::new(params::<CropImage>(spec)?),
        "NormalizeImage" => Box::new(params::<NormalizeImage>(spec)?.validate()?),
        "ToCHWImage" => Box::new(params::<ToCHWImage>(spec)?),
        other => {
            return Err(Error::config(format!("unknown transform: {}", other)));
        }
    };
    Ok(transform)
}

fn default_true() -> bool {
    true
}

fn default_mean() -> Vec<f32> {
    vec![0.485, 0.456, 0.406]
}

fn default_std() -> Vec<f32> {
    vec![0.229, 0.224, 0.225]
}
