//! Mock models and fixtures shared by the engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use candle_core::Tensor;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgserve_core::{Error, InferenceItem, ItemSource, Result};
use imgserve_inference::config::ScaleSpec;
use imgserve_inference::preprocess::{DecodeImage, NormalizeImage, ToCHWImage};
use imgserve_inference::{ImageModel, ModelOutput, Preprocessor};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Container shape the mock wraps its scores in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Bare,
    List,
    Student,
    Logits,
    Output,
    ListOfStudent,
}

/// A model whose row for each image is `[mean pixel, 1 - mean pixel]`
///
/// With [`identity_preprocessor`], an image filled with gray level `g`
/// scores exactly `g` for label `"0"`, which makes positional alignment
/// easy to check.
pub struct MockModel {
    name: String,
    wrap: Wrap,
    fail_on_call: Option<(u32, bool)>,
    drop_row: bool,
    call_count: AtomicU32,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            wrap: Wrap::Bare,
            fail_on_call: None,
            drop_row: false,
            call_count: AtomicU32::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Wrap outputs in the given container shape
    pub fn with_wrap(mut self, wrap: Wrap) -> Self {
        self.wrap = wrap;
        self
    }

    /// Fail the n-th call (1-based) with a recoverable inference error
    pub fn failing_on_call(mut self, call: u32) -> Self {
        self.fail_on_call = Some((call, false));
        self
    }

    /// Fail the n-th call (1-based) with a systemic error
    pub fn unavailable_on_call(mut self, call: u32) -> Self {
        self.fail_on_call = Some((call, true));
        self
    }

    /// Return one row fewer than the batch size
    pub fn dropping_a_row(mut self) -> Self {
        self.drop_row = true;
        self
    }

    /// Get the number of times forward was called
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Batch sizes seen by forward, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn scores(&self, batch: &Tensor) -> candle_core::Result<Tensor> {
        let mean = batch.flatten_from(1)?.mean(1)?;
        let rest = mean.affine(-1.0, 1.0)?;
        let scores = Tensor::stack(&[mean, rest], 1)?;
        if self.drop_row {
            let n = scores.dim(0)?;
            return scores.narrow(0, 0, n.saturating_sub(1));
        }
        Ok(scores)
    }
}

#[async_trait]
impl ImageModel for MockModel {
    async fn forward(&self, batch: Tensor) -> Result<ModelOutput> {
        let call = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.batch_sizes.lock().unwrap().push(batch.dim(0).unwrap());

        if let Some((failing, systemic)) = self.fail_on_call {
            if call == failing {
                return Err(if systemic {
                    Error::model_unavailable("device lost")
                } else {
                    Error::inference("simulated forward failure")
                });
            }
        }

        let scores = self
            .scores(&batch)
            .map_err(|e| Error::inference(e.to_string()))?;
        let decoy = scores.zeros_like().map_err(|e| Error::inference(e.to_string()))?;

        let output = match self.wrap {
            Wrap::Bare => ModelOutput::Tensor(scores),
            Wrap::List => ModelOutput::List(vec![ModelOutput::from(scores), ModelOutput::from(decoy)]),
            Wrap::Student => {
                ModelOutput::named([("Student", ModelOutput::from(scores)), ("Teacher", ModelOutput::from(decoy))])
            }
            Wrap::Logits => ModelOutput::named([("logits", ModelOutput::from(scores))]),
            Wrap::Output => ModelOutput::named([("output", ModelOutput::from(scores)), ("aux", ModelOutput::from(decoy))]),
            Wrap::ListOfStudent => ModelOutput::List(vec![ModelOutput::named([(
                "Student",
                ModelOutput::named([("logits", ModelOutput::from(scores))]),
            )])]),
        };
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Decode, keep raw pixel values, channel-first
pub fn identity_preprocessor() -> Preprocessor {
    Preprocessor::new(vec![
        Box::new(DecodeImage { to_rgb: true }),
        Box::new(NormalizeImage {
            scale: ScaleSpec::Number(1.0),
            mean: vec![0.0; 3],
            std: vec![1.0; 3],
            order: String::new(),
        }),
        Box::new(ToCHWImage::default()),
    ])
}

/// PNG bytes of a 2x2 image filled with one gray level
pub fn gray_png(level: u8) -> Bytes {
    let image = RgbImage::from_pixel(2, 2, Rgb([level; 3]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

/// An item whose payload is a gray image
pub fn gray_item(level: u8) -> InferenceItem {
    InferenceItem::new(
        gray_png(level),
        ItemSource::File(PathBuf::from(format!("img_{}.png", level))),
    )
}

/// An item whose payload cannot be decoded
pub fn garbage_item() -> InferenceItem {
    InferenceItem::new(
        Bytes::from_static(b"not an image"),
        ItemSource::File(PathBuf::from("broken.jpg")),
    )
}
