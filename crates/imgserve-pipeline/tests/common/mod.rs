//! Engine and image fixtures shared by the pipeline integration tests

#![allow(dead_code)]

use candle_core::{Device, Tensor};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgserve_inference::config::{ScaleSpec, SizeSpec};
use imgserve_inference::preprocess::{DecodeImage, NormalizeImage, ResizeImage, ToCHWImage};
use imgserve_inference::{
    BatchingEngine, EngineConfig, LabelMap, LinearHeadModel, Postprocessor, Preprocessor,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SIDE: usize = 4;

/// A real Candle linear head that tells bright images from dark ones
pub fn brightness_engine() -> BatchingEngine {
    let features = 3 * SIDE * SIDE;
    let row = 1.0 / features as f32;
    let mut weights = vec![row; features];
    weights.extend(vec![-row; features]);
    let weight = Tensor::from_vec(weights, (2, features), &Device::Cpu).unwrap();
    let model = LinearHeadModel::from_tensors("brightness", weight, None, Device::Cpu).unwrap();

    let preprocessor = Preprocessor::new(vec![
        Box::new(DecodeImage { to_rgb: true }),
        Box::new(ResizeImage {
            resize_short: None,
            size: Some(SizeSpec::Square(SIDE as u32)),
        }),
        Box::new(NormalizeImage {
            scale: ScaleSpec::Number(1.0 / 255.0),
            mean: vec![0.0; 3],
            std: vec![1.0; 3],
            order: String::new(),
        }),
        Box::new(ToCHWImage::default()),
    ]);

    BatchingEngine::new(
        Arc::new(model),
        preprocessor,
        Postprocessor::with_labels(LabelMap::from_labels(["bright", "dark"])),
        EngineConfig::default(),
    )
    .unwrap()
}

pub fn encode(level: u8, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_pixel(8, 8, Rgb([level; 3]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

pub fn white_png() -> Vec<u8> {
    encode(255, ImageFormat::Png)
}

pub fn black_jpeg() -> Vec<u8> {
    encode(0, ImageFormat::Jpeg)
}

/// A PNG cut short, as if still being copied in
pub fn truncated_png() -> Vec<u8> {
    let mut bytes = white_png();
    bytes.truncate(bytes.len() / 2);
    bytes
}

/// Sorted file names in `dir`
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
