//! Throughput benchmarks for the batching engine
//!
//! Measures preprocessing plus a Candle linear head over 32x32 images at
//! several batch sizes.
//!
//! Run with: cargo bench -p imgserve-inference

use bytes::Bytes;
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgserve_core::{InferenceItem, ItemSource};
use imgserve_inference::config::{ScaleSpec, SizeSpec};
use imgserve_inference::preprocess::{CropImage, DecodeImage, NormalizeImage, ToCHWImage};
use imgserve_inference::{BatchingEngine, EngineConfig, LinearHeadModel, Postprocessor, Preprocessor};
use std::io::Cursor;
use std::sync::Arc;
use tokio::runtime::Runtime;

const SIDE: u32 = 32;
const CLASSES: usize = 10;

fn png(level: u8) -> Bytes {
    let image = RgbImage::from_fn(SIDE + 8, SIDE + 8, |x, y| {
        Rgb([level, (x * 4) as u8, (y * 4) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

fn build_engine(batch_size: usize) -> BatchingEngine {
    let features = (3 * SIDE * SIDE) as usize;
    let weight = Tensor::randn(0f32, 0.01, (CLASSES, features), &Device::Cpu).unwrap();
    let bias = Tensor::zeros(CLASSES, DType::F32, &Device::Cpu).unwrap();
    let model = LinearHeadModel::from_tensors("bench", weight, Some(bias), Device::Cpu).unwrap();

    let preprocessor = Preprocessor::new(vec![
        Box::new(DecodeImage { to_rgb: true }),
        Box::new(CropImage {
            size: SizeSpec::Square(SIDE),
        }),
        Box::new(NormalizeImage {
            scale: ScaleSpec::Number(1.0 / 255.0),
            mean: vec![0.485, 0.456, 0.406],
            std: vec![0.229, 0.224, 0.225],
            order: String::new(),
        }),
        Box::new(ToCHWImage::default()),
    ]);

    BatchingEngine::new(
        Arc::new(model),
        preprocessor,
        Postprocessor::default(),
        EngineConfig::default().with_batch_size(batch_size),
    )
    .unwrap()
}

/// 64 images through the engine at varying batch sizes
fn benchmark_batch_sizes(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let payloads: Vec<Bytes> = (0..64).map(|i| png(i as u8)).collect();

    let mut group = c.benchmark_group("Engine_Batch_Size");
    group.sample_size(30);

    for batch_size in [1, 8, 32] {
        let engine = build_engine(batch_size);
        group.bench_with_input(
            BenchmarkId::new("infer_64", batch_size),
            &payloads,
            |b, payloads| {
                b.iter(|| {
                    let items: Vec<InferenceItem> = payloads
                        .iter()
                        .map(|p| InferenceItem::new(p.clone(), ItemSource::message("bench")))
                        .collect();
                    rt.block_on(async { engine.infer(black_box(items)).await.unwrap() })
                });
            },
        );
    }

    group.finish();
}

/// Preprocessing alone for a single image
fn benchmark_preprocess(c: &mut Criterion) {
    let engine_input = png(128);
    let preprocessor = Preprocessor::new(vec![
        Box::new(DecodeImage { to_rgb: true }),
        Box::new(NormalizeImage {
            scale: ScaleSpec::Number(1.0 / 255.0),
            mean: vec![0.485, 0.456, 0.406],
            std: vec![0.229, 0.224, 0.225],
            order: "chw".to_string(),
        }),
    ]);

    c.bench_function("preprocess_single", |b| {
        b.iter(|| preprocessor.run(black_box(engine_input.clone())).unwrap())
    });
}

criterion_group!(benches, benchmark_batch_sizes, benchmark_preprocess);
criterion_main!(benches);
