//! imgserve Inference
//!
//! Turns raw image bytes into labelled classification results.
//!
//! The flow for a call to [`BatchingEngine::infer`]:
//! - Preprocessing: configured transforms decode and normalise each image
//! - Batching: preprocessed arrays are grouped up to `batch_size` per model call
//! - Model: any [`ImageModel`]; [`LinearHeadModel`] is the Candle-backed default
//! - Postprocessing: output rows are mapped onto the label vocabulary
//!
//! Failures are isolated per item (preprocessing) or per batch (model and
//! postprocessing). Only systemic errors abort a call.

pub mod config;
pub mod engine;
pub mod model;
pub mod model_loader;
pub mod overrides;
pub mod postprocess;
pub mod preprocess;

pub use config::{InferenceSettings, ScaleSpec, SizeSpec, TransformSpec};
pub use engine::{BatchingEngine, EngineConfig};
pub use model::{ImageModel, ModelOutput, DEFAULT_PRIMARY_KEY};
pub use model_loader::{load_model, DeviceType, LinearHeadModel, ModelSource};
pub use overrides::{ensure_transform, remove_value, set_value, Override};
pub use postprocess::{LabelMap, Postprocessor};
pub use preprocess::{ImageData, Preprocessor, Transform};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{BatchingEngine, EngineConfig};
    pub use crate::model::{ImageModel, ModelOutput};
    pub use crate::postprocess::{LabelMap, Postprocessor};
    pub use crate::preprocess::Preprocessor;
}
