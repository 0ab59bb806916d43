//! Batching inference engine
//!
//! Items are preprocessed one by one and accumulated into batches of at most
//! `batch_size`. Each full batch, and the remainder at the end of the input,
//! costs exactly one model call. Outputs are demultiplexed positionally back
//! to the original item indices.

use crate::config::InferenceSettings;
use crate::model::{ImageModel, DEFAULT_PRIMARY_KEY};
use crate::model_loader::load_model;
use crate::postprocess::{LabelMap, Postprocessor};
use crate::preprocess::Preprocessor;
use candle_core::Tensor;
use imgserve_core::{
    ClassificationResult, Error, FailureStage, InferenceItem, ItemFailure, ItemOutcome,
    ItemSource, Result,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum items per model call
    pub batch_size: usize,

    /// Named sub-output preferred when unwrapping model output
    pub primary_output_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            primary_output_key: DEFAULT_PRIMARY_KEY.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Items waiting for the next model call
struct Batch {
    tensors: Vec<Tensor>,
    members: Vec<(usize, ItemSource)>,
}

impl Batch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            tensors: Vec::with_capacity(capacity),
            members: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, index: usize, source: ItemSource, tensor: Tensor) {
        self.tensors.push(tensor);
        self.members.push((index, source));
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn take(&mut self) -> (Vec<Tensor>, Vec<(usize, ItemSource)>) {
        (
            std::mem::take(&mut self.tensors),
            std::mem::take(&mut self.members),
        )
    }
}

/// Groups items into model calls and isolates per-item failures
pub struct BatchingEngine {
    model: Arc<dyn ImageModel>,
    preprocessor: Preprocessor,
    postprocessor: Postprocessor,
    config: EngineConfig,
}

impl BatchingEngine {
    pub fn new(
        model: Arc<dyn ImageModel>,
        preprocessor: Preprocessor,
        postprocessor: Postprocessor,
        config: EngineConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }

        Ok(Self {
            model,
            preprocessor,
            postprocessor,
            config,
        })
    }

    /// Build transforms and label vocabulary from settings around an existing model
    pub fn from_settings(settings: &InferenceSettings, model: Arc<dyn ImageModel>) -> Result<Self> {
        let preprocessor = Preprocessor::from_specs(&settings.infer.transforms)?;

        let labels = settings
            .infer
            .post_process
            .class_id_map_file
            .as_ref()
            .map(LabelMap::from_file)
            .transpose()?;
        if let Some(labels) = &labels {
            info!("Loaded label vocabulary with {} classes", labels.len());
        }

        let config = EngineConfig {
            batch_size: settings.infer.batch_size,
            primary_output_key: settings.infer.primary_output_key.clone(),
        };

        Self::new(model, preprocessor, Postprocessor::new(labels), config)
    }

    /// Load the configured model and build the engine around it
    pub fn load(settings: &InferenceSettings) -> Result<Self> {
        let source = settings
            .model_source()?
            .ok_or_else(|| Error::config("Global.pretrained_model is not set"))?;
        let model = load_model(&source, settings.device_type()?)?;
        Self::from_settings(settings, Arc::new(model))
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Classify `items`, returning one outcome per item in input order.
    ///
    /// Item-level and batch-level failures become failed outcomes; only
    /// systemic errors are returned as `Err`.
    pub async fn infer(&self, items: Vec<InferenceItem>) -> Result<Vec<ItemOutcome>> {
        let mut slots: Vec<Option<ItemOutcome>> = Vec::with_capacity(items.len());
        slots.resize_with(items.len(), || None);

        let mut batch = Batch::with_capacity(self.config.batch_size);

        for (index, item) in items.into_iter().enumerate() {
            let InferenceItem {
                payload, source, ..
            } = item;

            match self.preprocessor.run(payload) {
                Ok(tensor) => batch.push(index, source, tensor),
                Err(e) => {
                    let failure = ItemFailure::new(
                        FailureStage::Preprocess,
                        format!("image #{}: {}", index, e),
                    );
                    warn!("{} ({})", failure, source);
                    metrics::counter!("imgserve_items_total", "outcome" => "failed").increment(1);
                    slots[index] = Some(ItemOutcome::failed(index, source, failure));
                }
            }

            if batch.len() >= self.config.batch_size {
                self.flush(&mut batch, &mut slots).await?;
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &mut slots).await?;
        }

        Ok(slots.into_iter().flatten().collect())
    }

    async fn flush(&self, batch: &mut Batch, slots: &mut [Option<ItemOutcome>]) -> Result<()> {
        let (tensors, members) = batch.take();
        debug!("Flushing batch of {} item(s)", members.len());

        match self.run_batch(tensors).await {
            Ok(results) => {
                metrics::counter!("imgserve_items_total", "outcome" => "succeeded")
                    .increment(results.len() as u64);
                for ((index, source), result) in members.into_iter().zip(results) {
                    slots[index] = Some(ItemOutcome::succeeded(index, source, result));
                }
                Ok(())
            }
            Err(e) if e.is_systemic() => Err(e),
            Err(e) => {
                let stage = match &e {
                    Error::Postprocess(_) => FailureStage::Postprocess,
                    _ => FailureStage::Inference,
                };
                metrics::counter!("imgserve_items_total", "outcome" => "failed")
                    .increment(members.len() as u64);
                for (index, source) in members {
                    let failure = ItemFailure::new(stage, format!("image #{}: {}", index, e));
                    warn!("{} ({})", failure, source);
                    slots[index] = Some(ItemOutcome::failed(index, source, failure));
                }
                Ok(())
            }
        }
    }

    async fn run_batch(&self, tensors: Vec<Tensor>) -> Result<Vec<ClassificationResult>> {
        let expected = tensors.len();
        let stacked = Tensor::stack(&tensors, 0)
            .map_err(|e| Error::inference(format!("failed to stack batch: {}", e)))?;

        let start = Instant::now();
        let output = self.model.forward(stacked).await?;
        metrics::histogram!("imgserve_model_latency_us")
            .record(start.elapsed().as_micros() as f64);
        metrics::counter!("imgserve_batches_total").increment(1);

        let raw = output.unwrap_batch(&self.config.primary_output_key)?;
        let results = self.postprocessor.process(&raw)?;

        if results.len() != expected {
            return Err(Error::postprocess(format!(
                "model returned {} result(s) for a batch of {}",
                results.len(),
                expected
            )));
        }

        Ok(results)
    }
}
