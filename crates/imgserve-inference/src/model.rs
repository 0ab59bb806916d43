//! Model boundary: the black-box batch classifier and the shapes its output can take

use async_trait::async_trait;
use candle_core::Tensor;
use imgserve_core::{Error, Result};
use std::collections::HashMap;

/// Key checked after the list wrapper, before `logits` and `output`
pub const DEFAULT_PRIMARY_KEY: &str = "Student";

/// Trait for all image models
#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Run the model on a stacked batch `[n, c, h, w]`
    ///
    /// Return `Error::Inference` for failures scoped to this batch and
    /// `Error::ModelUnavailable` when no further batch can succeed.
    async fn forward(&self, batch: Tensor) -> Result<ModelOutput>;

    /// Get the model name
    fn name(&self) -> &str;
}

/// Raw model output container
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// Bare `[n, classes]` array
    Tensor(Tensor),

    /// List whose first element carries the payload
    List(Vec<ModelOutput>),

    /// Named sub-outputs
    Named(HashMap<String, ModelOutput>),
}

impl ModelOutput {
    /// Build a named output from (key, output) pairs
    pub fn named<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ModelOutput)>,
        K: Into<String>,
    {
        Self::Named(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn take_key(self, key: &str) -> Self {
        match self {
            Self::Named(mut map) => match map.remove(key) {
                Some(inner) => inner,
                None => Self::Named(map),
            },
            other => other,
        }
    }

    /// Unwrap container shapes down to the batch tensor.
    ///
    /// Rules are applied once each, in order: list wrapper, then the primary
    /// key, then `logits`, then `output`. Whatever remains must be a tensor.
    pub fn unwrap_batch(self, primary_key: &str) -> Result<Tensor> {
        let mut out = match self {
            Self::List(items) => items
                .into_iter()
                .next()
                .ok_or_else(|| Error::inference("model returned an empty output list"))?,
            other => other,
        };

        for key in [primary_key, "logits", "output"] {
            out = out.take_key(key);
        }

        match out {
            Self::Tensor(tensor) => Ok(tensor),
            Self::List(_) => Err(Error::inference(
                "model output is a nested list after unwrapping",
            )),
            Self::Named(map) => {
                let mut keys: Vec<_> = map.keys().cloned().collect();
                keys.sort();
                Err(Error::inference(format!(
                    "model output has no recognised key (found: {})",
                    keys.join(", ")
                )))
            }
        }
    }
}

impl From<Tensor> for ModelOutput {
    fn from(tensor: Tensor) -> Self {
        Self::Tensor(tensor)
    }
}
