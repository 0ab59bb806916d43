//! Core types for imgserve

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Where an inference item came from, used to route its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// An image file discovered by the poll-mode pipeline
    File(PathBuf),

    /// A message received on a pub/sub channel
    Message {
        /// Channel the payload arrived on
        channel: String,
        /// Handle assigned on receipt
        id: Uuid,
    },
}

impl ItemSource {
    /// Create a message source with a fresh handle
    pub fn message(channel: impl Into<String>) -> Self {
        Self::Message {
            channel: channel.into(),
            id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Message { channel, id } => write!(f, "{}#{}", channel, id),
        }
    }
}

/// Terminal status of an inference item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A single unit of work
#[derive(Debug, Clone)]
pub struct InferenceItem {
    /// Raw encoded image bytes, consumed by preprocessing
    pub payload: Bytes,

    /// Routing identifier
    pub source: ItemSource,

    /// Current status
    pub status: ItemStatus,
}

impl InferenceItem {
    /// Create a pending item
    pub fn new(payload: impl Into<Bytes>, source: ItemSource) -> Self {
        Self {
            payload: payload.into(),
            source,
            status: ItemStatus::Pending,
        }
    }
}

/// Label to score mapping for exactly one item.
///
/// Scores are the model's values verbatim; nothing here renormalises or
/// thresholds them. Serialises as a flat JSON object with labels in
/// vocabulary order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationResult {
    scores: IndexMap<String, f32>,
}

impl ClassificationResult {
    /// Create an empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a result from (label, score) pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        Self {
            scores: pairs.into_iter().map(|(l, s)| (l.into(), s)).collect(),
        }
    }

    /// Set the score for a label
    pub fn insert(&mut self, label: impl Into<String>, score: f32) {
        self.scores.insert(label.into(), score);
    }

    /// Score for a label
    pub fn score(&self, label: &str) -> Option<f32> {
        self.scores.get(label).copied()
    }

    /// Label with the highest score
    pub fn best(&self) -> Option<(&str, f32)> {
        self.scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(label, score)| (label.as_str(), *score))
    }

    /// Iterate over (label, score) pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.scores.iter().map(|(l, s)| (l.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Serialize to the result JSON object
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a result JSON object
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Processing stage at which an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Preprocess,
    Inference,
    Postprocess,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preprocess => "preprocess",
            Self::Inference => "inference",
            Self::Postprocess => "postprocess",
        };
        f.write_str(name)
    }
}

/// Why an item produced no result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub stage: FailureStage,
    pub message: String,
}

impl ItemFailure {
    pub fn new(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Result or failure for one submitted item, at its original position
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// Position of the item in the submitted sequence
    pub index: usize,

    /// Routing identifier carried over from the item
    pub source: ItemSource,

    /// Classification result, or the reason there is none
    pub result: std::result::Result<ClassificationResult, ItemFailure>,
}

impl ItemOutcome {
    pub fn succeeded(index: usize, source: ItemSource, result: ClassificationResult) -> Self {
        Self {
            index,
            source,
            result: Ok(result),
        }
    }

    pub fn failed(index: usize, source: ItemSource, failure: ItemFailure) -> Self {
        Self {
            index,
            source,
            result: Err(failure),
        }
    }

    /// Terminal status of the item
    pub fn status(&self) -> ItemStatus {
        match self.result {
            Ok(_) => ItemStatus::Succeeded,
            Err(_) => ItemStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
