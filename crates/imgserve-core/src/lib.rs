//! imgserve Core
//!
//! Core types and error handling shared by every imgserve component.
//!
//! This crate provides:
//! - The inference item data model (items, their routing source, terminal status)
//! - Classification results and per-item outcomes
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ClassificationResult, FailureStage, InferenceItem, ItemFailure, ItemOutcome, ItemSource,
    ItemStatus,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        ClassificationResult, InferenceItem, ItemFailure, ItemOutcome, ItemSource, ItemStatus,
    };
}
