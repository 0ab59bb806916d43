//! Front-end seams: where items come from and where outcomes go

use async_trait::async_trait;
use imgserve_core::{InferenceItem, ItemOutcome, Result};

/// Produces inference items, one cycle at a time
#[async_trait]
pub trait InputSource: Send {
    /// Handle for an item found by [`poll_once`](Self::poll_once) whose
    /// payload is loaded later
    type Pending: Send;

    /// Collect what is available for this cycle.
    ///
    /// May return an empty list. Implementations that wait for input must
    /// be cancel-safe: the runner drops this future on interrupt.
    async fn poll_once(&mut self) -> Result<Vec<Self::Pending>>;

    /// Turn a pending handle into an item, right before it is processed.
    ///
    /// `Ok(None)` skips the handle for this cycle.
    async fn load(&mut self, pending: Self::Pending) -> Result<Option<InferenceItem>>;

    /// No further items will ever arrive
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Delivers outcomes and performs post-item actions
#[async_trait]
pub trait ResultSink: Send {
    /// Deliver a successful outcome
    async fn emit(&mut self, outcome: &ItemOutcome) -> Result<()>;

    /// Handle a failed outcome
    async fn on_failure(&mut self, outcome: &ItemOutcome) -> Result<()>;
}
