//! The cycle loop shared by every front-end

use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::source::{InputSource, ResultSink};
use crate::watch::Notifications;
use imgserve_core::{InferenceItem, ItemSource, Result};
use imgserve_inference::BatchingEngine;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Whether the runner keeps going after the first cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Continuous,
    SinglePass,
}

/// What starts the next cycle
pub enum Trigger {
    /// Start right away; the source itself waits for input
    Immediate,

    /// Sleep between cycles
    Interval(Duration),

    /// Filesystem notifications, plus a sweep every `fallback`
    Watch {
        notifications: Notifications,
        fallback: Duration,
    },
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Interval(d) => f.debug_tuple("Interval").field(d).finish(),
            Self::Watch { fallback, .. } => {
                f.debug_struct("Watch").field("fallback", fallback).finish()
            }
        }
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub processed: u64,
    pub failed: u64,
}

impl From<MetricsSnapshot> for RunSummary {
    fn from(snapshot: MetricsSnapshot) -> Self {
        Self {
            cycles: snapshot.cycles,
            processed: snapshot.items_succeeded,
            failed: snapshot.items_failed,
        }
    }
}

/// Drives a source through the engine into a sink until done or interrupted
pub struct Runner<S, K> {
    source: S,
    sink: K,
    engine: BatchingEngine,
    mode: RunMode,
    trigger: Trigger,
    cancel: CancellationToken,
    metrics: PipelineMetrics,
}

impl<S: InputSource, K: ResultSink> Runner<S, K> {
    pub fn new(source: S, sink: K, engine: BatchingEngine, mode: RunMode, trigger: Trigger) -> Self {
        Self {
            source,
            sink,
            engine,
            mode,
            trigger,
            cancel: CancellationToken::new(),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Stop when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record into shared counters
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.clone()
    }

    /// Run cycles until the mode says stop, the source is exhausted, or an
    /// interrupt arrives. Only systemic errors end the run with `Err`.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(
            "Starting {} ({:?}, {:?}, batch size {})",
            self.source.describe(),
            self.mode,
            self.trigger,
            self.engine.batch_size()
        );

        loop {
            if self.cancel.is_cancelled() {
                info!("Interrupted, stopping");
                break;
            }

            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Interrupted while waiting for input, stopping");
                    break;
                }
                polled = self.source.poll_once() => polled,
            };
            self.metrics.record_cycle();

            match polled {
                Ok(pending) => {
                    debug!("Cycle found {} item(s)", pending.len());
                    for next in pending {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        match self.source.load(next).await {
                            Ok(Some(item)) => self.process(item).await?,
                            Ok(None) => {}
                            Err(e) if e.is_systemic() => return Err(e),
                            Err(e) => error!("Failed to load item: {}", e),
                        }
                    }
                }
                Err(e) if e.is_systemic() => return Err(e),
                Err(e) => error!("Cycle failed for {}: {}", self.source.describe(), e),
            }

            if self.source.is_exhausted() {
                info!("{} is exhausted", self.source.describe());
                break;
            }
            if self.mode == RunMode::SinglePass {
                break;
            }
            if !self.wait_for_next_cycle().await {
                info!("Interrupted, stopping");
                break;
            }
        }

        let summary = RunSummary::from(self.metrics.snapshot());
        info!(
            "Stopped after {} cycle(s): {} processed, {} failed",
            summary.cycles, summary.processed, summary.failed
        );
        Ok(summary)
    }

    async fn process(&mut self, item: InferenceItem) -> Result<()> {
        let start = Instant::now();
        let source: ItemSource = item.source.clone();

        let outcomes = self.engine.infer(vec![item]).await?;
        let latency_us = start.elapsed().as_micros() as u64;

        for outcome in outcomes {
            match &outcome.result {
                Ok(result) => {
                    self.metrics.record_success(latency_us);
                    if let Some((label, score)) = result.best() {
                        debug!("{}: {} ({:.4})", source, label, score);
                    }
                    if let Err(e) = self.sink.emit(&outcome).await {
                        self.metrics.record_delivery_failure();
                        error!("{}: failed to deliver result: {}", source, e);
                    }
                }
                Err(failure) => {
                    self.metrics.record_failure(latency_us);
                    error!("{}: {}", source, failure);
                    if let Err(e) = self.sink.on_failure(&outcome).await {
                        error!("{}: failed to clean up after failure: {}", source, e);
                    }
                }
            }
        }

        Ok(())
    }

    /// `false` if interrupted while waiting
    async fn wait_for_next_cycle(&mut self) -> bool {
        let mut watcher_closed = false;

        let proceed = match &mut self.trigger {
            Trigger::Immediate => !self.cancel.is_cancelled(),
            Trigger::Interval(wait) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => false,
                    _ = tokio::time::sleep(*wait) => true,
                }
            }
            Trigger::Watch {
                notifications,
                fallback,
            } => {
                tokio::select! {
                    _ = self.cancel.cancelled() => false,
                    notified = notifications.recv() => {
                        watcher_closed = notified.is_none();
                        true
                    }
                    _ = tokio::time::sleep(*fallback) => {
                        debug!("Fallback sweep");
                        true
                    }
                }
            }
        };

        if watcher_closed {
            if let Trigger::Watch { fallback, .. } = self.trigger {
                warn!("Filesystem watcher stopped, sweeping every {:?}", fallback);
                self.trigger = Trigger::Interval(fallback);
            }
        }

        proceed
    }
}
