//! imgserve Pipeline
//!
//! Delivery front-ends that feed the batching engine:
//!
//! - **Poll mode**: image files in a directory, results as `<stem>.json` files
//! - **Event mode**: image payloads over pub/sub, results published as JSON
//!
//! Both implement [`InputSource`] and [`ResultSink`] and are driven by the
//! same [`Runner`], which owns the engine and observes interrupts between
//! items.

pub mod completeness;
pub mod event;
pub mod metrics;
pub mod poll;
pub mod redis_transport;
pub mod runner;
pub mod source;
pub mod watch;

pub use completeness::{CompletenessCheck, TrailerCheck};
pub use event::{
    ChannelPublisher, ChannelSubscriber, EventConfig, EventSource, PublishSink, Publisher,
    Subscriber,
};
pub use crate::metrics::{MetricsSnapshot, PipelineMetrics};
pub use poll::{DirectorySource, FileSink, PollConfig, SUPPORTED_EXTENSIONS};
pub use redis_transport::{RedisConfig, RedisPublisher, RedisSubscriber};
pub use runner::{RunMode, RunSummary, Runner, Trigger};
pub use source::{InputSource, ResultSink};
pub use watch::Notifications;

/// Re-export for cancelling a running pipeline
pub use tokio_util::sync::CancellationToken;
