//! Event mode: classify image payloads received over pub/sub
//!
//! Every inbound message is one image. Its result is published as a JSON
//! label → score object on the outbound channel. Messages that fail are
//! logged and dropped; nothing is redelivered.

use crate::runner::{RunMode, Runner, Trigger};
use crate::source::{InputSource, ResultSink};
use async_trait::async_trait;
use bytes::Bytes;
use imgserve_core::{Error, InferenceItem, ItemOutcome, ItemSource, Result};
use imgserve_inference::BatchingEngine;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Channel names for event mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    pub channel_in: String,
    pub channel_out: String,
}

impl EventConfig {
    pub fn new(channel_in: impl Into<String>, channel_out: impl Into<String>) -> Self {
        Self {
            channel_in: channel_in.into(),
            channel_out: channel_out.into(),
        }
    }
}

/// Inbound side of a pub/sub transport
#[async_trait]
pub trait Subscriber: Send {
    /// Wait for the next payload; `None` once the subscription has closed.
    ///
    /// Must be cancel-safe.
    async fn next_message(&mut self) -> Result<Option<Bytes>>;
}

/// Outbound side of a pub/sub transport
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;
}

/// Turns each inbound message into one item
pub struct EventSource<S> {
    subscriber: S,
    channel: String,
    closed: bool,
}

impl<S: Subscriber> EventSource<S> {
    pub fn new(subscriber: S, channel: impl Into<String>) -> Self {
        Self {
            subscriber,
            channel: channel.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl<S: Subscriber> InputSource for EventSource<S> {
    type Pending = InferenceItem;

    async fn poll_once(&mut self) -> Result<Vec<InferenceItem>> {
        match self.subscriber.next_message().await? {
            Some(payload) => {
                let item = InferenceItem::new(payload, ItemSource::message(&self.channel));
                debug!("Received {} ({} bytes)", item.source, item.payload.len());
                Ok(vec![item])
            }
            None => {
                info!("Subscription to '{}' closed", self.channel);
                self.closed = true;
                Ok(Vec::new())
            }
        }
    }

    // The payload already arrived with the message
    async fn load(&mut self, item: InferenceItem) -> Result<Option<InferenceItem>> {
        Ok(Some(item))
    }

    fn is_exhausted(&self) -> bool {
        self.closed
    }

    fn describe(&self) -> String {
        format!("event mode on '{}'", self.channel)
    }
}

/// Publishes result JSON to the outbound channel
pub struct PublishSink<P> {
    publisher: P,
    channel: String,
}

impl<P: Publisher> PublishSink<P> {
    pub fn new(publisher: P, channel: impl Into<String>) -> Self {
        Self {
            publisher,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl<P: Publisher> ResultSink for PublishSink<P> {
    async fn emit(&mut self, outcome: &ItemOutcome) -> Result<()> {
        let Ok(result) = &outcome.result else {
            return Ok(());
        };

        let payload = result.to_json()?;
        self.publisher.publish(&self.channel, payload).await?;
        debug!("Published result for {} to '{}'", outcome.source, self.channel);
        Ok(())
    }

    async fn on_failure(&mut self, outcome: &ItemOutcome) -> Result<()> {
        warn!("Dropping message {}", outcome.source);
        Ok(())
    }
}

/// Assemble an event-mode runner over any transport
pub fn build_runner<S: Subscriber, P: Publisher>(
    config: &EventConfig,
    subscriber: S,
    publisher: P,
    engine: BatchingEngine,
) -> Runner<EventSource<S>, PublishSink<P>> {
    Runner::new(
        EventSource::new(subscriber, &config.channel_in),
        PublishSink::new(publisher, &config.channel_out),
        engine,
        RunMode::Continuous,
        Trigger::Immediate,
    )
}

/// In-process subscriber fed by an mpsc channel
pub struct ChannelSubscriber {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelSubscriber {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

/// In-process publisher forwarding `(channel, payload)` pairs
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<(String, String)>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::UnboundedSender<(String, String)>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        self.tx
            .send((channel.to_string(), payload))
            .map_err(|_| Error::transport("publish channel closed"))
    }
}
