//! Redis pub/sub transport for event mode
//!
//! Redis pub/sub is not durable: messages published while the service is
//! not subscribed are lost.

use crate::event::{Publisher, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use imgserve_core::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    fn client(&self) -> Result<redis::Client> {
        redis::Client::open(self.url())
            .map_err(|e| Error::config(format!("invalid Redis address {}: {}", self.url(), e)))
    }
}

/// Subscription to a single channel.
///
/// The message stream only ends when the connection drops, so the end of
/// the stream is a transport error rather than a clean close.
pub struct RedisSubscriber {
    channel: String,
    messages: BoxStream<'static, redis::Msg>,
}

impl RedisSubscriber {
    pub async fn connect(config: &RedisConfig, channel: &str) -> Result<Self> {
        let client = config.client()?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::transport(format!("failed to connect to {}: {}", config.url(), e)))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| Error::transport(format!("failed to subscribe to '{}': {}", channel, e)))?;
        info!("Subscribed to '{}' on {}", channel, config.url());

        Ok(Self::from_stream(channel, pubsub.into_on_message().boxed()))
    }

    fn from_stream(channel: impl Into<String>, messages: BoxStream<'static, redis::Msg>) -> Self {
        Self {
            channel: channel.into(),
            messages,
        }
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        match self.messages.next().await {
            Some(msg) => {
                let payload: Vec<u8> = msg.get_payload().map_err(|e| {
                    Error::preprocess(format!(
                        "unreadable payload on '{}': {}",
                        msg.get_channel_name(),
                        e
                    ))
                })?;
                Ok(Some(Bytes::from(payload)))
            }
            None => Err(Error::transport(format!(
                "subscription to '{}' lost",
                self.channel
            ))),
        }
    }
}

/// Publishes over a reconnecting connection
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let conn = ConnectionManager::new(config.client()?)
            .await
            .map_err(|e| Error::transport(format!("failed to connect to {}: {}", config.url(), e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| Error::transport(format!("failed to publish to '{}': {}", channel, e)))?;
        Ok(())
    }
}
