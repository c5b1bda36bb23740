//! Broker capability required by the consumer fleet.
//!
//! The traits here are the full contract the mock needs from a broker
//! client: open a channel, consume a queue with manual acknowledgement,
//! publish a reply, ack a delivery, close the channel idempotently. The
//! production binding lives in [`amqp`]; tests drive the same traits with an
//! in-memory implementation.

mod amqp;

pub use amqp::AmqpConnection;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors surfaced by a broker binding.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),
    #[error("failed to open broker channel: {0}")]
    OpenChannel(String),
    #[error("failed to consume from queue {queue}: {reason}")]
    Consume { queue: String, reason: String },
    #[error("failed to publish to exchange '{exchange}' with routing key '{routing_key}': {reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },
    #[error("failed to acknowledge delivery {delivery_tag}: {reason}")]
    Ack { delivery_tag: u64, reason: String },
    #[error("failed to close broker channel: {0}")]
    Close(String),
}

/// One message consumed from a subscribed queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
    /// Queue named by the caller for the reply; empty when the caller did
    /// not set one.
    pub reply_to: String,
    /// Echoed verbatim on the reply.
    pub correlation_id: String,
    pub delivery_tag: u64,
}

/// An outbound message. Mandatory and immediate flags are always false.
#[derive(Debug, Clone, Default)]
pub struct Publication {
    pub content_type: String,
    pub correlation_id: String,
    pub body: Bytes,
}

pub type DeliveryStream = BoxStream<'static, Delivery>;

/// A broker channel owned 1:1 by a listener.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Begins consuming from a queue with manual acknowledgement, not
    /// exclusive, no extra flags. The returned stream ends when the channel
    /// closes.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Publication,
    ) -> Result<(), BrokerError>;

    /// Acknowledges a single delivery (`multiple = false`).
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Closes the channel. Closing an already-closed channel is a success.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A broker connection able to open channels.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}
