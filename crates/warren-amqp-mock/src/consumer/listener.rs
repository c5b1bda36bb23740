//! One listener per subscription: consumes a queue, drives matching,
//! publishes replies, acknowledges deliveries.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broker::{BrokerChannel, BrokerConnection, BrokerError, Delivery, DeliveryStream, Publication};
use crate::expectation::Candidate;
use crate::subscription::Subscription;

use super::Matcher;

/// Reply body published when no expectation matches a candidate.
pub const NO_MATCH_BODY: &[u8] = br#"{"errors":"no match found"}"#;

const REPLY_CONTENT_TYPE: &str = "application/json";

/// A running listener. Owns its broker channel and one worker task.
pub struct QueueListener {
    subscription: Subscription,
    channel: Arc<dyn BrokerChannel>,
    worker: JoinHandle<()>,
}

impl QueueListener {
    /// Opens a channel, starts consuming the subscription's queue and spawns
    /// the worker. Nothing is left behind on failure.
    pub(crate) async fn start(
        connection: &dyn BrokerConnection,
        subscription: Subscription,
        matcher: Arc<dyn Matcher>,
    ) -> Result<Self, BrokerError> {
        let channel: Arc<dyn BrokerChannel> = Arc::from(connection.open_channel().await?);
        let deliveries = channel.consume(subscription.queue()).await?;

        let worker = tokio::spawn(run_worker(
            Arc::clone(&channel),
            subscription.clone(),
            matcher,
            deliveries,
        ));

        Ok(Self {
            subscription,
            channel,
            worker,
        })
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Closes the channel, which ends the delivery stream, then waits for the
    /// worker to finish its in-flight delivery and exit. Idempotent with
    /// respect to already-closed channels.
    pub(crate) async fn stop(self) -> Result<(), BrokerError> {
        self.channel.close().await?;
        if let Err(err) = self.worker.await {
            error!(
                queue = self.subscription.queue(),
                error = %err,
                "listener worker did not shut down cleanly"
            );
        }
        Ok(())
    }
}

async fn run_worker(
    channel: Arc<dyn BrokerChannel>,
    subscription: Subscription,
    matcher: Arc<dyn Matcher>,
    mut deliveries: DeliveryStream,
) {
    info!(queue = subscription.queue(), "amqp listener started");

    while let Some(delivery) = deliveries.next().await {
        handle_delivery(channel.as_ref(), &subscription, matcher.as_ref(), delivery).await;
    }

    info!(queue = subscription.queue(), "amqp listener stopped");
}

/// Deliveries are handled strictly in arrival order: match, publish the
/// reply to the caller's reply-to queue on the default exchange, ack.
/// Publish and ack failures are logged and swallowed; the broker redelivers
/// on connection recovery as appropriate.
async fn handle_delivery(
    channel: &dyn BrokerChannel,
    subscription: &Subscription,
    matcher: &dyn Matcher,
    delivery: Delivery,
) {
    let Delivery {
        exchange,
        routing_key,
        body,
        reply_to,
        correlation_id,
        delivery_tag,
    } = delivery;

    let candidate = match Candidate::new(exchange.clone(), routing_key.clone(), body) {
        Ok(candidate) => candidate,
        Err(err) => {
            // acknowledge-and-drop; never nack or republish
            error!(
                queue = subscription.queue(),
                error = %err,
                "failed to build candidate from delivery"
            );
            ack(channel, subscription, &correlation_id, delivery_tag).await;
            return;
        }
    };

    let reply_body = match matcher.match_candidate(&candidate) {
        Some(response) => response.into_body(),
        None => Bytes::from_static(NO_MATCH_BODY),
    };

    let message = Publication {
        content_type: REPLY_CONTENT_TYPE.to_string(),
        correlation_id: correlation_id.clone(),
        body: reply_body,
    };
    if let Err(err) = channel.publish("", &reply_to, message).await {
        error!(
            exchange = exchange.as_str(),
            routing_key = routing_key.as_str(),
            correlation_id = correlation_id.as_str(),
            error = %err,
            "failed to publish reply"
        );
    }

    ack(channel, subscription, &correlation_id, delivery_tag).await;
}

async fn ack(
    channel: &dyn BrokerChannel,
    subscription: &Subscription,
    correlation_id: &str,
    delivery_tag: u64,
) {
    if let Err(err) = channel.ack(delivery_tag).await {
        error!(
            queue = subscription.queue(),
            correlation_id = correlation_id,
            error = %err,
            "failed to acknowledge delivery"
        );
    }
}
