//! Subscription identity and the idempotent-subscribe service.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::broker::BrokerError;
use crate::consumer::ConsumerFleet;

/// An identified binding of a listener to a single broker queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    id: Uuid,
    queue: String,
}

impl Subscription {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// Thin identity wrapper over the consumer fleet.
pub struct SubscriptionService {
    fleet: Arc<ConsumerFleet>,
}

impl SubscriptionService {
    pub fn new(fleet: Arc<ConsumerFleet>) -> Self {
        Self { fleet }
    }

    /// Subscribes to a queue. With `idempotent` set, an existing subscription
    /// on the queue is returned instead of creating a new listener;
    /// otherwise a fresh listener is always started.
    pub async fn subscribe(
        &self,
        queue: &str,
        idempotent: bool,
    ) -> Result<Subscription, BrokerError> {
        if idempotent {
            if let Some(existing) = self.fleet.queue_subscriptions(queue).into_iter().next() {
                return Ok(existing);
            }
        }

        let subscription = Subscription::new(queue);
        self.fleet.subscribe(subscription.clone()).await?;
        Ok(subscription)
    }

    pub async fn unsubscribe_by_id(&self, id: Uuid) -> Result<(), BrokerError> {
        self.fleet.unsubscribe(id).await
    }

    pub async fn unsubscribe_by_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.fleet.unsubscribe_from_queue(queue).await
    }

    pub async fn unsubscribe_all(&self) -> Result<(), BrokerError> {
        self.fleet.unsubscribe_all().await
    }

    pub fn all_subscriptions(&self) -> Vec<Subscription> {
        self.fleet.all_subscriptions()
    }
}
