//! Fleet of per-queue listeners with cooperative shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::broker::{BrokerConnection, BrokerError};
use crate::subscription::Subscription;

use super::listener::QueueListener;
use super::Matcher;

/// Owns the set of listeners, one per subscription.
///
/// The listener map is mutated only under its own lock; listeners are always
/// removed from the map before being stopped, so the lock is never held
/// across an await.
pub struct ConsumerFleet {
    connection: Arc<dyn BrokerConnection>,
    matcher: Arc<dyn Matcher>,
    listeners: Mutex<HashMap<Uuid, QueueListener>>,
}

impl ConsumerFleet {
    pub fn new(connection: Arc<dyn BrokerConnection>, matcher: Arc<dyn Matcher>) -> Self {
        Self {
            connection,
            matcher,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a listener for the subscription and registers it. On failure
    /// nothing is registered.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<(), BrokerError> {
        let listener = QueueListener::start(
            self.connection.as_ref(),
            subscription.clone(),
            Arc::clone(&self.matcher),
        )
        .await?;

        self.listeners.lock().insert(subscription.id(), listener);
        Ok(())
    }

    /// Stops and removes the listener with the given id. Absent ids are a
    /// no-op.
    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), BrokerError> {
        let listener = self.listeners.lock().remove(&id);
        match listener {
            Some(listener) => listener.stop().await,
            None => Ok(()),
        }
    }

    /// Stops and removes every listener subscribed to `queue`.
    pub async fn unsubscribe_from_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let drained: Vec<QueueListener> = {
            let mut listeners = self.listeners.lock();
            let ids: Vec<Uuid> = listeners
                .iter()
                .filter(|(_, l)| l.subscription().queue() == queue)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| listeners.remove(&id))
                .collect()
        };

        stop_all(drained).await
    }

    /// Stops and removes every listener.
    pub async fn unsubscribe_all(&self) -> Result<(), BrokerError> {
        let drained: Vec<QueueListener> = {
            let mut listeners = self.listeners.lock();
            listeners.drain().map(|(_, l)| l).collect()
        };

        stop_all(drained).await
    }

    /// Snapshot of all subscription identities.
    pub fn all_subscriptions(&self) -> Vec<Subscription> {
        self.listeners
            .lock()
            .values()
            .map(|l| l.subscription().clone())
            .collect()
    }

    /// Snapshot of the subscriptions on `queue`.
    pub fn queue_subscriptions(&self, queue: &str) -> Vec<Subscription> {
        self.listeners
            .lock()
            .values()
            .filter(|l| l.subscription().queue() == queue)
            .map(|l| l.subscription().clone())
            .collect()
    }

    /// Blocks until `shutdown` resolves, then stops every listener and waits
    /// for each worker to finish its in-flight delivery.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), BrokerError> {
        shutdown.await;
        self.unsubscribe_all().await?;
        info!("all amqp listeners stopped");
        Ok(())
    }
}

/// Stops every listener, returning the first error after attempting all.
async fn stop_all(listeners: Vec<QueueListener>) -> Result<(), BrokerError> {
    let mut first_error = None;
    for listener in listeners {
        if let Err(err) = listener.stop().await {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
