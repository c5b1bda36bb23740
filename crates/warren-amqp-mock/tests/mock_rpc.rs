//! End-to-end scenarios over an in-memory broker.
//!
//! The broker capability traits are driven by a tokio-mpsc implementation so
//! the full delivery → match → reply → ack path runs without a RabbitMQ
//! instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use warren_amqp_mock::broker::{
    BrokerChannel, BrokerConnection, BrokerError, Delivery, DeliveryStream, Publication,
};
use warren_amqp_mock::comparator::{BodyComparator, RegexBody};
use warren_amqp_mock::consumer::{ConsumerFleet, Matcher, NO_MATCH_BODY};
use warren_amqp_mock::expectation::{
    Expectation, ExpectationRegistry, Request, Response, Times,
};
use warren_amqp_mock::subscription::SubscriptionService;

// =============================================================================
// In-memory broker
// =============================================================================

#[derive(Debug, Clone)]
struct PublishedMessage {
    exchange: String,
    routing_key: String,
    content_type: String,
    correlation_id: String,
    body: Bytes,
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>>,
    published: Mutex<Vec<PublishedMessage>>,
    acked: Mutex<Vec<u64>>,
    fail_publish: AtomicBool,
}

#[derive(Clone, Default)]
struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    fn new() -> Self {
        Self::default()
    }

    /// Hands a delivery to one consumer of the queue, the way a broker would
    /// pick one of the competing consumers.
    fn deliver(&self, queue: &str, delivery: Delivery) -> bool {
        let queues = self.state.queues.lock();
        let Some(senders) = queues.get(queue) else {
            return false;
        };
        senders
            .iter()
            .any(|sender| sender.send(delivery.clone()).is_ok())
    }

    fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().clone()
    }

    fn acked(&self) -> Vec<u64> {
        self.state.acked.lock().clone()
    }

    fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(queue)
            .map_or(0, |senders| senders.len())
    }

    fn fail_publishes(&self) {
        self.state.fail_publish.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerConnection for MemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        Ok(Box::new(MemoryChannel {
            state: Arc::clone(&self.state),
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryChannel {
    state: Arc<BrokerState>,
    consumers: Mutex<Vec<mpsc::UnboundedSender<Delivery>>>,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Consume {
                queue: queue.to_string(),
                reason: "channel closed".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push(tx.clone());
        self.consumers.lock().push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        })
        .boxed();
        Ok(stream)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Publication,
    ) -> Result<(), BrokerError> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        self.state.published.lock().push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            content_type: message.content_type,
            correlation_id: message.correlation_id,
            body: message.body,
        });
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.state.acked.lock().push(delivery_tag);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            // already closed
            return Ok(());
        }

        let mine: Vec<_> = self.consumers.lock().drain(..).collect();
        let mut queues = self.state.queues.lock();
        for senders in queues.values_mut() {
            senders.retain(|sender| !mine.iter().any(|m| m.same_channel(sender)));
        }
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    broker: MemoryBroker,
    registry: Arc<ExpectationRegistry>,
    fleet: Arc<ConsumerFleet>,
    subscriptions: SubscriptionService,
}

fn harness() -> Harness {
    let broker = MemoryBroker::new();
    let registry = Arc::new(ExpectationRegistry::new());
    let fleet = Arc::new(ConsumerFleet::new(
        Arc::new(broker.clone()) as Arc<dyn BrokerConnection>,
        Arc::clone(&registry) as Arc<dyn Matcher>,
    ));
    let subscriptions = SubscriptionService::new(Arc::clone(&fleet));
    Harness {
        broker,
        registry,
        fleet,
        subscriptions,
    }
}

fn regex_expectation(exchange: &str, routing_key: &str, pattern: &str, response: &str) -> Expectation {
    let request = Request::new(
        exchange,
        routing_key,
        BodyComparator::Regex(RegexBody::new(pattern).unwrap()),
    )
    .unwrap();
    Expectation::builder(request, Response::new(response.as_bytes().to_vec()))
        .times(Times::unlimited())
        .build()
}

fn delivery(
    exchange: &str,
    routing_key: &str,
    body: &str,
    reply_to: &str,
    correlation_id: &str,
    delivery_tag: u64,
) -> Delivery {
    Delivery {
        exchange: exchange.to_string(),
        routing_key: routing_key.to_string(),
        body: Bytes::from(body.as_bytes().to_vec()),
        reply_to: reply_to.to_string(),
        correlation_id: correlation_id.to_string(),
        delivery_tag,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn no_match_reply_is_published_to_reply_queue() {
    let h = harness();
    h.subscriptions.subscribe("q", false).await.unwrap();

    assert!(h
        .broker
        .deliver("q", delivery("X", "rk", "{}", "r", "c", 1)));

    wait_until(|| h.broker.published().len() == 1).await;

    let published = h.broker.published();
    assert_eq!(published[0].exchange, "");
    assert_eq!(published[0].routing_key, "r");
    assert_eq!(published[0].content_type, "application/json");
    assert_eq!(published[0].correlation_id, "c");
    assert_eq!(published[0].body.as_ref(), NO_MATCH_BODY);

    wait_until(|| h.broker.acked() == vec![1]).await;
}

#[tokio::test]
async fn matched_reply_carries_expectation_response() {
    let h = harness();
    h.registry
        .create(regex_expectation("X", "rk", "foo", r#"{"result":"b1"}"#));
    h.subscriptions.subscribe("q", false).await.unwrap();

    h.broker
        .deliver("q", delivery("X", "rk", "say foo please", "r", "c-9", 7));

    wait_until(|| h.broker.published().len() == 1).await;
    let published = h.broker.published();
    assert_eq!(published[0].body.as_ref(), br#"{"result":"b1"}"#);
    assert_eq!(published[0].correlation_id, "c-9");
    wait_until(|| h.broker.acked() == vec![7]).await;
}

#[tokio::test]
async fn deliveries_are_processed_in_order() {
    let h = harness();
    h.registry
        .create(regex_expectation("X", "rk", ".*", r#"{"ok":true}"#));
    h.subscriptions.subscribe("q", false).await.unwrap();

    for tag in 1..=3 {
        h.broker.deliver(
            "q",
            delivery("X", "rk", "{}", "r", &format!("c{tag}"), tag),
        );
    }

    wait_until(|| h.broker.published().len() == 3).await;
    let ids: Vec<String> = h
        .broker
        .published()
        .iter()
        .map(|p| p.correlation_id.clone())
        .collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    wait_until(|| h.broker.acked().len() == 3).await;
    assert_eq!(h.broker.acked(), vec![1, 2, 3]);
}

#[tokio::test]
async fn invalid_candidate_is_acked_and_dropped() {
    let h = harness();
    h.subscriptions.subscribe("q", false).await.unwrap();

    // empty exchange cannot form a candidate
    h.broker.deliver("q", delivery("", "", "{}", "r", "c", 4));

    wait_until(|| h.broker.acked() == vec![4]).await;
    assert!(h.broker.published().is_empty());
    // no assertion is recorded for a delivery that never became a candidate
    assert!(h
        .registry
        .assertions(Default::default())
        .is_empty());
}

#[tokio::test]
async fn publish_failure_does_not_halt_the_listener() {
    let h = harness();
    h.broker.fail_publishes();
    h.subscriptions.subscribe("q", false).await.unwrap();

    h.broker.deliver("q", delivery("X", "rk", "{}", "r", "c1", 1));
    h.broker.deliver("q", delivery("X", "rk", "{}", "r", "c2", 2));

    wait_until(|| h.broker.acked() == vec![1, 2]).await;
    assert!(h.broker.published().is_empty());
}

#[tokio::test]
async fn idempotent_subscribe_reuses_existing_subscription() {
    let h = harness();

    let first = h.subscriptions.subscribe("q", false).await.unwrap();
    let reused = h.subscriptions.subscribe("q", true).await.unwrap();
    let fresh = h.subscriptions.subscribe("q", false).await.unwrap();

    assert_eq!(first.id(), reused.id());
    assert_ne!(first.id(), fresh.id());

    let mut ids: Vec<_> = h
        .subscriptions
        .all_subscriptions()
        .iter()
        .map(|s| s.id())
        .collect();
    ids.sort();
    let mut expected = vec![first.id(), fresh.id()];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let h = harness();
    let subscription = h.subscriptions.subscribe("q", false).await.unwrap();

    h.subscriptions
        .unsubscribe_by_id(subscription.id())
        .await
        .unwrap();
    h.subscriptions
        .unsubscribe_by_id(subscription.id())
        .await
        .unwrap();

    assert!(h.subscriptions.all_subscriptions().is_empty());
    assert_eq!(h.broker.consumer_count("q"), 0);
}

#[tokio::test]
async fn unsubscribe_by_queue_removes_every_listener_on_it() {
    let h = harness();
    h.subscriptions.subscribe("q", false).await.unwrap();
    h.subscriptions.subscribe("q", false).await.unwrap();
    let other = h.subscriptions.subscribe("other", false).await.unwrap();

    h.subscriptions.unsubscribe_by_queue("q").await.unwrap();

    let remaining = h.subscriptions.all_subscriptions();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id(), other.id());
    assert_eq!(h.broker.consumer_count("q"), 0);
    assert_eq!(h.broker.consumer_count("other"), 1);
}

#[tokio::test]
async fn channel_close_is_idempotent() {
    let broker = MemoryBroker::new();
    let channel = broker.open_channel().await.unwrap();
    let _stream = channel.consume("q").await.unwrap();

    channel.close().await.unwrap();
    channel.close().await.unwrap();
}

#[tokio::test]
async fn fleet_run_drains_all_listeners_on_shutdown() {
    let h = harness();
    h.subscriptions.subscribe("q1", false).await.unwrap();
    h.subscriptions.subscribe("q2", false).await.unwrap();

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let fleet = Arc::clone(&h.fleet);
    let trigger = Arc::clone(&shutdown);
    let run = tokio::spawn(async move {
        fleet
            .run(async move {
                trigger.notified().await;
            })
            .await
    });

    shutdown.notify_one();
    run.await.unwrap().unwrap();

    assert!(h.subscriptions.all_subscriptions().is_empty());
    assert_eq!(h.broker.consumer_count("q1"), 0);
    assert_eq!(h.broker.consumer_count("q2"), 0);
    assert!(!h.broker.deliver("q1", delivery("X", "rk", "{}", "r", "c", 1)));
}

#[tokio::test]
async fn in_flight_delivery_finishes_before_shutdown() {
    let h = harness();
    h.registry
        .create(regex_expectation("X", "rk", ".*", r#"{"done":1}"#));
    h.subscriptions.subscribe("q", false).await.unwrap();

    h.broker.deliver("q", delivery("X", "rk", "{}", "r", "c", 1));
    h.fleet.run(std::future::ready(())).await.unwrap();

    // the worker picked the delivery up before the close; publish and ack
    // both completed
    let published = h.broker.published();
    let acked = h.broker.acked();
    assert_eq!(published.len(), acked.len());
}
