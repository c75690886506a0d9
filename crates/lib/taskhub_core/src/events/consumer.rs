//! Long-lived event consumer: subscribe, decode, dispatch, commit.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Subscribed ──▶ Consuming
//!                      ▲                             │
//!                      └──────── connection lost ────┘
//! ```
//!
//! Delivery is at-least-once. Receipts are committed on an interval, so a
//! crash between handling and commit redelivers; handlers must tolerate
//! seeing an event twice.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{Delivery, MessageBroker, Receipt, Subscription};
use super::topic::{PROJECT_TOPIC, TASK_TOPIC, USER_TOPIC};
use super::{BrokerError, HandlerError, codec};
use crate::models::event::DomainEvent;
use crate::retry::RetryPolicy;

/// Consumer group used when none is configured.
pub const DEFAULT_GROUP: &str = "taskhub-group";

/// `<group>-<hostname>`, or `<group>-local` when the hostname is unreadable.
pub fn default_consumer_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "local".to_string());
    format!("{DEFAULT_GROUP}-{host}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Consuming,
}

/// Reacts to one event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    /// Group member name. Keep it stable across restarts of the same
    /// instance so its pending entries come back to it.
    pub consumer_name: String,
    pub topics: Vec<String>,
    pub batch_size: usize,
    pub poll_block: Duration,
    pub commit_interval: Duration,
    /// Backoff between reconnect attempts. Attempts never stop; the delay
    /// stays at `max_delay` once reached.
    pub reconnect: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            consumer_name: default_consumer_name(),
            topics: vec![
                USER_TOPIC.to_string(),
                PROJECT_TOPIC.to_string(),
                TASK_TOPIC.to_string(),
            ],
            batch_size: 64,
            poll_block: Duration::from_secs(1),
            commit_interval: Duration::from_secs(5),
            reconnect: RetryPolicy {
                max_attempts: u32::MAX,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(10),
                multiplier: 2,
            },
        }
    }
}

pub struct EventConsumer {
    broker: Arc<dyn MessageBroker>,
    config: ConsumerConfig,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    state: watch::Sender<ConsumerState>,
}

impl EventConsumer {
    pub fn new(broker: Arc<dyn MessageBroker>, config: ConsumerConfig) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            broker,
            config,
            handlers: HashMap::new(),
            state,
        }
    }

    /// Register `handler` for `event_type`, replacing any previous one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn with_handler(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.register(event_type, handler);
        self
    }

    /// Watch state transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "consumer state");
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Consume until `cancel` fires, reconnecting on connection loss.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer_name,
            topics = ?self.config.topics,
            handlers = self.handlers.len(),
            "event consumer starting"
        );
        let mut failures: u32 = 0;
        while !cancel.is_cancelled() {
            self.set_state(ConsumerState::Connecting);
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.broker.subscribe(
                    &self.config.topics,
                    &self.config.group,
                    &self.config.consumer_name,
                ) => result,
            };
            let outcome = match subscribed {
                Ok(subscription) => {
                    failures = 0;
                    self.set_state(ConsumerState::Subscribed);
                    info!("event consumer subscribed");
                    self.consume(subscription, &cancel).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => break,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.reconnect.delay_for(failures);
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "event consumer connection lost, reconnecting"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.set_state(ConsumerState::Disconnected);
        info!("event consumer stopped");
    }

    /// Returns `Ok` only on cancellation, after a final commit.
    async fn consume(
        &self,
        mut subscription: Box<dyn Subscription>,
        cancel: &CancellationToken,
    ) -> Result<(), BrokerError> {
        self.set_state(ConsumerState::Consuming);
        let mut uncommitted: Vec<Receipt> = Vec::new();
        let mut last_commit = Instant::now();
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => None,
                batch = subscription.poll(self.config.batch_size, self.config.poll_block) => Some(batch),
            };
            let Some(batch) = polled else {
                commit(subscription.as_mut(), &mut uncommitted).await?;
                return Ok(());
            };
            let batch = batch?;
            if !batch.is_empty() {
                uncommitted.extend(self.process_batch(batch).await);
            }
            if last_commit.elapsed() >= self.config.commit_interval {
                commit(subscription.as_mut(), &mut uncommitted).await?;
                last_commit = Instant::now();
            }
        }
    }

    /// Partitions run concurrently; messages within one partition run in
    /// delivery order. Returns a receipt for every message, handled or not.
    async fn process_batch(&self, batch: Vec<Delivery>) -> Vec<Receipt> {
        let mut partitions: BTreeMap<(String, u32), Vec<Delivery>> = BTreeMap::new();
        for delivery in batch {
            partitions
                .entry((delivery.topic.clone(), delivery.partition))
                .or_default()
                .push(delivery);
        }
        join_all(partitions.into_values().map(|messages| self.process_partition(messages)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn process_partition(&self, messages: Vec<Delivery>) -> Vec<Receipt> {
        let mut receipts = Vec::with_capacity(messages.len());
        for delivery in messages {
            self.dispatch(&delivery).await;
            receipts.push(delivery.receipt());
        }
        receipts
    }

    async fn dispatch(&self, delivery: &Delivery) {
        let envelope = match codec::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    id = %delivery.id,
                    error = %e,
                    "skipping malformed event"
                );
                return;
            }
        };
        let event = DomainEvent::from_envelope(envelope, delivery.key.as_deref());
        debug!(
            topic = %delivery.topic,
            event_type = %event.event_type,
            tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
            "event received"
        );
        let Some(handler) = self.handlers.get(&event.event_type) else {
            debug!(event_type = %event.event_type, "unhandled event type");
            return;
        };
        if let Err(e) = handler.handle(&event).await {
            error!(
                event_type = %event.event_type,
                id = %delivery.id,
                error = %e,
                "event handler failed"
            );
        }
    }
}

async fn commit(
    subscription: &mut dyn Subscription,
    uncommitted: &mut Vec<Receipt>,
) -> Result<(), BrokerError> {
    if uncommitted.is_empty() {
        return Ok(());
    }
    subscription.commit(&uncommitted[..]).await?;
    debug!(count = uncommitted.len(), "receipts committed");
    uncommitted.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::broker::{Ack, AckLevel};
    use crate::events::memory::MemoryBroker;
    use crate::events::publisher::EventPublisher;
    use crate::events::topic::TopicRouter;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &DomainEvent) -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        }
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            consumer_name: "c1".into(),
            poll_block: Duration::from_millis(10),
            commit_interval: Duration::ZERO,
            reconnect: RetryPolicy {
                max_attempts: u32::MAX,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2,
            },
            ..ConsumerConfig::default()
        }
    }

    fn publisher(broker: &MemoryBroker) -> EventPublisher {
        EventPublisher::new(
            Arc::new(broker.clone()),
            TopicRouter::default(),
            RetryPolicy::none(),
            "test",
        )
    }

    async fn wait_for(rx: &mut watch::Receiver<ConsumerState>, want: ConsumerState) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met");
    }

    #[tokio::test]
    async fn dispatches_by_type_and_survives_bad_input() {
        let broker = MemoryBroker::new(3);
        let recorder = Arc::new(Recorder::default());
        let consumer = EventConsumer::new(Arc::new(broker.clone()), config())
            .with_handler("task.created", recorder.clone())
            .with_handler("task.deleted", Arc::new(Failing));
        let mut state = consumer.state();
        let cancel = CancellationToken::new();
        let handle = consumer.spawn(cancel.clone());
        wait_for(&mut state, ConsumerState::Consuming).await;

        broker
            .publish(TASK_TOPIC, "t1", b"not gzip", AckLevel::All)
            .await
            .unwrap();
        let events = publisher(&broker);
        events.emit("task.deleted", Some("t1"), json!({})).await.unwrap();
        events.emit("task.updated", Some("t1"), json!({})).await.unwrap();
        events
            .emit("task.created", Some("t1"), json!({"title": "after"}))
            .await
            .unwrap();

        eventually(|| recorder.seen.lock().unwrap().len() == 1).await;
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen[0].payload["title"], "after");
        assert_eq!(seen[0].tenant_id.as_deref(), Some("t1"));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*state.borrow(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn per_tenant_order_is_preserved() {
        let broker = MemoryBroker::new(3);
        let recorder = Arc::new(Recorder::default());
        let consumer = EventConsumer::new(Arc::new(broker.clone()), config())
            .with_handler("project.updated", recorder.clone());
        let mut state = consumer.state();
        let cancel = CancellationToken::new();
        let handle = consumer.spawn(cancel.clone());
        wait_for(&mut state, ConsumerState::Consuming).await;

        let events = publisher(&broker);
        for n in 0..10 {
            let tenant = if n % 2 == 0 { "tA" } else { "tB" };
            events
                .emit("project.updated", Some(tenant), json!({"n": n}))
                .await
                .unwrap();
        }
        eventually(|| recorder.seen.lock().unwrap().len() == 10).await;
        let seen = recorder.seen.lock().unwrap().clone();
        for tenant in ["tA", "tB"] {
            let order: Vec<i64> = seen
                .iter()
                .filter(|e| e.tenant_id.as_deref() == Some(tenant))
                .filter_map(|e| e.payload["n"].as_i64())
                .collect();
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(order, sorted);
        }
        cancel.cancel();
        handle.await.unwrap();
    }

    /// Subscribe fails a fixed number of times before delegating.
    struct Unreachable {
        failures: AtomicU32,
        inner: MemoryBroker,
    }

    #[async_trait]
    impl MessageBroker for Unreachable {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
            ack: AckLevel,
        ) -> Result<Ack, BrokerError> {
            self.inner.publish(topic, key, payload, ack).await
        }

        async fn subscribe(
            &self,
            topics: &[String],
            group: &str,
            consumer: &str,
        ) -> Result<Box<dyn Subscription>, BrokerError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(BrokerError::Connection("refused".into()));
            }
            self.inner.subscribe(topics, group, consumer).await
        }

        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn reconnects_after_subscribe_failures() {
        let broker = Arc::new(Unreachable {
            failures: AtomicU32::new(3),
            inner: MemoryBroker::new(1),
        });
        let consumer = EventConsumer::new(broker.clone(), config());
        let mut state = consumer.state();
        let cancel = CancellationToken::new();
        let handle = consumer.spawn(cancel.clone());
        wait_for(&mut state, ConsumerState::Consuming).await;
        assert_eq!(broker.failures.load(Ordering::SeqCst), 0);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_work_is_redelivered_after_restart() {
        let broker = MemoryBroker::new(1);
        let events = publisher(&broker);

        let slow_commit = ConsumerConfig {
            commit_interval: Duration::from_secs(3600),
            ..config()
        };
        let first = Arc::new(Recorder::default());
        let consumer = EventConsumer::new(Arc::new(broker.clone()), slow_commit)
            .with_handler("user.created", first.clone());
        let mut state = consumer.state();
        let cancel = CancellationToken::new();
        let handle = consumer.spawn(cancel.clone());
        wait_for(&mut state, ConsumerState::Consuming).await;
        events.emit("user.created", Some("t1"), json!({})).await.unwrap();
        eventually(|| first.seen.lock().unwrap().len() == 1).await;
        // Simulated crash: abort without the final commit.
        handle.abort();
        let _ = handle.await;

        let second = Arc::new(Recorder::default());
        let consumer = EventConsumer::new(Arc::new(broker.clone()), config())
            .with_handler("user.created", second.clone());
        let cancel = CancellationToken::new();
        let handle = consumer.spawn(cancel.clone());
        eventually(|| second.seen.lock().unwrap().len() == 1).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn a_replacement_member_claims_idle_work() {
        let broker = MemoryBroker::new(1).with_claim_idle(Duration::ZERO);
        let events = publisher(&broker);

        let first = Arc::new(Recorder::default());
        let consumer = EventConsumer::new(
            Arc::new(broker.clone()),
            ConsumerConfig {
                consumer_name: "host-a".into(),
                commit_interval: Duration::from_secs(3600),
                ..config()
            },
        )
        .with_handler("task.updated", first.clone());
        let mut state = consumer.state();
        let handle = consumer.spawn(CancellationToken::new());
        wait_for(&mut state, ConsumerState::Consuming).await;
        events.emit("task.updated", Some("t1"), json!({"n": 1})).await.unwrap();
        eventually(|| first.seen.lock().unwrap().len() == 1).await;
        handle.abort();
        let _ = handle.await;

        // A different instance of the deployment joins under its own name.
        let second = Arc::new(Recorder::default());
        let consumer = EventConsumer::new(
            Arc::new(broker.clone()),
            ConsumerConfig {
                consumer_name: "host-b".into(),
                ..config()
            },
        )
        .with_handler("task.updated", second.clone());
        let cancel = CancellationToken::new();
        let handle = consumer.spawn(cancel.clone());
        eventually(|| second.seen.lock().unwrap().len() == 1).await;
        assert_eq!(second.seen.lock().unwrap()[0].payload["n"], 1);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn default_member_name_is_stable() {
        let name = ConsumerConfig::default().consumer_name;
        assert!(name.starts_with(&format!("{DEFAULT_GROUP}-")));
        assert!(name.len() > DEFAULT_GROUP.len() + 1);
        assert_eq!(name, ConsumerConfig::default().consumer_name);
        assert_eq!(name, default_consumer_name());
    }
}
