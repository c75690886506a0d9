//! In-process broker with consumer groups and redelivery of uncommitted
//! messages. Single-instance deployments and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use super::BrokerError;
use super::broker::{
    Ack, AckLevel, DEFAULT_CLAIM_IDLE, Delivery, MessageBroker, Receipt, Subscription,
    partition_for, partition_stream,
};

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    key: String,
    payload: Vec<u8>,
}

/// A delivered, uncommitted entry and the member holding it.
#[derive(Debug)]
struct PendingEntry {
    index: usize,
    consumer: String,
    delivered_at: Instant,
}

/// Read position of one group on one stream.
#[derive(Debug, Default)]
struct GroupCursor {
    /// Index of the next never-delivered entry.
    next: usize,
    /// Delivered but uncommitted, by entry id.
    pending: BTreeMap<u64, PendingEntry>,
}

impl GroupCursor {
    /// Hand entries other members have held for at least `min_idle` to
    /// `consumer`. Returns how many moved.
    fn claim_idle(&mut self, consumer: &str, min_idle: Duration, now: Instant) -> usize {
        let mut claimed = 0;
        for entry in self.pending.values_mut() {
            if entry.consumer != consumer && now.duration_since(entry.delivered_at) >= min_idle {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                claimed += 1;
            }
        }
        claimed
    }
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<String, Vec<Entry>>,
    groups: HashMap<(String, String), GroupCursor>,
    seq: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// Partitioned in-memory broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    partitions: u32,
    claim_idle: Duration,
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            claim_idle: DEFAULT_CLAIM_IDLE,
            inner: Arc::new(Inner::default()),
        }
    }

    /// Idle time after which a subscriber takes over another member's
    /// pending entries.
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    /// Every message on `topic` as `(key, payload)`, in publish order.
    pub async fn published(&self, topic: &str) -> Vec<(String, Vec<u8>)> {
        let state = self.inner.state.lock().await;
        let mut entries: Vec<&Entry> = (0..self.partitions)
            .filter_map(|p| state.streams.get(&partition_stream(topic, p)))
            .flatten()
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
            .into_iter()
            .map(|e| (e.key.clone(), e.payload.clone()))
            .collect()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        ack: AckLevel,
    ) -> Result<Ack, BrokerError> {
        let partition = partition_for(key, self.partitions);
        let id = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(BrokerError::Connection("broker closed".into()));
            }
            state.seq += 1;
            let id = state.seq;
            state
                .streams
                .entry(partition_stream(topic, partition))
                .or_default()
                .push(Entry {
                    id,
                    key: key.to_string(),
                    payload: payload.to_vec(),
                });
            id
        };
        self.inner.notify.notify_waiters();
        Ok(Ack {
            topic: topic.to_string(),
            partition,
            id: id.to_string(),
            replicas: (ack == AckLevel::All).then_some(0),
        })
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(BrokerError::Connection("broker closed".into()));
        }
        let now = Instant::now();
        let mut streams = Vec::new();
        for topic in topics {
            for partition in 0..self.partitions {
                let stream = partition_stream(topic, partition);
                let len = state.streams.get(&stream).map_or(0, Vec::len);
                // A new group starts at the tail, like `XGROUP CREATE ... $`.
                let cursor = state
                    .groups
                    .entry((group.to_string(), stream.clone()))
                    .or_insert_with(|| GroupCursor {
                        next: len,
                        pending: BTreeMap::new(),
                    });
                let claimed = cursor.claim_idle(consumer, self.claim_idle, now);
                if claimed > 0 {
                    debug!(%stream, group, consumer, claimed, "claimed idle pending entries");
                }
                streams.push((topic.clone(), partition, stream));
            }
        }
        let replay_from = streams.iter().map(|(_, _, s)| (s.clone(), 0)).collect();
        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            streams,
            replay_from: Some(replay_from),
        }))
    }

    async fn shutdown(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    group: String,
    consumer: String,
    streams: Vec<(String, u32, String)>,
    /// While replaying pending history: last replayed id per stream.
    replay_from: Option<HashMap<String, u64>>,
}

impl MemorySubscription {
    fn delivery(topic: &str, partition: u32, entry: &Entry) -> Delivery {
        Delivery {
            topic: topic.to_string(),
            partition,
            id: entry.id.to_string(),
            key: Some(entry.key.clone()),
            payload: entry.payload.clone(),
        }
    }

    /// This member's pending entries past the replay position, oldest first
    /// per stream.
    fn take_pending(&mut self, state: &mut State, max: usize) -> Vec<Delivery> {
        let Some(replay_from) = self.replay_from.as_mut() else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut out = Vec::new();
        for (topic, partition, stream) in &self.streams {
            let (Some(cursor), Some(entries)) = (
                state.groups.get_mut(&(self.group.clone(), stream.clone())),
                state.streams.get(stream),
            ) else {
                continue;
            };
            let from = replay_from.get(stream).copied().unwrap_or(0);
            for (&id, pending) in cursor.pending.range_mut(from + 1..) {
                if pending.consumer != self.consumer {
                    continue;
                }
                if out.len() >= max {
                    return out;
                }
                pending.delivered_at = now;
                out.push(Self::delivery(topic, *partition, &entries[pending.index]));
                replay_from.insert(stream.clone(), id);
            }
        }
        if out.len() < max {
            self.replay_from = None;
        }
        out
    }

    fn take_new(&self, state: &mut State, max: usize) -> Vec<Delivery> {
        let now = Instant::now();
        let mut out = Vec::new();
        for (topic, partition, stream) in &self.streams {
            let Some(entries) = state.streams.get(stream) else {
                continue;
            };
            let Some(cursor) = state.groups.get_mut(&(self.group.clone(), stream.clone())) else {
                continue;
            };
            while cursor.next < entries.len() && out.len() < max {
                let entry = &entries[cursor.next];
                cursor.pending.insert(
                    entry.id,
                    PendingEntry {
                        index: cursor.next,
                        consumer: self.consumer.clone(),
                        delivered_at: now,
                    },
                );
                out.push(Self::delivery(topic, *partition, entry));
                cursor.next += 1;
            }
        }
        out
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn poll(&mut self, max: usize, block: Duration) -> Result<Vec<Delivery>, BrokerError> {
        let max = max.max(1);
        let deadline = tokio::time::Instant::now() + block;
        let inner = self.inner.clone();
        loop {
            let notified = inner.notify.notified();
            {
                let mut state = inner.state.lock().await;
                if state.closed {
                    return Err(BrokerError::Connection("broker closed".into()));
                }
                let pending = self.take_pending(&mut state, max);
                if !pending.is_empty() {
                    return Ok(pending);
                }
                let fresh = self.take_new(&mut state, max);
                if !fresh.is_empty() {
                    return Ok(fresh);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&mut self, receipts: &[Receipt]) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock().await;
        for receipt in receipts {
            let stream = partition_stream(&receipt.topic, receipt.partition);
            let Ok(id) = receipt.id.parse::<u64>() else {
                return Err(BrokerError::Protocol(format!("bad message id {}", receipt.id)));
            };
            if let Some(cursor) = state.groups.get_mut(&(self.group.clone(), stream)) {
                cursor.pending.remove(&id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: Duration = Duration::from_millis(20);

    fn topics() -> Vec<String> {
        vec!["task-events".to_string()]
    }

    #[tokio::test]
    async fn delivers_in_order_per_key() {
        let broker = MemoryBroker::new(3);
        let mut sub = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        for n in 0..5 {
            broker
                .publish("task-events", "t1", format!("m{n}").as_bytes(), AckLevel::All)
                .await
                .unwrap();
        }
        let batch = sub.poll(10, BLOCK).await.unwrap();
        let payloads: Vec<_> = batch.iter().map(|d| d.payload.clone()).collect();
        assert_eq!(payloads, (0..5).map(|n| format!("m{n}").into_bytes()).collect::<Vec<_>>());
        assert!(batch.iter().all(|d| d.partition == batch[0].partition));
    }

    #[tokio::test]
    async fn empty_poll_returns_after_block() {
        let broker = MemoryBroker::new(1);
        let mut sub = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        assert!(sub.poll(10, BLOCK).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let broker = MemoryBroker::new(1);
        let mut sub = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher
                .publish("task-events", "t1", b"late", AckLevel::Leader)
                .await
                .unwrap();
        });
        let batch = sub.poll(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered() {
        let broker = MemoryBroker::new(2);
        let mut first = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        broker.publish("task-events", "t1", b"a", AckLevel::All).await.unwrap();
        broker.publish("task-events", "t2", b"b", AckLevel::All).await.unwrap();
        let batch = first.poll(10, BLOCK).await.unwrap();
        assert_eq!(batch.len(), 2);
        first.commit(&[batch[0].receipt()]).await.unwrap();
        drop(first);

        let mut second = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        let replayed = second.poll(10, BLOCK).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, batch[1].id);

        second.commit(&[replayed[0].receipt()]).await.unwrap();
        assert!(second.poll(10, BLOCK).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_entries_stay_with_their_member() {
        let broker = MemoryBroker::new(1);
        let mut first = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        broker.publish("task-events", "t1", b"a", AckLevel::All).await.unwrap();
        assert_eq!(first.poll(10, BLOCK).await.unwrap().len(), 1);
        drop(first);

        // Not idle long enough to be taken over.
        let mut other = broker.subscribe(&topics(), "g", "c2").await.unwrap();
        assert!(other.poll(10, BLOCK).await.unwrap().is_empty());

        let mut again = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        let replayed = again.poll(10, BLOCK).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].payload, b"a");
    }

    #[tokio::test]
    async fn idle_pending_entries_are_claimed_by_a_new_member() {
        let broker = MemoryBroker::new(2).with_claim_idle(Duration::ZERO);
        let mut first = broker.subscribe(&topics(), "g", "host-a").await.unwrap();
        broker.publish("task-events", "t1", b"a", AckLevel::All).await.unwrap();
        broker.publish("task-events", "t2", b"b", AckLevel::All).await.unwrap();
        let batch = first.poll(10, BLOCK).await.unwrap();
        assert_eq!(batch.len(), 2);
        drop(first);

        let mut second = broker.subscribe(&topics(), "g", "host-b").await.unwrap();
        let mut claimed = second.poll(10, BLOCK).await.unwrap();
        claimed.sort_by(|a, b| a.id.cmp(&b.id));
        let mut expected = batch.clone();
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(claimed, expected);

        second
            .commit(&claimed.iter().map(Delivery::receipt).collect::<Vec<_>>())
            .await
            .unwrap();
        let mut third = broker.subscribe(&topics(), "g", "host-a").await.unwrap();
        assert!(third.poll(10, BLOCK).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn claim_waits_for_the_idle_threshold() {
        let broker = MemoryBroker::new(1).with_claim_idle(Duration::from_secs(30));
        let mut first = broker.subscribe(&topics(), "g", "c1").await.unwrap();
        broker.publish("task-events", "t1", b"a", AckLevel::All).await.unwrap();
        assert_eq!(first.poll(10, BLOCK).await.unwrap().len(), 1);
        drop(first);

        tokio::time::advance(Duration::from_secs(10)).await;
        let mut early = broker.subscribe(&topics(), "g", "c2").await.unwrap();
        assert!(early.poll(10, BLOCK).await.unwrap().is_empty());
        drop(early);

        tokio::time::advance(Duration::from_secs(30)).await;
        let mut late = broker.subscribe(&topics(), "g", "c2").await.unwrap();
        assert_eq!(late.poll(10, BLOCK).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn groups_are_independent() {
        let broker = MemoryBroker::new(1);
        let mut a = broker.subscribe(&topics(), "ga", "c").await.unwrap();
        let mut b = broker.subscribe(&topics(), "gb", "c").await.unwrap();
        broker.publish("task-events", "t1", b"x", AckLevel::All).await.unwrap();
        assert_eq!(a.poll(10, BLOCK).await.unwrap().len(), 1);
        assert_eq!(b.poll(10, BLOCK).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_fails_later_calls() {
        let broker = MemoryBroker::new(1);
        let mut sub = broker.subscribe(&topics(), "g", "c").await.unwrap();
        broker.shutdown().await;
        assert!(matches!(sub.poll(1, BLOCK).await, Err(BrokerError::Connection(_))));
        assert!(broker.publish("task-events", "k", b"x", AckLevel::All).await.is_err());
    }
}
