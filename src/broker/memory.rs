use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

use super::message::{Headers, Message};
use super::traits::{BrokerError, MessageSource, Producer};

/// Per-group read state on one topic.
#[derive(Debug, Default, Clone, Copy)]
struct GroupOffsets {
    /// Next offset handed out by `fetch`
    position: u64,
    /// Everything below this offset is committed
    committed: u64,
}

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<Message>,
    groups: HashMap<String, GroupOffsets>,
}

/// In-process broker with append-only topics and per-group offsets.
///
/// Fetching advances a group's cursor; committing advances its committed
/// offset. Uncommitted messages are only seen again after [`rewind`],
/// which is what a real broker does on restart or rebalance.
///
/// [`rewind`]: MemoryBroker::rewind
#[derive(Debug, Default)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, TopicLog>>,
    appended: Notify,
    scripted_failures: Mutex<HashMap<String, VecDeque<BrokerError>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a consumer group to a topic.
    pub fn subscribe(
        self: &Arc<Self>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> MemorySubscription {
        MemorySubscription {
            broker: Arc::clone(self),
            topic: topic.into(),
            group: group.into(),
        }
    }

    /// Fail the next publishes to `topic` with these errors, in order.
    pub fn fail_next_publishes(
        &self,
        topic: &str,
        errors: impl IntoIterator<Item = BrokerError>,
    ) {
        self.scripted_failures
            .lock()
            .entry(topic.to_string())
            .or_default()
            .extend(errors);
    }

    /// All messages ever appended to `topic`.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.topics
            .lock()
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Committed offset of `group` on `topic`.
    pub fn committed_offset(&self, topic: &str, group: &str) -> u64 {
        self.topics
            .lock()
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map(|offsets| offsets.committed)
            .unwrap_or(0)
    }

    /// Move the group's cursor back to its committed offset so that every
    /// uncommitted message is delivered again.
    pub fn rewind(&self, topic: &str, group: &str) {
        {
            let mut topics = self.topics.lock();
            let log = topics.entry(topic.to_string()).or_default();
            let offsets = log.groups.entry(group.to_string()).or_default();
            offsets.position = offsets.committed;
        }
        self.appended.notify_waiters();
    }

    fn try_fetch(&self, topic: &str, group: &str) -> Option<Message> {
        let mut topics = self.topics.lock();
        let log = topics.get_mut(topic)?;
        let offsets = log.groups.entry(group.to_string()).or_default();
        let message = log.messages.get(offsets.position as usize)?.clone();
        offsets.position += 1;
        Some(message)
    }

    fn commit_offset(&self, topic: &str, group: &str, offset: u64) {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        let offsets = log.groups.entry(group.to_string()).or_default();
        offsets.committed = offsets.committed.max(offset + 1);
    }
}

#[async_trait]
impl Producer for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: Bytes,
        payload: Bytes,
        headers: Headers,
    ) -> Result<(), BrokerError> {
        let scripted = self
            .scripted_failures
            .lock()
            .get_mut(topic)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        {
            let mut topics = self.topics.lock();
            let log = topics.entry(topic.to_string()).or_default();
            let offset = log.messages.len() as u64;
            log.messages.push(Message {
                topic: topic.to_string(),
                offset,
                key,
                payload,
                headers,
                timestamp: Utc::now(),
            });
        }
        self.appended.notify_waiters();

        Ok(())
    }
}

/// A consumer group's view of one topic on a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemorySubscription {
    broker: Arc<MemoryBroker>,
    topic: String,
    group: String,
}

#[async_trait]
impl MessageSource for MemorySubscription {
    async fn fetch(&self) -> Result<Message, BrokerError> {
        loop {
            // Register interest before checking so an append in between is not missed.
            let appended = self.broker.appended.notified();
            if let Some(message) = self.broker.try_fetch(&self.topic, &self.group) {
                return Ok(message);
            }
            appended.await;
        }
    }

    async fn commit(&self, message: &Message) -> Result<(), BrokerError> {
        self.broker
            .commit_offset(&self.topic, &self.group, message.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message::Header;
    use std::time::Duration;

    async fn publish(broker: &MemoryBroker, topic: &str, key: &'static str) {
        broker
            .publish(
                topic,
                Bytes::from_static(key.as_bytes()),
                Bytes::from_static(b"{}"),
                vec![Header::new("h", "v")],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_in_order() {
        let broker = Arc::new(MemoryBroker::new());
        publish(&broker, "t", "a").await;
        publish(&broker, "t", "b").await;

        let sub = broker.subscribe("t", "g");
        assert_eq!(sub.fetch().await.unwrap().key_str(), "a");
        assert_eq!(sub.fetch().await.unwrap().key_str(), "b");
    }

    #[tokio::test]
    async fn test_fetch_waits_for_publish() {
        let broker = Arc::new(MemoryBroker::new());
        let sub = broker.subscribe("t", "g");

        let waiter = tokio::spawn(async move { sub.fetch().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publish(&broker, "t", "late").await;

        let message = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(message.key_str(), "late");
    }

    #[tokio::test]
    async fn test_fetch_is_woken_by_append() {
        let broker = Arc::new(MemoryBroker::new());
        let sub = broker.subscribe("t", "g");

        let mut fetch = tokio_test::task::spawn(sub.fetch());
        tokio_test::assert_pending!(fetch.poll());

        publish(&broker, "t", "a").await;

        assert!(fetch.is_woken());
        let message = tokio_test::assert_ready_ok!(fetch.poll());
        assert_eq!(message.key_str(), "a");
    }

    #[tokio::test]
    async fn test_rewind_redelivers_uncommitted() {
        let broker = Arc::new(MemoryBroker::new());
        publish(&broker, "t", "a").await;
        publish(&broker, "t", "b").await;

        let sub = broker.subscribe("t", "g");
        let first = sub.fetch().await.unwrap();
        sub.commit(&first).await.unwrap();
        let _second = sub.fetch().await.unwrap();

        assert_eq!(broker.committed_offset("t", "g"), 1);

        broker.rewind("t", "g");
        assert_eq!(sub.fetch().await.unwrap().key_str(), "b");
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let broker = Arc::new(MemoryBroker::new());
        publish(&broker, "t", "a").await;

        let one = broker.subscribe("t", "g1");
        let two = broker.subscribe("t", "g2");
        let message = one.fetch().await.unwrap();
        one.commit(&message).await.unwrap();

        assert_eq!(two.fetch().await.unwrap().key_str(), "a");
        assert_eq!(broker.committed_offset("t", "g2"), 0);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let broker = MemoryBroker::new();
        broker.fail_next_publishes("t", [BrokerError::Timeout]);

        let err = broker
            .publish("t", Bytes::new(), Bytes::new(), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::Timeout);
        assert!(broker.messages("t").is_empty());

        publish(&broker, "t", "ok").await;
        assert_eq!(broker.messages("t").len(), 1);
    }
}
