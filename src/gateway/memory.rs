//! In-memory transport for tests and local development.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::transport::{Transport, TransportError};

/// Process-local [`Transport`] built on flume channels.
///
/// Faithful to the at-least-once contract in the ways tests care about:
/// subscribers fan out, published payloads are retained so a test can
/// [`redeliver`](Self::redeliver) them to simulate duplicate delivery, and
/// [`fail_next`](Self::fail_next) injects publish failures to exercise the
/// gateway's backoff and exhaustion paths.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    topics: Mutex<FxHashMap<String, Topic>>,
    fail_next: AtomicU32,
}

#[derive(Debug, Default)]
struct Topic {
    subscribers: Vec<flume::Sender<Vec<u8>>>,
    log: Vec<Vec<u8>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publishes fail (any channel).
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Re-deliver the most recent payload published on `channel` to all
    /// current subscribers, simulating duplicate delivery by the fabric.
    pub fn redeliver(&self, channel: &str) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get_mut(channel)
            && let Some(payload) = topic.log.last().cloned()
        {
            topic
                .subscribers
                .retain(|tx| tx.send(payload.clone()).is_ok());
        }
    }

    /// Number of acknowledged publishes on `channel`.
    #[must_use]
    pub fn published_count(&self, channel: &str) -> usize {
        self.topics
            .lock()
            .get(channel)
            .map_or(0, |t| t.log.len())
    }

    /// Payloads acknowledged on `channel`, in publish order.
    #[must_use]
    pub fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        self.topics
            .lock()
            .get(channel)
            .map_or_else(Vec::new, |t| t.log.clone())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let failures = self.fail_next.load(Ordering::SeqCst);
        if failures > 0
            && self
                .fail_next
                .compare_exchange(failures, failures - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(TransportError::new("injected publish failure"));
        }

        let mut topics = self.topics.lock();
        let topic = topics.entry(channel.to_string()).or_default();
        topic.log.push(payload.clone());
        topic
            .subscribers
            .retain(|tx| tx.send(payload.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> flume::Receiver<Vec<u8>> {
        let (tx, rx) = flume::unbounded();
        self.topics
            .lock()
            .entry(channel.to_string())
            .or_default()
            .subscribers
            .push(tx);
        rx
    }
}
