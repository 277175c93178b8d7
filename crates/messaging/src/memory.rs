use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::bus::{BusMessage, MessageBus, Subscription};
use crate::error::{BusError, Result};

#[derive(Default)]
struct InMemoryBusState {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>,
    published: Vec<(String, Bytes)>,
    fail_subjects: HashSet<String>,
    closed: bool,
}

/// In-memory message bus for testing.
///
/// Fan-out is per exact subject; every subscriber receives every message
/// published after it subscribed. The published log and the per-subject
/// failure switch let tests script broker behavior the same way the
/// in-memory stores script persistence failures.
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    state: Arc<Mutex<InMemoryBusState>>,
}

impl InMemoryMessageBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish on `subject` fail, simulating a broker outage.
    pub fn set_fail_publish(&self, subject: &str, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.fail_subjects.insert(subject.to_string());
        } else {
            state.fail_subjects.remove(subject);
        }
    }

    /// Number of messages published on `subject` so far.
    pub fn published_count(&self, subject: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(s, _)| s == subject)
            .count()
    }

    /// Payloads published on `subject`, in publish order.
    pub fn published_payloads(&self, subject: &str) -> Vec<Bytes> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BusError::Closed);
        }
        if state.fail_subjects.contains(subject) {
            return Err(BusError::Publish {
                subject: subject.to_string(),
                reason: "simulated broker failure".to_string(),
            });
        }

        let payload = Bytes::from(payload);
        state.published.push((subject.to_string(), payload.clone()));

        if let Some(senders) = state.subscribers.get_mut(subject) {
            // drop subscribers whose receiving side has gone away
            senders.retain(|tx| tx.send(BusMessage::new(subject, payload.clone())).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str, _durable_name: &str) -> Result<Subscription> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BusError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        // dropping the senders ends every subscription stream
        state.subscribers.clear();
        Ok(())
    }
}
