use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{BusError, Result};

/// A stream of messages delivered to one subscription.
pub type Subscription = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// Acknowledges a delivered message back to the broker.
///
/// The in-memory bus has nothing to acknowledge; the JetStream bus must ack
/// or the broker redelivers.
#[async_trait]
pub trait MessageAcker: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// One message delivered on a subscription.
pub struct BusMessage {
    subject: String,
    payload: Bytes,
    acker: Option<Box<dyn MessageAcker>>,
}

impl BusMessage {
    /// Builds a message with no broker acknowledgement (in-memory delivery).
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            acker: None,
        }
    }

    /// Builds a message that must be acknowledged back to the broker.
    pub fn with_acker(
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
        acker: Box<dyn MessageAcker>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            acker: Some(acker),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deserializes the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Acknowledges the message; a no-op for in-memory delivery.
    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Core trait for the durable stream layer.
///
/// One instance is shared per process; publishes are multiplexed over the
/// single broker connection. All implementations must be thread-safe.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a payload on a subject with at-least-once semantics.
    ///
    /// Returns only once the stream has accepted the message; a publish
    /// failure must be treated by callers as operation failure.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Creates a durable subscription on a subject.
    ///
    /// `durable_name` identifies the consumer across reconnects; messages
    /// not yet acknowledged under that name are redelivered.
    async fn subscribe(&self, subject: &str, durable_name: &str) -> Result<Subscription>;

    /// Closes the bus, letting in-flight publishes drain where possible.
    async fn close(&self) -> Result<()>;
}

/// Convenience methods for every [`MessageBus`].
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Serializes a value as JSON and publishes it.
    async fn publish_json<T: Serialize + Sync>(&self, subject: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish(subject, payload).await
    }
}

impl<T: MessageBus + ?Sized> MessageBusExt for T {}
