use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, stream};
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::bus::{BusMessage, MessageAcker, MessageBus, Subscription};
use crate::error::{BusError, Result};
use crate::subjects;

/// NATS JetStream-backed message bus.
///
/// One shared connection per process. The durable stream is created (or
/// looked up) at connect time, so the retention window exists before either
/// service publishes. The client reconnects indefinitely with backoff;
/// publishes issued while disconnected fail fast and surface as
/// [`BusError::Publish`], which sagas treat as operation failure.
pub struct NatsMessageBus {
    client: async_nats::Client,
    context: jetstream::Context,
    stream_name: String,
}

impl NatsMessageBus {
    /// Connects to the broker and ensures the audit stream exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .reconnect_delay_callback(|_attempts| Duration::from_secs(1))
            .connect(url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;

        let context = jetstream::new(client.clone());
        context
            .get_or_create_stream(stream::Config {
                name: subjects::STREAM_NAME.to_string(),
                subjects: vec![subjects::STREAM_WILDCARD.to_string()],
                max_age: subjects::STREAM_MAX_AGE,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;

        Ok(Self {
            client,
            context,
            stream_name: subjects::STREAM_NAME.to_string(),
        })
    }
}

struct JetStreamAcker(jetstream::Message);

#[async_trait]
impl MessageAcker for JetStreamAcker {
    async fn ack(&self) -> Result<()> {
        self.0.ack().await.map_err(|e| BusError::Ack(e.to_string()))
    }
}

#[async_trait]
impl MessageBus for NatsMessageBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        // double await: the outer submits, the inner is the stream's ack
        let publish_err = |e: String| BusError::Publish {
            subject: subject.to_string(),
            reason: e,
        };
        self.context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| publish_err(e.to_string()))?
            .await
            .map_err(|e| publish_err(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str, durable_name: &str) -> Result<Subscription> {
        let subscribe_err = |e: String| BusError::Subscribe {
            subject: subject.to_string(),
            reason: e,
        };

        let stream = self
            .context
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| subscribe_err(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                durable_name,
                pull::Config {
                    durable_name: Some(durable_name.to_string()),
                    filter_subject: subject.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| subscribe_err(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| subscribe_err(e.to_string()))?;

        let stream = messages.filter_map(|delivery| async move {
            match delivery {
                Ok(message) => {
                    let subject = message.subject.to_string();
                    let payload = message.payload.clone();
                    Some(BusMessage::with_acker(
                        subject,
                        payload,
                        Box::new(JetStreamAcker(message)),
                    ))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undeliverable stream message");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        // flush lets in-flight acks and publishes reach the broker first
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        Ok(())
    }
}
