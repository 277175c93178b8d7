//! Audit consumer and compensator.
//!
//! Owns the audit store's write side: translates `audit.log.create`
//! messages into rows and answers each with exactly one ack or fail;
//! translates `audit.log.rollback` messages into ROLLED_BACK transitions.

use std::sync::Arc;

use futures_util::StreamExt;
use messaging::{
    AuditAck, AuditEnvelope, AuditFail, AuditRollback, BusMessage, MessageBus, MessageBusExt,
    subjects,
};
use tokio::task::JoinHandle;

use crate::model::AuditLogRecord;
use crate::store::{AuditStore, AuditStoreError};

/// Durable consumer names registered on the stream.
const CREATE_CONSUMER: &str = "audit-consumer";
const ROLLBACK_CONSUMER: &str = "audit-compensator";

/// Long-lived consumer pair over the audit subjects.
pub struct AuditConsumer<S, B>
where
    S: AuditStore,
    B: MessageBus,
{
    store: S,
    bus: Arc<B>,
}

impl<S, B> AuditConsumer<S, B>
where
    S: AuditStore + Clone + 'static,
    B: MessageBus + 'static,
{
    pub fn new(store: S, bus: Arc<B>) -> Self {
        Self { store, bus }
    }

    /// Starts the create loop and the rollback loop. Both subscriptions are
    /// established before this returns.
    pub async fn start(&self) -> messaging::Result<Vec<JoinHandle<()>>> {
        let mut creates = self.bus.subscribe(subjects::AUDIT_LOG_CREATE, CREATE_CONSUMER).await?;
        let mut rollbacks = self
            .bus
            .subscribe(subjects::AUDIT_LOG_ROLLBACK, ROLLBACK_CONSUMER)
            .await?;

        let store = self.store.clone();
        let bus = self.bus.clone();
        let create_task = tokio::spawn(async move {
            while let Some(msg) = creates.next().await {
                handle_create(&store, bus.as_ref(), &msg).await;
                if let Err(e) = msg.ack().await {
                    tracing::warn!(error = %e, "failed to ack create request");
                }
            }
            tracing::debug!("create consumer stopped");
        });

        let store = self.store.clone();
        let rollback_task = tokio::spawn(async move {
            while let Some(msg) = rollbacks.next().await {
                handle_rollback(&store, &msg).await;
                if let Err(e) = msg.ack().await {
                    tracing::warn!(error = %e, "failed to ack rollback request");
                }
            }
            tracing::debug!("rollback consumer stopped");
        });

        Ok(vec![create_task, rollback_task])
    }
}

/// Writes one row per create request and publishes exactly one ack or fail.
///
/// Duplicate redelivery maps to "already written": the existing row id is
/// re-acked and nothing new is stored.
async fn handle_create<S: AuditStore, B: MessageBus>(store: &S, bus: &B, msg: &BusMessage) {
    let envelope: AuditEnvelope = match msg.decode() {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable audit request");
            return;
        }
    };
    let correlation_id = envelope.correlation_id;

    if let Err(reason) = envelope.validate() {
        tracing::warn!(%correlation_id, %reason, "rejecting invalid audit request");
        publish_fail(bus, AuditFail::new(correlation_id, reason)).await;
        return;
    }

    let record = AuditLogRecord::from_envelope(envelope);
    match store.insert(&record).await {
        Ok(id) => {
            metrics::counter!("audit_rows_written_total").increment(1);
            tracing::info!(%correlation_id, audit_log_id = %id, "audit row written");
            publish_ack(bus, AuditAck::new(correlation_id, id)).await;
        }
        Err(AuditStoreError::Duplicate { existing }) => {
            tracing::info!(
                %correlation_id,
                audit_log_id = %existing,
                "duplicate delivery, re-acking existing row"
            );
            publish_ack(bus, AuditAck::new(correlation_id, existing)).await;
        }
        Err(e) => {
            metrics::counter!("audit_row_failures_total").increment(1);
            tracing::error!(%correlation_id, error = %e, "audit row write failed");
            publish_fail(bus, AuditFail::new(correlation_id, e.to_string())).await;
        }
    }
}

/// Marks every row sharing the correlation id ROLLED_BACK. Re-processing
/// the same rollback finds nothing left to transition.
async fn handle_rollback<S: AuditStore>(store: &S, msg: &BusMessage) {
    let rollback: AuditRollback = match msg.decode() {
        Ok(rollback) => rollback,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable rollback request");
            return;
        }
    };

    match store.mark_rolled_back(rollback.correlation_id).await {
        Ok(affected) => {
            metrics::counter!("audit_rollbacks_total").increment(affected);
            tracing::info!(
                correlation_id = %rollback.correlation_id,
                reason = %rollback.reason,
                affected,
                "compensation applied"
            );
        }
        Err(e) => {
            // the message stays unprocessed-equivalent; redelivery retries
            tracing::error!(
                correlation_id = %rollback.correlation_id,
                error = %e,
                "compensation failed"
            );
        }
    }
}

/// If the ack cannot be published the coordinator times out and issues a
/// rollback, which the compensator then applies to this row.
async fn publish_ack<B: MessageBus>(bus: &B, ack: AuditAck) {
    if let Err(e) = bus.publish_json(subjects::AUDIT_LOG_CREATED, &ack).await {
        tracing::error!(
            correlation_id = %ack.correlation_id,
            error = %e,
            "failed to publish acknowledgement"
        );
    }
}

async fn publish_fail<B: MessageBus>(bus: &B, fail: AuditFail) {
    if let Err(e) = bus.publish_json(subjects::AUDIT_LOG_FAILED, &fail).await {
        tracing::error!(
            correlation_id = %fail.correlation_id,
            error = %e,
            "failed to publish failure notice"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAuditStore;
    use common::CorrelationId;
    use messaging::{AuditAction, AuditStatus, ChangeSet, InMemoryMessageBus};

    fn envelope(correlation_id: CorrelationId) -> AuditEnvelope {
        AuditEnvelope {
            action: AuditAction::Create,
            entity_type: "Transaction".to_string(),
            entity_id: "t1".to_string(),
            user_id: Some("u1".to_string()),
            status: AuditStatus::Success,
            metadata: None,
            changes: Some(ChangeSet {
                before: None,
                after: Some(serde_json::json!({"amount": "100.50"})),
            }),
            ip_address: None,
            user_agent: None,
            correlation_id,
            service_name: "transaction-service".to_string(),
        }
    }

    async fn setup() -> (InMemoryAuditStore, Arc<InMemoryMessageBus>) {
        let store = InMemoryAuditStore::new();
        let bus = Arc::new(InMemoryMessageBus::new());
        let consumer = AuditConsumer::new(store.clone(), bus.clone());
        consumer.start().await.unwrap();
        (store, bus)
    }

    async fn publish_and_settle<T: serde::Serialize + Sync>(
        bus: &InMemoryMessageBus,
        subject: &str,
        value: &T,
    ) {
        bus.publish_json(subject, value).await.unwrap();
        // give the consumer task a turn
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    fn acks(bus: &InMemoryMessageBus) -> Vec<AuditAck> {
        bus.published_payloads(subjects::AUDIT_LOG_CREATED)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    fn fails(bus: &InMemoryMessageBus) -> Vec<AuditFail> {
        bus.published_payloads(subjects::AUDIT_LOG_FAILED)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn create_request_writes_row_and_acks() {
        let (store, bus) = setup().await;
        let correlation_id = CorrelationId::new();

        publish_and_settle(&bus, subjects::AUDIT_LOG_CREATE, &envelope(correlation_id)).await;

        assert_eq!(store.row_count().await, 1);
        let acks = acks(&bus);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].correlation_id, correlation_id);
        assert!(acks[0].success);

        let stored = store.find_by_id(acks[0].audit_log_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuditStatus::Success);
        assert_eq!(stored.correlation_id, correlation_id);
    }

    #[tokio::test]
    async fn duplicate_delivery_re_acks_without_second_row() {
        let (store, bus) = setup().await;
        let correlation_id = CorrelationId::new();
        let env = envelope(correlation_id);

        publish_and_settle(&bus, subjects::AUDIT_LOG_CREATE, &env).await;
        publish_and_settle(&bus, subjects::AUDIT_LOG_CREATE, &env).await;

        assert_eq!(store.row_count().await, 1);
        let acks = acks(&bus);
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].audit_log_id, acks[1].audit_log_id);
    }

    #[tokio::test]
    async fn invalid_envelope_publishes_fail_and_stores_nothing() {
        let (store, bus) = setup().await;
        let correlation_id = CorrelationId::new();
        let mut env = envelope(correlation_id);
        env.entity_type = String::new();

        publish_and_settle(&bus, subjects::AUDIT_LOG_CREATE, &env).await;

        assert_eq!(store.row_count().await, 0);
        let fails = fails(&bus);
        assert_eq!(fails.len(), 1);
        assert_eq!(fails[0].correlation_id, correlation_id);
        assert!(!fails[0].success);
    }

    #[tokio::test]
    async fn persistence_failure_publishes_fail() {
        let (store, bus) = setup().await;
        store.set_fail_inserts(true);
        let correlation_id = CorrelationId::new();

        publish_and_settle(&bus, subjects::AUDIT_LOG_CREATE, &envelope(correlation_id)).await;

        assert_eq!(store.row_count().await, 0);
        assert_eq!(fails(&bus).len(), 1);
        assert!(acks(&bus).is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped() {
        let (store, bus) = setup().await;
        bus.publish(subjects::AUDIT_LOG_CREATE, b"not json".to_vec())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(store.row_count().await, 0);
        assert!(acks(&bus).is_empty());
        assert!(fails(&bus).is_empty());
    }

    #[tokio::test]
    async fn rollback_marks_all_rows_and_is_idempotent() {
        let (store, bus) = setup().await;
        let correlation_id = CorrelationId::new();
        publish_and_settle(&bus, subjects::AUDIT_LOG_CREATE, &envelope(correlation_id)).await;

        let rollback = AuditRollback {
            correlation_id,
            reason: "audit acknowledgement timed out or failed".to_string(),
        };
        publish_and_settle(&bus, subjects::AUDIT_LOG_ROLLBACK, &rollback).await;

        let rows = store.find_by_correlation(correlation_id).await.unwrap();
        assert!(rows.iter().all(|r| r.status == AuditStatus::RolledBack));

        // second delivery leaves the store unchanged
        publish_and_settle(&bus, subjects::AUDIT_LOG_ROLLBACK, &rollback).await;
        let rows_after = store.find_by_correlation(correlation_id).await.unwrap();
        assert_eq!(rows, rows_after);
    }

    #[tokio::test]
    async fn rollback_for_unknown_correlation_is_a_no_op() {
        let (store, bus) = setup().await;
        let rollback = AuditRollback {
            correlation_id: CorrelationId::new(),
            reason: "late".to_string(),
        };
        publish_and_settle(&bus, subjects::AUDIT_LOG_ROLLBACK, &rollback).await;
        assert_eq!(store.row_count().await, 0);
    }
}
