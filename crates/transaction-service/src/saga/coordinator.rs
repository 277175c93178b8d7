use std::sync::Arc;
use std::time::Duration;

use common::{CorrelationId, TransactionId, UserId};
use messaging::{
    AuditAction, AuditEnvelope, AuditRollback, AuditStatus, ChangeSet, MessageBus, MessageBusExt,
    subjects,
};

use crate::domain::{CreateTransaction, TransactionDto, TransactionRecord, UpdateTransaction};
use crate::store::{TransactionStore, TransactionUnit};

use super::error::{Result, SagaError};
use super::registry::AckRegistry;

/// Request-scoped metadata forwarded into the audit trail.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Drives the transaction write path as a choreographed saga.
///
/// Local persistence becomes durable if and only if the audit service
/// acknowledges a matching SUCCESS row; on any failure the local transaction
/// is rolled back and a compensation message marks whatever the remote side
/// wrote as ROLLED_BACK.
pub struct TransactionSaga<S, B>
where
    S: TransactionStore,
    B: MessageBus,
{
    store: S,
    bus: Arc<B>,
    registry: AckRegistry,
    service_name: String,
    ack_timeout: Duration,
}

impl<S, B> TransactionSaga<S, B>
where
    S: TransactionStore,
    B: MessageBus,
{
    /// Creates a new saga coordinator.
    ///
    /// The registry's background consumers must be started before the first
    /// operation runs, otherwise every saga times out.
    pub fn new(
        store: S,
        bus: Arc<B>,
        registry: AckRegistry,
        service_name: impl Into<String>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            service_name: service_name.into(),
            ack_timeout,
        }
    }

    /// Creates a transaction row gated on an audit CREATE acknowledgement.
    #[tracing::instrument(skip(self, input, ctx), fields(user_id = %user_id))]
    pub async fn create_transaction(
        &self,
        user_id: UserId,
        input: CreateTransaction,
        ctx: RequestContext,
    ) -> Result<TransactionDto> {
        input.validate().map_err(SagaError::Validation)?;
        metrics::counter!("saga_executions_total").increment(1);
        let start = std::time::Instant::now();

        // 1. Fresh correlation id for this saga
        let correlation_id = CorrelationId::new();

        // 2. Open the local database transaction
        let mut unit = self.store.begin().await?;

        // 3. Stage the insert
        let record = input.into_record(user_id);
        if let Err(e) = unit.insert(&record).await {
            return Err(self.abort(unit, correlation_id, e.to_string()).await);
        }

        // 4. Audit envelope with the after-image
        let envelope = self.envelope(
            AuditAction::Create,
            &record,
            ChangeSet {
                before: None,
                after: Some(record.snapshot()),
            },
            &ctx,
            correlation_id,
        );

        // 5-9. Register, publish, await, commit or compensate
        self.await_audit_and_commit(unit, correlation_id, &envelope)
            .await?;

        metrics::histogram!("saga_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(
            transaction_id = %record.id,
            correlation_id = %correlation_id,
            "transaction created"
        );
        Ok(TransactionDto::from(&record))
    }

    /// Updates a transaction row gated on an audit UPDATE acknowledgement.
    ///
    /// Before/after images are captured from the pre-mutation row.
    #[tracing::instrument(skip(self, patch, ctx), fields(transaction_id = %id, user_id = %user_id))]
    pub async fn update_transaction(
        &self,
        id: TransactionId,
        user_id: UserId,
        patch: UpdateTransaction,
        ctx: RequestContext,
    ) -> Result<TransactionDto> {
        patch.validate().map_err(SagaError::Validation)?;
        metrics::counter!("saga_executions_total").increment(1);
        let start = std::time::Instant::now();

        // 1. Fresh correlation id for this saga
        let correlation_id = CorrelationId::new();

        // 2. Open the local database transaction
        let mut unit = self.store.begin().await?;

        // 3. Load the pre-image and stage the update; a missing or
        //    foreign-owned row fails before any audit request is sent
        let Some(before) = unit.find_for_update(id, user_id).await? else {
            unit.rollback().await?;
            return Err(SagaError::NotFound);
        };
        let after = patch.apply_to(&before);
        if let Err(e) = unit.update(&after).await {
            return Err(self.abort(unit, correlation_id, e.to_string()).await);
        }

        // 4. Audit envelope with both images
        let envelope = self.envelope(
            AuditAction::Update,
            &after,
            ChangeSet {
                before: Some(before.snapshot()),
                after: Some(after.snapshot()),
            },
            &ctx,
            correlation_id,
        );

        // 5-9. Register, publish, await, commit or compensate
        self.await_audit_and_commit(unit, correlation_id, &envelope)
            .await?;

        metrics::histogram!("saga_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(correlation_id = %correlation_id, "transaction updated");
        Ok(TransactionDto::from(&after))
    }

    /// Deletes a transaction row gated on an audit DELETE acknowledgement.
    #[tracing::instrument(skip(self, ctx), fields(transaction_id = %id, user_id = %user_id))]
    pub async fn delete_transaction(
        &self,
        id: TransactionId,
        user_id: UserId,
        ctx: RequestContext,
    ) -> Result<()> {
        metrics::counter!("saga_executions_total").increment(1);
        let start = std::time::Instant::now();

        // 1. Fresh correlation id for this saga
        let correlation_id = CorrelationId::new();

        // 2. Open the local database transaction
        let mut unit = self.store.begin().await?;

        // 3. Capture the before-image and stage the delete
        let Some(before) = unit.find_for_update(id, user_id).await? else {
            unit.rollback().await?;
            return Err(SagaError::NotFound);
        };
        if let Err(e) = unit.delete(id).await {
            return Err(self.abort(unit, correlation_id, e.to_string()).await);
        }

        // 4. Audit envelope with the before-image only
        let envelope = self.envelope(
            AuditAction::Delete,
            &before,
            ChangeSet {
                before: Some(before.snapshot()),
                after: None,
            },
            &ctx,
            correlation_id,
        );

        // 5-9. Register, publish, await, commit or compensate
        self.await_audit_and_commit(unit, correlation_id, &envelope)
            .await?;

        metrics::histogram!("saga_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(correlation_id = %correlation_id, "transaction deleted");
        Ok(())
    }

    fn envelope(
        &self,
        action: AuditAction,
        record: &TransactionRecord,
        changes: ChangeSet,
        ctx: &RequestContext,
        correlation_id: CorrelationId,
    ) -> AuditEnvelope {
        AuditEnvelope {
            action,
            entity_type: "Transaction".to_string(),
            entity_id: record.id.to_string(),
            user_id: Some(record.user_id.to_string()),
            status: AuditStatus::Success,
            metadata: Some(record.summary()),
            changes: Some(changes),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            correlation_id,
            service_name: self.service_name.clone(),
        }
    }

    /// Steps 5-9 shared by every operation: register the waiter, publish the
    /// audit request, await the acknowledgement, then commit or roll back.
    async fn await_audit_and_commit(
        &self,
        unit: Box<dyn TransactionUnit>,
        correlation_id: CorrelationId,
        envelope: &AuditEnvelope,
    ) -> Result<()> {
        // 5. Register before publishing; a co-located consumer can ack
        //    during the publish call itself
        let waiter = self.registry.register(correlation_id, self.ack_timeout);

        // 6. Publish the audit-create request
        if let Err(e) = self
            .bus
            .publish_json(subjects::AUDIT_LOG_CREATE, envelope)
            .await
        {
            drop(waiter);
            return Err(
                self.abort(unit, correlation_id, format!("publish failed: {e}"))
                    .await,
            );
        }

        // 7. Await the acknowledgement within the budget
        if waiter.wait().await {
            // 8. Commit; the in-memory row is now the source of the DTO
            match unit.commit().await {
                Ok(()) => {
                    metrics::counter!("saga_commits_total").increment(1);
                    Ok(())
                }
                Err(e) => {
                    // The local transaction is already gone; compensate the
                    // remote row that was acknowledged.
                    let reason = format!("local commit failed: {e}");
                    self.publish_rollback(correlation_id, &reason).await;
                    metrics::counter!("saga_rollbacks_total").increment(1);
                    Err(SagaError::DistributedTransaction(reason))
                }
            }
        } else {
            // 9. Timeout or explicit failure: roll back and compensate
            Err(self
                .abort(
                    unit,
                    correlation_id,
                    "audit acknowledgement timed out or failed".to_string(),
                )
                .await)
        }
    }

    /// Rolls back the local transaction, publishes compensation, and returns
    /// the saga failure.
    async fn abort(
        &self,
        unit: Box<dyn TransactionUnit>,
        correlation_id: CorrelationId,
        reason: String,
    ) -> SagaError {
        if let Err(e) = unit.rollback().await {
            tracing::error!(correlation_id = %correlation_id, error = %e, "local rollback failed");
        }
        self.publish_rollback(correlation_id, &reason).await;
        metrics::counter!("saga_rollbacks_total").increment(1);
        tracing::warn!(correlation_id = %correlation_id, reason = %reason, "saga rolled back");
        SagaError::DistributedTransaction(reason)
    }

    /// Best-effort compensation publish. A failure here leaves an orphaned
    /// SUCCESS row on the remote side until reconciliation; the saga outcome
    /// is unchanged.
    async fn publish_rollback(&self, correlation_id: CorrelationId, reason: &str) {
        let rollback = AuditRollback {
            correlation_id,
            reason: reason.to_string(),
        };
        if let Err(e) = self
            .bus
            .publish_json(subjects::AUDIT_LOG_ROLLBACK, &rollback)
            .await
        {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "compensation publish failed; remote audit row may be orphaned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, TransactionStatus};
    use crate::store::InMemoryTransactionStore;
    use common::AuditLogId;
    use futures_util::StreamExt;
    use messaging::{AuditAck, AuditFail, InMemoryMessageBus};
    use std::time::Duration;

    const ACK_TIMEOUT: Duration = Duration::from_millis(200);

    fn create_input(amount: &str) -> CreateTransaction {
        CreateTransaction {
            amount: amount.parse().unwrap(),
            currency: Currency::Usd,
            description: Some("Test".to_string()),
            metadata: None,
        }
    }

    async fn setup() -> (
        TransactionSaga<InMemoryTransactionStore, InMemoryMessageBus>,
        InMemoryTransactionStore,
        Arc<InMemoryMessageBus>,
        AckRegistry,
    ) {
        let store = InMemoryTransactionStore::new();
        let bus = Arc::new(InMemoryMessageBus::new());
        let registry = AckRegistry::new();
        registry.start(bus.clone()).await.unwrap();

        let saga = TransactionSaga::new(
            store.clone(),
            bus.clone(),
            registry.clone(),
            "transaction-service",
            ACK_TIMEOUT,
        );
        (saga, store, bus, registry)
    }

    /// Acks every audit-create request, standing in for a healthy audit
    /// service. Returns the envelopes it saw.
    fn spawn_responder(bus: Arc<InMemoryMessageBus>) {
        tokio::spawn(async move {
            let mut sub = bus
                .subscribe(subjects::AUDIT_LOG_CREATE, "fake-audit")
                .await
                .unwrap();
            while let Some(msg) = sub.next().await {
                let envelope: AuditEnvelope = msg.decode().unwrap();
                bus.publish_json(
                    subjects::AUDIT_LOG_CREATED,
                    &AuditAck::new(envelope.correlation_id, AuditLogId::new()),
                )
                .await
                .unwrap();
            }
        });
    }

    /// Rejects every audit-create request.
    fn spawn_failing_responder(bus: Arc<InMemoryMessageBus>) {
        tokio::spawn(async move {
            let mut sub = bus
                .subscribe(subjects::AUDIT_LOG_CREATE, "fake-audit")
                .await
                .unwrap();
            while let Some(msg) = sub.next().await {
                let envelope: AuditEnvelope = msg.decode().unwrap();
                bus.publish_json(
                    subjects::AUDIT_LOG_FAILED,
                    &AuditFail::new(envelope.correlation_id, "insert failed"),
                )
                .await
                .unwrap();
            }
        });
    }

    fn decoded_envelopes(bus: &InMemoryMessageBus) -> Vec<AuditEnvelope> {
        bus.published_payloads(subjects::AUDIT_LOG_CREATE)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn happy_create_commits_and_publishes_one_envelope() {
        let (saga, store, bus, _) = setup().await;
        spawn_responder(bus.clone());

        let dto = saga
            .create_transaction(UserId::new(), create_input("100.50"), RequestContext::default())
            .await
            .unwrap();

        assert_eq!(dto.amount, "100.50");
        assert_eq!(dto.status, TransactionStatus::Pending);
        assert_eq!(store.row_count().await, 1);

        let envelopes = decoded_envelopes(&bus);
        assert_eq!(envelopes.len(), 1);
        let env = &envelopes[0];
        assert_eq!(env.action, AuditAction::Create);
        assert_eq!(env.entity_type, "Transaction");
        assert_eq!(env.entity_id, dto.id.to_string());
        let changes = env.changes.as_ref().unwrap();
        assert!(changes.before.is_none());
        assert_eq!(changes.after.as_ref().unwrap()["amount"], "100.50");

        assert_eq!(bus.published_count(subjects::AUDIT_LOG_ROLLBACK), 0);
    }

    #[tokio::test]
    async fn happy_update_captures_both_images() {
        let (saga, store, bus, _) = setup().await;
        spawn_responder(bus.clone());
        let user_id = UserId::new();

        let created = saga
            .create_transaction(user_id, create_input("100.50"), RequestContext::default())
            .await
            .unwrap();

        let patch = UpdateTransaction {
            amount: Some("150.75".parse().unwrap()),
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        let updated = saga
            .update_transaction(created.id, user_id, patch, RequestContext::default())
            .await
            .unwrap();

        assert_eq!(updated.amount, "150.75");
        assert_eq!(updated.status, TransactionStatus::Completed);

        let stored = store.find(created.id, user_id).await.unwrap().unwrap();
        assert_eq!(stored.amount.to_string(), "150.75");

        let envelopes = decoded_envelopes(&bus);
        assert_eq!(envelopes.len(), 2);
        let update_env = &envelopes[1];
        assert_eq!(update_env.action, AuditAction::Update);
        let changes = update_env.changes.as_ref().unwrap();
        assert_eq!(changes.before.as_ref().unwrap()["amount"], "100.50");
        assert_eq!(changes.after.as_ref().unwrap()["amount"], "150.75");
        assert_eq!(changes.after.as_ref().unwrap()["status"], "COMPLETED");
    }

    #[tokio::test]
    async fn happy_delete_captures_before_image() {
        let (saga, store, bus, _) = setup().await;
        spawn_responder(bus.clone());
        let user_id = UserId::new();

        let created = saga
            .create_transaction(user_id, create_input("100.50"), RequestContext::default())
            .await
            .unwrap();
        saga.delete_transaction(created.id, user_id, RequestContext::default())
            .await
            .unwrap();

        assert_eq!(store.row_count().await, 0);

        let envelopes = decoded_envelopes(&bus);
        let delete_env = &envelopes[1];
        assert_eq!(delete_env.action, AuditAction::Delete);
        let changes = delete_env.changes.as_ref().unwrap();
        assert_eq!(changes.before.as_ref().unwrap()["amount"], "100.50");
        assert!(changes.after.is_none());
    }

    #[tokio::test]
    async fn timeout_rolls_back_and_publishes_compensation() {
        // no responder: the waiter must time out
        let (saga, store, bus, _) = setup().await;

        let result = saga
            .create_transaction(UserId::new(), create_input("200.00"), RequestContext::default())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, SagaError::DistributedTransaction(_)));
        assert!(
            err.to_string()
                .contains("Audit log creation failed or timed out")
        );
        assert_eq!(store.row_count().await, 0);
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_ROLLBACK), 1);

        let rollback: AuditRollback =
            serde_json::from_slice(&bus.published_payloads(subjects::AUDIT_LOG_ROLLBACK)[0])
                .unwrap();
        let envelope: AuditEnvelope =
            serde_json::from_slice(&bus.published_payloads(subjects::AUDIT_LOG_CREATE)[0])
                .unwrap();
        assert_eq!(rollback.correlation_id, envelope.correlation_id);
    }

    #[tokio::test]
    async fn consumer_failure_rolls_back() {
        let (saga, store, bus, _) = setup().await;
        spawn_failing_responder(bus.clone());

        let result = saga
            .create_transaction(UserId::new(), create_input("10.00"), RequestContext::default())
            .await;

        assert!(matches!(result, Err(SagaError::DistributedTransaction(_))));
        assert_eq!(store.row_count().await, 0);
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_ROLLBACK), 1);
    }

    #[tokio::test]
    async fn publish_failure_rolls_back_without_waiting() {
        let (saga, store, bus, registry) = setup().await;
        bus.set_fail_publish(subjects::AUDIT_LOG_CREATE, true);

        let started = std::time::Instant::now();
        let result = saga
            .create_transaction(UserId::new(), create_input("10.00"), RequestContext::default())
            .await;

        assert!(matches!(result, Err(SagaError::DistributedTransaction(_))));
        // failed fast rather than waiting out the ack budget
        assert!(started.elapsed() < ACK_TIMEOUT);
        assert_eq!(store.row_count().await, 0);
        assert_eq!(registry.pending(), 0);
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_ROLLBACK), 1);
    }

    #[tokio::test]
    async fn validation_failure_publishes_nothing() {
        let (saga, store, bus, _) = setup().await;

        let result = saga
            .create_transaction(UserId::new(), create_input("-100"), RequestContext::default())
            .await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(store.row_count().await, 0);
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_CREATE), 0);
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_ROLLBACK), 0);
    }

    #[tokio::test]
    async fn empty_patch_is_rejected_before_any_work() {
        let (saga, _, bus, _) = setup().await;

        let result = saga
            .update_transaction(
                TransactionId::new(),
                UserId::new(),
                UpdateTransaction::default(),
                RequestContext::default(),
            )
            .await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_CREATE), 0);
    }

    #[tokio::test]
    async fn update_of_missing_row_sends_no_audit_request() {
        let (saga, _, bus, _) = setup().await;

        let patch = UpdateTransaction {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        let result = saga
            .update_transaction(TransactionId::new(), UserId::new(), patch, RequestContext::default())
            .await;

        assert!(matches!(result, Err(SagaError::NotFound)));
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_CREATE), 0);
        assert_eq!(bus.published_count(subjects::AUDIT_LOG_ROLLBACK), 0);
    }

    #[tokio::test]
    async fn foreign_owned_row_collapses_to_not_found() {
        let (saga, _, bus, _) = setup().await;
        spawn_responder(bus.clone());

        let created = saga
            .create_transaction(UserId::new(), create_input("10.00"), RequestContext::default())
            .await
            .unwrap();

        let other_user = UserId::new();
        let result = saga
            .delete_transaction(created.id, other_user, RequestContext::default())
            .await;
        assert!(matches!(result, Err(SagaError::NotFound)));
    }

    #[tokio::test]
    async fn concurrent_creates_produce_distinct_correlation_ids() {
        let (saga, store, bus, _) = setup().await;
        spawn_responder(bus.clone());
        let saga = Arc::new(saga);
        let user_id = UserId::new();

        let mut handles = Vec::new();
        for i in 0..5 {
            let saga = saga.clone();
            handles.push(tokio::spawn(async move {
                saga.create_transaction(
                    user_id,
                    create_input(&format!("10{i}.00")),
                    RequestContext::default(),
                )
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.row_count().await, 5);

        let envelopes = decoded_envelopes(&bus);
        let mut ids: Vec<_> = envelopes.iter().map(|e| e.correlation_id).collect();
        ids.sort_by_key(|id| id.as_uuid());
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }
}
