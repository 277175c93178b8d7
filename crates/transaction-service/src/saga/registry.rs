use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::CorrelationId;
use futures_util::StreamExt;
use messaging::{AuditAck, AuditFail, BusMessage, MessageBus, subjects};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct PendingAck {
    token: u64,
    tx: oneshot::Sender<bool>,
}

type WaiterMap = Arc<Mutex<HashMap<CorrelationId, PendingAck>>>;

/// Process-wide map from correlation id to the saga waiting on that id.
///
/// One shared subscription on the ack subject and one on the failure subject
/// multiplex every in-flight saga; sagas never subscribe individually. The
/// background consumers only do a map lookup and a channel send, never I/O,
/// so they cannot back-pressure publishers.
#[derive(Clone, Default)]
pub struct AckRegistry {
    waiters: WaiterMap,
    next_token: Arc<AtomicU64>,
}

/// A one-shot handle to a pending acknowledgement.
///
/// Resolves `true` on ack, `false` on failure, timeout, or registry
/// shutdown. Dropping the waiter without awaiting it deregisters the entry.
pub struct AckWaiter {
    id: CorrelationId,
    token: u64,
    rx: Option<oneshot::Receiver<bool>>,
    timeout: Duration,
    waiters: WaiterMap,
}

impl AckWaiter {
    /// Waits for the acknowledgement within the registered budget.
    pub async fn wait(mut self) -> bool {
        let Some(rx) = self.rx.take() else {
            return false;
        };
        match tokio::time::timeout(self.timeout, rx).await {
            // resolved by the ack or failure consumer
            Ok(Ok(success)) => success,
            // sender dropped: shutdown, or overwritten by a re-register
            Ok(Err(_)) => false,
            // timeout: remove the entry so a late ack is dropped
            Err(_) => {
                remove_if_current(&self.waiters, self.id, self.token);
                false
            }
        }
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        remove_if_current(&self.waiters, self.id, self.token);
    }
}

/// Removes the entry only if it still belongs to this waiter; a stale
/// waiter for an id that has been re-registered must not evict its
/// replacement.
fn remove_if_current(waiters: &WaiterMap, id: CorrelationId, token: u64) {
    let mut waiters = waiters.lock().unwrap();
    if waiters.get(&id).is_some_and(|pending| pending.token == token) {
        waiters.remove(&id);
    }
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`. Must be called before the matching
    /// publish, otherwise the ack can race past the registration.
    ///
    /// Re-registering an id overwrites the previous entry; the earlier
    /// waiter resolves `false`.
    pub fn register(&self, id: CorrelationId, timeout: Duration) -> AckWaiter {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap()
            .insert(id, PendingAck { token, tx });
        AckWaiter {
            id,
            token,
            rx: Some(rx),
            timeout,
            waiters: self.waiters.clone(),
        }
    }

    /// Resolves the waiter for `id`, if one is still registered. Late
    /// messages find no entry and are dropped.
    pub fn resolve(&self, id: &CorrelationId, success: bool) -> bool {
        match self.waiters.lock().unwrap().remove(id) {
            Some(pending) => pending.tx.send(success).is_ok(),
            None => false,
        }
    }

    /// Number of sagas currently awaiting acknowledgement.
    pub fn pending(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }

    /// Starts the two background subject consumers.
    ///
    /// Both subscriptions are established before this returns, so a caller
    /// that awaits `start` during bootstrap is guaranteed the registry is
    /// listening before any saga publishes.
    pub async fn start<B: MessageBus + 'static>(
        &self,
        bus: Arc<B>,
    ) -> messaging::Result<Vec<JoinHandle<()>>> {
        let mut acks = bus
            .subscribe(subjects::AUDIT_LOG_CREATED, "txn-saga-ack")
            .await?;
        let mut fails = bus
            .subscribe(subjects::AUDIT_LOG_FAILED, "txn-saga-fail")
            .await?;

        let registry = self.clone();
        let ack_task = tokio::spawn(async move {
            while let Some(msg) = acks.next().await {
                registry.handle_ack(&msg);
                if let Err(e) = msg.ack().await {
                    tracing::warn!(error = %e, "failed to ack audit confirmation");
                }
            }
            tracing::debug!("ack consumer stopped");
        });

        let registry = self.clone();
        let fail_task = tokio::spawn(async move {
            while let Some(msg) = fails.next().await {
                registry.handle_fail(&msg);
                if let Err(e) = msg.ack().await {
                    tracing::warn!(error = %e, "failed to ack audit failure notice");
                }
            }
            tracing::debug!("failure consumer stopped");
        });

        Ok(vec![ack_task, fail_task])
    }

    fn handle_ack(&self, msg: &BusMessage) {
        match msg.decode::<AuditAck>() {
            Ok(ack) => {
                if !self.resolve(&ack.correlation_id, true) {
                    tracing::debug!(
                        correlation_id = %ack.correlation_id,
                        "dropping late audit acknowledgement"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "undecodable audit acknowledgement"),
        }
    }

    fn handle_fail(&self, msg: &BusMessage) {
        match msg.decode::<AuditFail>() {
            Ok(fail) => {
                tracing::warn!(
                    correlation_id = %fail.correlation_id,
                    error = %fail.error,
                    "audit service reported failure"
                );
                if !self.resolve(&fail.correlation_id, false) {
                    tracing::debug!(
                        correlation_id = %fail.correlation_id,
                        "dropping late audit failure notice"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "undecodable audit failure notice"),
        }
    }

    /// Resolves every in-flight waiter `false`; their sagas observe timeout
    /// semantics and roll back.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut waiters = self.waiters.lock().unwrap();
            waiters.drain().collect()
        };
        for (id, pending) in drained {
            tracing::debug!(correlation_id = %id, "cancelling in-flight waiter");
            let _ = pending.tx.send(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AuditLogId;
    use messaging::{InMemoryMessageBus, MessageBusExt};

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn resolve_completes_waiter_with_success() {
        let registry = AckRegistry::new();
        let id = CorrelationId::new();

        let waiter = registry.register(id, LONG);
        assert!(registry.resolve(&id, true));
        assert!(waiter.wait().await);
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn resolve_false_fails_waiter() {
        let registry = AckRegistry::new();
        let id = CorrelationId::new();

        let waiter = registry.register(id, LONG);
        assert!(registry.resolve(&id, false));
        assert!(!waiter.wait().await);
    }

    #[tokio::test]
    async fn timeout_resolves_false_and_removes_entry() {
        let registry = AckRegistry::new();
        let id = CorrelationId::new();

        let waiter = registry.register(id, SHORT);
        assert!(!waiter.wait().await);
        assert_eq!(registry.pending(), 0);

        // late arrival finds no waiter
        assert!(!registry.resolve(&id, true));
    }

    #[tokio::test]
    async fn unknown_correlation_id_is_dropped() {
        let registry = AckRegistry::new();
        assert!(!registry.resolve(&CorrelationId::new(), true));
    }

    #[tokio::test]
    async fn re_register_overwrites_earlier_waiter() {
        let registry = AckRegistry::new();
        let id = CorrelationId::new();

        let first = registry.register(id, LONG);
        let second = registry.register(id, LONG);

        registry.resolve(&id, true);
        assert!(!first.wait().await);
        assert!(second.wait().await);
    }

    #[tokio::test]
    async fn stale_waiter_drop_does_not_evict_replacement() {
        let registry = AckRegistry::new();
        let id = CorrelationId::new();

        let first = registry.register(id, LONG);
        let second = registry.register(id, LONG);
        drop(first);

        assert_eq!(registry.pending(), 1);
        assert!(registry.resolve(&id, true));
        assert!(second.wait().await);
    }

    #[tokio::test]
    async fn dropped_waiter_deregisters() {
        let registry = AckRegistry::new();
        let id = CorrelationId::new();

        let waiter = registry.register(id, LONG);
        assert_eq!(registry.pending(), 1);
        drop(waiter);
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn shutdown_drains_all_waiters() {
        let registry = AckRegistry::new();
        let w1 = registry.register(CorrelationId::new(), LONG);
        let w2 = registry.register(CorrelationId::new(), LONG);

        registry.shutdown();

        assert!(!w1.wait().await);
        assert!(!w2.wait().await);
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn background_consumers_route_by_correlation_id() {
        let registry = AckRegistry::new();
        let bus = Arc::new(InMemoryMessageBus::new());
        let _tasks = registry.start(bus.clone()).await.unwrap();

        let ok_id = CorrelationId::new();
        let fail_id = CorrelationId::new();
        let ok_waiter = registry.register(ok_id, LONG);
        let fail_waiter = registry.register(fail_id, LONG);

        bus.publish_json(
            subjects::AUDIT_LOG_CREATED,
            &AuditAck::new(ok_id, AuditLogId::new()),
        )
        .await
        .unwrap();
        bus.publish_json(
            subjects::AUDIT_LOG_FAILED,
            &AuditFail::new(fail_id, "insert failed"),
        )
        .await
        .unwrap();

        assert!(ok_waiter.wait().await);
        assert!(!fail_waiter.wait().await);
    }

    #[tokio::test]
    async fn concurrent_waiters_resolve_independently() {
        let registry = AckRegistry::new();
        let bus = Arc::new(InMemoryMessageBus::new());
        let _tasks = registry.start(bus.clone()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let id = CorrelationId::new();
            let waiter = registry.register(id, LONG);
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                bus.publish_json(
                    subjects::AUDIT_LOG_CREATED,
                    &AuditAck::new(id, AuditLogId::new()),
                )
                .await
                .unwrap();
                waiter.wait().await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(registry.pending(), 0);
    }
}
