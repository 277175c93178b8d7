use std::sync::Arc;

use async_trait::async_trait;
use common::{AuditLogId, CorrelationId, Page, PageParams, SortOrder};
use messaging::AuditStatus;
use tokio::sync::RwLock;

use crate::model::{AuditLogFilter, AuditLogRecord, AuditSortField};

use super::{AuditStore, AuditStoreError, Result};

/// In-memory audit store for testing, enforcing the same
/// (correlationId, action, entityId) uniqueness as the Postgres schema.
#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    rows: Arc<RwLock<Vec<AuditLogRecord>>>,
    fail_inserts: Arc<std::sync::atomic::AtomicBool>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every insert fail, simulating a persistence outage.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of stored rows.
    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }
}

fn matches_filter(record: &AuditLogRecord, filter: &AuditLogFilter) -> bool {
    if let Some(action) = filter.action
        && record.action != action
    {
        return false;
    }
    if let Some(entity_type) = &filter.entity_type
        && &record.entity_type != entity_type
    {
        return false;
    }
    if let Some(entity_id) = &filter.entity_id
        && &record.entity_id != entity_id
    {
        return false;
    }
    if let Some(user_id) = &filter.user_id
        && record.user_id.as_ref() != Some(user_id)
    {
        return false;
    }
    if let Some(status) = filter.status
        && record.status != status
    {
        return false;
    }
    if let Some(correlation_id) = filter.correlation_id
        && record.correlation_id != correlation_id
    {
        return false;
    }
    if let Some(service_name) = &filter.service_name
        && &record.service_name != service_name
    {
        return false;
    }
    if let Some(start) = filter.start_date
        && record.created_at < start
    {
        return false;
    }
    if let Some(end) = filter.end_date
        && record.created_at > end
    {
        return false;
    }
    true
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert(&self, record: &AuditLogRecord) -> Result<AuditLogId> {
        if self.fail_inserts.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AuditStoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.iter().find(|r| {
            r.correlation_id == record.correlation_id
                && r.action == record.action
                && r.entity_id == record.entity_id
        }) {
            return Err(AuditStoreError::Duplicate {
                existing: existing.id,
            });
        }
        rows.push(record.clone());
        Ok(record.id)
    }

    async fn find_by_id(&self, id: AuditLogId) -> Result<Option<AuditLogRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|r| r.id == id).cloned())
    }

    async fn list(
        &self,
        filter: &AuditLogFilter,
        page: PageParams,
        sort: AuditSortField,
        order: SortOrder,
    ) -> Result<Page<AuditLogRecord>> {
        let rows = self.rows.read().await;
        let mut matched: Vec<_> = rows
            .iter()
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match sort {
                AuditSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                AuditSortField::Action => a.action.as_str().cmp(b.action.as_str()),
                AuditSortField::Status => a.status.as_str().cmp(b.status.as_str()),
            };
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = matched.len() as u64;
        let items: Vec<_> = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();

        Ok(Page::new(items, total, page))
    }

    async fn find_by_correlation(&self, id: CorrelationId) -> Result<Vec<AuditLogRecord>> {
        let rows = self.rows.read().await;
        let mut matched: Vec<_> = rows
            .iter()
            .filter(|r| r.correlation_id == id)
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        Ok(matched)
    }

    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLogRecord>> {
        let rows = self.rows.read().await;
        let mut matched: Vec<_> = rows
            .iter()
            .filter(|r| r.entity_type == entity_type && r.entity_id == entity_id)
            .cloned()
            .collect();
        matched.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(matched)
    }

    async fn mark_rolled_back(&self, id: CorrelationId) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut affected = 0;
        for row in rows
            .iter_mut()
            .filter(|r| r.correlation_id == id && r.status != AuditStatus::RolledBack)
        {
            row.status = AuditStatus::RolledBack;
            affected += 1;
        }
        Ok(affected)
    }
}
