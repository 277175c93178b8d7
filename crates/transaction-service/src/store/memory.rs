use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Page, PageParams, SortOrder, TransactionId, UserId};
use tokio::sync::RwLock;

use crate::domain::{TransactionRecord, User};

use super::{
    Result, StoreError, TransactionFilter, TransactionSortField, TransactionStore,
    TransactionUnit, UserStore,
};

/// In-memory transaction store for testing.
///
/// Units stage their mutations and apply them on commit, so a rolled-back
/// saga leaves no trace, matching the Postgres implementation.
#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    rows: Arc<RwLock<HashMap<TransactionId, TransactionRecord>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows.
    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }
}

enum StagedOp {
    Insert(TransactionRecord),
    Update(TransactionRecord),
    Delete(TransactionId),
}

struct InMemoryTransactionUnit {
    rows: Arc<RwLock<HashMap<TransactionId, TransactionRecord>>>,
    staged: Vec<StagedOp>,
}

#[async_trait]
impl TransactionUnit for InMemoryTransactionUnit {
    async fn insert(&mut self, record: &TransactionRecord) -> Result<()> {
        self.staged.push(StagedOp::Insert(record.clone()));
        Ok(())
    }

    async fn find_for_update(
        &mut self,
        id: TransactionId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&id).filter(|r| r.user_id == user_id).cloned())
    }

    async fn update(&mut self, record: &TransactionRecord) -> Result<()> {
        self.staged.push(StagedOp::Update(record.clone()));
        Ok(())
    }

    async fn delete(&mut self, id: TransactionId) -> Result<()> {
        self.staged.push(StagedOp::Delete(id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut rows = self.rows.write().await;
        for op in self.staged {
            match op {
                StagedOp::Insert(record) | StagedOp::Update(record) => {
                    rows.insert(record.id, record);
                }
                StagedOp::Delete(id) => {
                    rows.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn matches_filter(record: &TransactionRecord, filter: &TransactionFilter) -> bool {
    if let Some(status) = filter.status
        && record.status != status
    {
        return false;
    }
    if let Some(currency) = filter.currency
        && record.currency != currency
    {
        return false;
    }
    if let Some(min) = &filter.min_amount
        && &record.amount < min
    {
        return false;
    }
    if let Some(max) = &filter.max_amount
        && &record.amount > max
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
impl TransactionStore for InMemoryTransactionStore {
    async fn begin(&self) -> Result<Box<dyn TransactionUnit>> {
        Ok(Box::new(InMemoryTransactionUnit {
            rows: self.rows.clone(),
            staged: Vec::new(),
        }))
    }

    async fn find(
        &self,
        id: TransactionId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&id).filter(|r| r.user_id == user_id).cloned())
    }

    async fn list(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        page: PageParams,
        sort: TransactionSortField,
        order: SortOrder,
    ) -> Result<Page<TransactionRecord>> {
        let rows = self.rows.read().await;
        let mut matched: Vec<_> = rows
            .values()
            .filter(|r| r.user_id == user_id && matches_filter(r, filter))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match sort {
                TransactionSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                TransactionSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                TransactionSortField::Amount => a.amount.cmp(&b.amount),
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
}

/// In-memory user store for testing, enforcing the same uniqueness rules as
/// the Postgres schema.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("username already exists".to_string()));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already exists".to_string()));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }
}
