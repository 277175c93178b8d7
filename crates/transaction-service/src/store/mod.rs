//! Persistence seams for the transaction service.
//!
//! [`TransactionStore`] and [`UserStore`] abstract the relational store the
//! same way the messaging crate abstracts the broker: Postgres in
//! production, in-memory doubles in tests. The saga holds a
//! [`TransactionUnit`], one database transaction spanning the row change,
//! the audit acknowledgement wait, and the commit or rollback.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Page, PageParams, SortOrder, TransactionId, UserId};
use serde::Deserialize;
use sqlx::types::BigDecimal;
use thiserror::Error;

use crate::domain::{Currency, TransactionRecord, TransactionStatus, User};

pub use memory::{InMemoryTransactionStore, InMemoryUserStore};
pub use postgres::{PostgresTransactionStore, PostgresUserStore};

/// Errors from the relational stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded into the domain model.
    #[error("Corrupt row: {0}")]
    Decode(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Owner-scoped list filters for transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub currency: Option<Currency>,
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Sortable columns for the transaction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Amount,
}

impl TransactionSortField {
    /// The column name this sort key maps to.
    pub fn column(&self) -> &'static str {
        match self {
            TransactionSortField::CreatedAt => "created_at",
            TransactionSortField::UpdatedAt => "updated_at",
            TransactionSortField::Amount => "amount",
        }
    }
}

/// Read side of the transaction store.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Opens a database transaction for a saga. The unit pins one pooled
    /// connection until `commit` or `rollback`.
    async fn begin(&self) -> Result<Box<dyn TransactionUnit>>;

    /// Fetches a row scoped to its owner. Absent and foreign-owned rows are
    /// both `None`.
    async fn find(&self, id: TransactionId, user_id: UserId)
    -> Result<Option<TransactionRecord>>;

    /// Filtered, paged, sorted listing of one user's transactions. Amount
    /// ordering is numeric.
    async fn list(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        page: PageParams,
        sort: TransactionSortField,
        order: SortOrder,
    ) -> Result<Page<TransactionRecord>>;
}

/// One open database transaction driven by a saga.
#[async_trait]
pub trait TransactionUnit: Send {
    async fn insert(&mut self, record: &TransactionRecord) -> Result<()>;

    /// Loads the pre-mutation row for update/delete, scoped to the owner.
    async fn find_for_update(
        &mut self,
        id: TransactionId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>>;

    async fn update(&mut self, record: &TransactionRecord) -> Result<()>;

    async fn delete(&mut self, id: TransactionId) -> Result<()>;

    /// Makes the staged changes durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards the staged changes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// User persistence. `create` maps uniqueness violations on username or
/// email to [`StoreError::Conflict`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<()>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;
}
