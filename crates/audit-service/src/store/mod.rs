//! Persistence seam for the audit store, with Postgres and in-memory
//! implementations.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use common::{AuditLogId, CorrelationId, Page, PageParams, SortOrder};
use thiserror::Error;

use crate::model::{AuditLogFilter, AuditLogRecord, AuditSortField};

pub use memory::InMemoryAuditStore;
pub use postgres::PostgresAuditStore;

/// Errors from the audit store.
#[derive(Debug, Error)]
pub enum AuditStoreError {
    /// A row for this (correlationId, action, entityId) already exists —
    /// the duplicate-redelivery case. Carries the existing row id so the
    /// consumer can re-publish the same acknowledgement.
    #[error("audit row already exists: {existing}")]
    Duplicate { existing: AuditLogId },

    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded into the domain model.
    #[error("Corrupt row: {0}")]
    Decode(String),
}

/// Result type for audit store operations.
pub type Result<T> = std::result::Result<T, AuditStoreError>;

/// Core trait for the audit store.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Inserts a row. A uniqueness violation on
    /// (correlationId, action, entityId) maps to
    /// [`AuditStoreError::Duplicate`].
    async fn insert(&self, record: &AuditLogRecord) -> Result<AuditLogId>;

    async fn find_by_id(&self, id: AuditLogId) -> Result<Option<AuditLogRecord>>;

    /// Filtered, paged, sorted listing.
    async fn list(
        &self,
        filter: &AuditLogFilter,
        page: PageParams,
        sort: AuditSortField,
        order: SortOrder,
    ) -> Result<Page<AuditLogRecord>>;

    /// All rows sharing a correlation id, oldest first.
    async fn find_by_correlation(&self, id: CorrelationId) -> Result<Vec<AuditLogRecord>>;

    /// Per-entity history, newest first.
    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLogRecord>>;

    /// Transitions every row sharing the correlation id to ROLLED_BACK.
    /// Idempotent; returns the number of rows that changed.
    async fn mark_rolled_back(&self, id: CorrelationId) -> Result<u64>;
}
