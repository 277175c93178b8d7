use async_trait::async_trait;
use common::{AuditLogId, CorrelationId, Page, PageParams, SortOrder};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::model::{AuditLogFilter, AuditLogRecord, AuditSortField};

use super::{AuditStore, AuditStoreError, Result};

/// Name of the uniqueness constraint that turns duplicate redelivery into
/// "already written".
const DUPLICATE_CONSTRAINT: &str = "audit_logs_correlation_action_entity_key";

/// PostgreSQL-backed audit store.
#[derive(Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = "id, action, entity_type, entity_id, user_id, status, metadata, \
     changes, ip_address, user_agent, correlation_id, service_name, created_at";

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the schema migrations for this service.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<AuditLogRecord> {
        let action: String = row.try_get("action")?;
        let status: String = row.try_get("status")?;
        let correlation_id: String = row.try_get("correlation_id")?;
        let changes: Option<serde_json::Value> = row.try_get("changes")?;
        Ok(AuditLogRecord {
            id: AuditLogId::from_uuid(row.try_get::<Uuid, _>("id")?),
            action: action.parse().map_err(AuditStoreError::Decode)?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            user_id: row.try_get("user_id")?,
            status: status.parse().map_err(AuditStoreError::Decode)?,
            metadata: row.try_get("metadata")?,
            changes: changes
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| AuditStoreError::Decode(e.to_string()))?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            correlation_id: correlation_id
                .parse()
                .map_err(|_| AuditStoreError::Decode("malformed correlation id".to_string()))?,
            service_name: row.try_get("service_name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Looks up the row a duplicate insert collided with.
    async fn find_existing(&self, record: &AuditLogRecord) -> Result<AuditLogId> {
        let row = sqlx::query(
            "SELECT id FROM audit_logs WHERE correlation_id = $1 AND action = $2 AND entity_id = $3",
        )
        .bind(record.correlation_id.to_string())
        .bind(record.action.as_str())
        .bind(&record.entity_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(AuditLogId::from_uuid(row.try_get::<Uuid, _>("id")?))
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn insert(&self, record: &AuditLogRecord) -> Result<AuditLogId> {
        let changes = record
            .changes
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| AuditStoreError::Decode(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, entity_type, entity_id, user_id, status, metadata,
                                    changes, ip_address, user_agent, correlation_id, service_name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.action.as_str())
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(&record.user_id)
        .bind(record.status.as_str())
        .bind(&record.metadata)
        .bind(changes)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(record.correlation_id.to_string())
        .bind(&record.service_name)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(record.id),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(DUPLICATE_CONSTRAINT) =>
            {
                let existing = self.find_existing(record).await?;
                Err(AuditStoreError::Duplicate { existing })
            }
            Err(e) => Err(AuditStoreError::Database(e)),
        }
    }

    async fn find_by_id(&self, id: AuditLogId) -> Result<Option<AuditLogRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM audit_logs WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list(
        &self,
        filter: &AuditLogFilter,
        page: PageParams,
        sort: AuditSortField,
        order: SortOrder,
    ) -> Result<Page<AuditLogRecord>> {
        // WHERE clause built once, bound identically for count and data.
        let mut clause = String::from("WHERE 1=1");
        let mut param_count = 0;

        let correlation_id = filter.correlation_id.map(|id| id.to_string());
        let mut conditions: Vec<(&str, Option<&str>)> = Vec::new();
        conditions.push(("action", filter.action.map(|a| a.as_str())));
        conditions.push(("entity_type", filter.entity_type.as_deref()));
        conditions.push(("entity_id", filter.entity_id.as_deref()));
        conditions.push(("user_id", filter.user_id.as_deref()));
        conditions.push(("status", filter.status.map(|s| s.as_str())));
        conditions.push(("correlation_id", correlation_id.as_deref()));
        conditions.push(("service_name", filter.service_name.as_deref()));

        for (column, value) in &conditions {
            if value.is_some() {
                param_count += 1;
                clause.push_str(&format!(" AND {column} = ${param_count}"));
            }
        }
        if filter.start_date.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if filter.end_date.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        fn bind_filter<'q, O>(
            query: sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments>,
            conditions: &[(&str, Option<&'q str>)],
            filter: &'q AuditLogFilter,
        ) -> sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments> {
            let mut query = query;
            for (_, value) in conditions {
                if let Some(value) = value {
                    query = query.bind(*value);
                }
            }
            if let Some(start) = filter.start_date {
                query = query.bind(start);
            }
            if let Some(end) = filter.end_date {
                query = query.bind(end);
            }
            query
        }

        let count_sql = format!("SELECT COUNT(*) FROM audit_logs {clause}");
        let (total,): (i64,) = bind_filter(sqlx::query_as(&count_sql), &conditions, filter)
            .fetch_one(&self.pool)
            .await?;

        let data_sql = format!(
            "SELECT {SELECT_COLUMNS} FROM audit_logs {clause} ORDER BY {} {} LIMIT {} OFFSET {}",
            sort.column(),
            order.as_sql(),
            page.limit(),
            page.offset(),
        );
        let rows = bind_filter(
            sqlx::query_as::<_, AuditRow>(&data_sql),
            &conditions,
            filter,
        )
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(AuditLogRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total as u64, page))
    }

    async fn find_by_correlation(&self, id: CorrelationId) -> Result<Vec<AuditLogRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM audit_logs WHERE correlation_id = $1 ORDER BY created_at ASC"
        ))
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLogRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM audit_logs WHERE entity_type = $1 AND entity_id = $2 ORDER BY created_at DESC"
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn mark_rolled_back(&self, id: CorrelationId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE audit_logs SET status = 'ROLLED_BACK' WHERE correlation_id = $1 AND status <> 'ROLLED_BACK'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Raw row used by the dynamic list query; decoded into the domain record.
#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    action: String,
    entity_type: String,
    entity_id: String,
    user_id: Option<String>,
    status: String,
    metadata: Option<serde_json::Value>,
    changes: Option<serde_json::Value>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    correlation_id: String,
    service_name: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<AuditRow> for AuditLogRecord {
    type Error = AuditStoreError;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditLogRecord {
            id: AuditLogId::from_uuid(row.id),
            action: row.action.parse().map_err(AuditStoreError::Decode)?,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            user_id: row.user_id,
            status: row.status.parse().map_err(AuditStoreError::Decode)?,
            metadata: row.metadata,
            changes: row
                .changes
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| AuditStoreError::Decode(e.to_string()))?,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            correlation_id: row
                .correlation_id
                .parse()
                .map_err(|_| AuditStoreError::Decode("malformed correlation id".to_string()))?,
            service_name: row.service_name,
            created_at: row.created_at,
        })
    }
}
