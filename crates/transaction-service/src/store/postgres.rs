use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Page, PageParams, SortOrder, TransactionId, UserId};
use sqlx::postgres::PgRow;
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::{TransactionRecord, User};

use super::{
    Result, StoreError, TransactionFilter, TransactionSortField, TransactionStore,
    TransactionUnit, UserStore,
};

/// PostgreSQL-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the schema migrations for this service.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<TransactionRecord> {
        let currency: String = row.try_get("currency")?;
        let status: String = row.try_get("status")?;
        Ok(TransactionRecord {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            amount: row.try_get("amount")?,
            currency: currency.parse().map_err(StoreError::Decode)?,
            status: status.parse().map_err(StoreError::Decode)?,
            description: row.try_get("description")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, user_id, amount, currency, status, description, metadata, created_at, updated_at";

struct PostgresTransactionUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionUnit for PostgresTransactionUnit {
    async fn insert(&mut self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, user_id, amount, currency, status, description, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.user_id.as_uuid())
        .bind(&record.amount)
        .bind(record.currency.as_str())
        .bind(record.status.as_str())
        .bind(&record.description)
        .bind(&record.metadata)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_for_update(
        &mut self,
        id: TransactionId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions WHERE id = $1 AND user_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PostgresTransactionStore::row_to_record).transpose()
    }

    async fn update(&mut self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET amount = $2, currency = $3, status = $4, description = $5, metadata = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.amount)
        .bind(record.currency.as_str())
        .bind(record.status.as_str())
        .bind(&record.description)
        .bind(&record.metadata)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete(&mut self, id: TransactionId) -> Result<()> {
        sqlx::query("DELETE FROM transactions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn begin(&self) -> Result<Box<dyn TransactionUnit>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransactionUnit { tx }))
    }

    async fn find(
        &self,
        id: TransactionId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions WHERE id = $1 AND user_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        page: PageParams,
        sort: TransactionSortField,
        order: SortOrder,
    ) -> Result<Page<TransactionRecord>> {
        // Build the WHERE clause once; bind the same parameters for the
        // count query and the page query.
        let mut clause = String::from("WHERE user_id = $1");
        let mut param_count = 1;

        if filter.status.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.currency.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND currency = ${param_count}"));
        }
        if filter.min_amount.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND amount >= ${param_count}"));
        }
        if filter.max_amount.is_some() {
            param_count += 1;
            clause.push_str(&format!(" AND amount <= ${param_count}"));
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
            user_id: UserId,
            filter: &'q TransactionFilter,
        ) -> sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments> {
            let mut query = query.bind(user_id.as_uuid());
            if let Some(status) = filter.status {
                query = query.bind(status.as_str());
            }
            if let Some(currency) = filter.currency {
                query = query.bind(currency.as_str());
            }
            if let Some(min) = &filter.min_amount {
                query = query.bind(min);
            }
            if let Some(max) = &filter.max_amount {
                query = query.bind(max);
            }
            if let Some(start) = filter.start_date {
                query = query.bind(start);
            }
            if let Some(end) = filter.end_date {
                query = query.bind(end);
            }
            query
        }

        let count_sql = format!("SELECT COUNT(*) FROM transactions {clause}");
        let (total,): (i64,) = bind_filter(sqlx::query_as(&count_sql), user_id, filter)
            .fetch_one(&self.pool)
            .await?;

        let data_sql = format!(
            "SELECT {SELECT_COLUMNS} FROM transactions {clause} ORDER BY {} {} LIMIT {} OFFSET {}",
            sort.column(),
            order.as_sql(),
            page.limit(),
            page.offset(),
        );
        let rows = bind_filter(sqlx::query_as::<_, RecordRow>(&data_sql), user_id, filter)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(TransactionRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total as u64, page))
    }
}

/// Raw row used by the dynamic list query; decoded into the domain record.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    user_id: Uuid,
    amount: BigDecimal,
    currency: String,
    status: String,
    description: Option<String>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for TransactionRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(TransactionRecord {
            id: TransactionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            amount: row.amount,
            currency: row.currency.parse().map_err(StoreError::Decode)?,
            status: row.status.parse().map_err(StoreError::Decode)?,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed user store.
#[derive(Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: PgRow) -> Result<User> {
        Ok(User {
            id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("users_username_key") => {
                        return StoreError::Conflict("username already exists".to_string());
                    }
                    Some("users_email_key") => {
                        return StoreError::Conflict("email already exists".to_string());
                    }
                    _ => {}
                }
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at, updated_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }
}
