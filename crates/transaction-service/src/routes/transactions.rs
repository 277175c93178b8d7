//! Owner-scoped transaction endpoints: the saga write path and the query
//! surface.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::{ApiResponse, Page, PageParams, SortOrder, TransactionId};
use messaging::MessageBus;
use serde::Deserialize;
use sqlx::types::BigDecimal;

use crate::AppState;
use crate::auth::AuthUser;
use crate::domain::{
    CreateTransaction, Currency, TransactionDto, TransactionStatus, UpdateTransaction,
};
use crate::error::AppError;
use crate::saga::RequestContext;
use crate::store::{TransactionFilter, TransactionSortField, TransactionStore, UserStore};

/// Query parameters for the transaction list.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransactionsQuery {
    pub status: Option<TransactionStatus>,
    pub currency: Option<Currency>,
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<TransactionSortField>,
    pub sort_order: Option<SortOrder>,
}

impl ListTransactionsQuery {
    fn filter(&self) -> TransactionFilter {
        TransactionFilter {
            status: self.status,
            currency: self.currency,
            min_amount: self.min_amount.clone(),
            max_amount: self.max_amount.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

fn parse_transaction_id(id: &str) -> Result<TransactionId, AppError> {
    id.parse()
        .map_err(|_| AppError::Validation(format!("invalid transaction id '{id}'")))
}

/// Client address and agent forwarded into the audit trail.
fn request_context(headers: &HeaderMap) -> RequestContext {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    RequestContext {
        ip_address,
        user_agent,
    }
}

/// POST /api/transactions — create a transaction through the saga.
#[tracing::instrument(skip(state, claims, headers, body))]
pub async fn create<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    AuthUser(claims): AuthUser,
    headers: HeaderMap,
    Json(body): Json<CreateTransaction>,
) -> Result<(StatusCode, Json<ApiResponse<TransactionDto>>), AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    let dto = state
        .saga
        .create_transaction(claims.sub, body, request_context(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(dto))))
}

/// GET /api/transactions — filtered, paged listing of the caller's rows.
#[tracing::instrument(skip(state, claims, query))]
pub async fn list<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    AuthUser(claims): AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ApiResponse<Page<TransactionDto>>>, AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    let page = state
        .store
        .list(
            claims.sub,
            &query.filter(),
            PageParams::new(query.page, query.limit),
            query.sort_by.unwrap_or_default(),
            query.sort_order.unwrap_or_default(),
        )
        .await?;

    Ok(Json(ApiResponse::ok(
        page.map(|record| TransactionDto::from(&record)),
    )))
}

/// GET /api/transactions/:id — absent and foreign-owned rows both 404.
#[tracing::instrument(skip(state, claims))]
pub async fn get<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TransactionDto>>, AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    let id = parse_transaction_id(&id)?;
    let record = state
        .store
        .find(id, claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))?;

    Ok(Json(ApiResponse::ok(TransactionDto::from(&record))))
}

/// PUT /api/transactions/:id — patch a transaction through the saga.
#[tracing::instrument(skip(state, claims, headers, body))]
pub async fn update<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    AuthUser(claims): AuthUser,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateTransaction>,
) -> Result<Json<ApiResponse<TransactionDto>>, AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    let id = parse_transaction_id(&id)?;
    let dto = state
        .saga
        .update_transaction(id, claims.sub, body, request_context(&headers))
        .await?;
    Ok(Json(ApiResponse::ok(dto)))
}

/// DELETE /api/transactions/:id — remove a transaction through the saga.
#[tracing::instrument(skip(state, claims, headers))]
pub async fn delete<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    AuthUser(claims): AuthUser,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    let id = parse_transaction_id(&id)?;
    state
        .saga
        .delete_transaction(id, claims.sub, request_context(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(parse_transaction_id("not-a-uuid").is_err());
        let id = TransactionId::new();
        assert_eq!(parse_transaction_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn request_context_reads_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        headers.insert("user-agent", "integration-test".parse().unwrap());

        let ctx = request_context(&headers);
        assert_eq!(ctx.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(ctx.user_agent.as_deref(), Some("integration-test"));

        let empty = request_context(&HeaderMap::new());
        assert!(empty.ip_address.is_none());
        assert!(empty.user_agent.is_none());
    }

    #[test]
    fn list_query_maps_to_filter() {
        let query = ListTransactionsQuery {
            status: Some(TransactionStatus::Pending),
            currency: Some(Currency::Usd),
            min_amount: Some("10.00".parse().unwrap()),
            ..Default::default()
        };
        let filter = query.filter();
        assert_eq!(filter.status, Some(TransactionStatus::Pending));
        assert_eq!(filter.currency, Some(Currency::Usd));
        assert!(filter.max_amount.is_none());
    }
}
