//! Audit log query surface, plus the internal direct-write endpoint.
//!
//! Unauthenticated within the trust boundary; read-only except for the
//! internal POST.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{ApiResponse, AuditLogId, CorrelationId, Page, PageParams, SortOrder};
use messaging::{AuditAction, AuditEnvelope, AuditStatus, MessageBus};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::model::{AuditLogDto, AuditLogFilter, AuditLogRecord, AuditSortField};
use crate::store::AuditStore;

/// Query parameters for the audit log list.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAuditLogsQuery {
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<AuditStatus>,
    pub correlation_id: Option<CorrelationId>,
    pub service_name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<AuditSortField>,
    pub sort_order: Option<SortOrder>,
}

impl ListAuditLogsQuery {
    fn filter(&self) -> AuditLogFilter {
        AuditLogFilter {
            action: self.action,
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            user_id: self.user_id.clone(),
            status: self.status,
            correlation_id: self.correlation_id,
            service_name: self.service_name.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

/// POST /api/audit-logs — direct write, primarily an internal surface.
#[tracing::instrument(skip(state, envelope))]
pub async fn create<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Json(envelope): Json<AuditEnvelope>,
) -> Result<(StatusCode, Json<ApiResponse<AuditLogDto>>), AppError>
where
    S: AuditStore + 'static,
    B: MessageBus + 'static,
{
    envelope.validate().map_err(AppError::Validation)?;

    let record = AuditLogRecord::from_envelope(envelope);
    state.store.insert(&record).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(AuditLogDto::from(&record))),
    ))
}

/// GET /api/audit-logs — filtered, paged listing.
#[tracing::instrument(skip(state, query))]
pub async fn list<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Query(query): Query<ListAuditLogsQuery>,
) -> Result<Json<ApiResponse<Page<AuditLogDto>>>, AppError>
where
    S: AuditStore + 'static,
    B: MessageBus + 'static,
{
    let page = state
        .store
        .list(
            &query.filter(),
            PageParams::new(query.page, query.limit),
            query.sort_by.unwrap_or_default(),
            query.sort_order.unwrap_or_default(),
        )
        .await?;

    Ok(Json(ApiResponse::ok(
        page.map(|record| AuditLogDto::from(&record)),
    )))
}

/// GET /api/audit-logs/:id
#[tracing::instrument(skip(state))]
pub async fn get<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<AuditLogDto>>, AppError>
where
    S: AuditStore + 'static,
    B: MessageBus + 'static,
{
    let id: AuditLogId = id
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid audit log id '{id}'")))?;

    let record = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Audit log not found".to_string()))?;

    Ok(Json(ApiResponse::ok(AuditLogDto::from(&record))))
}

/// GET /api/audit-logs/correlation/:correlationId — every row of one saga,
/// oldest first.
#[tracing::instrument(skip(state))]
pub async fn by_correlation<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<AuditLogDto>>>, AppError>
where
    S: AuditStore + 'static,
    B: MessageBus + 'static,
{
    let correlation_id: CorrelationId = correlation_id
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid correlation id '{correlation_id}'")))?;

    let rows = state.store.find_by_correlation(correlation_id).await?;
    Ok(Json(ApiResponse::ok(
        rows.iter().map(AuditLogDto::from).collect(),
    )))
}

/// GET /api/audit-logs/entity/:entityType/:entityId — per-entity history,
/// newest first.
#[tracing::instrument(skip(state))]
pub async fn by_entity<S, B>(
    State(state): State<Arc<AppState<S, B>>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<AuditLogDto>>>, AppError>
where
    S: AuditStore + 'static,
    B: MessageBus + 'static,
{
    let rows = state.store.find_by_entity(&entity_type, &entity_id).await?;
    Ok(Json(ApiResponse::ok(
        rows.iter().map(AuditLogDto::from).collect(),
    )))
}
