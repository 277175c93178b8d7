//! Audit log records and their wire shapes.

use chrono::{DateTime, Utc};
use common::{AuditLogId, CorrelationId};
use messaging::{AuditAction, AuditEnvelope, AuditStatus, ChangeSet};
use serde::{Deserialize, Serialize};

/// One immutable audit row. The only mutation ever applied is the status
/// transition to ROLLED_BACK driven by a compensation message.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogRecord {
    pub id: AuditLogId,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub user_id: Option<String>,
    pub status: AuditStatus,
    pub metadata: Option<serde_json::Value>,
    pub changes: Option<ChangeSet>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: CorrelationId,
    pub service_name: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogRecord {
    /// Materializes a row from an inbound envelope.
    pub fn from_envelope(envelope: AuditEnvelope) -> Self {
        Self {
            id: AuditLogId::new(),
            action: envelope.action,
            entity_type: envelope.entity_type,
            entity_id: envelope.entity_id,
            user_id: envelope.user_id,
            status: envelope.status,
            metadata: envelope.metadata,
            changes: envelope.changes,
            ip_address: envelope.ip_address,
            user_agent: envelope.user_agent,
            correlation_id: envelope.correlation_id,
            service_name: envelope.service_name,
            created_at: Utc::now(),
        }
    }
}

/// Audit row shape on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogDto {
    pub id: AuditLogId,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub correlation_id: CorrelationId,
    pub service_name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&AuditLogRecord> for AuditLogDto {
    fn from(record: &AuditLogRecord) -> Self {
        Self {
            id: record.id,
            action: record.action,
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id.clone(),
            user_id: record.user_id.clone(),
            status: record.status,
            metadata: record.metadata.clone(),
            changes: record.changes.clone(),
            ip_address: record.ip_address.clone(),
            user_agent: record.user_agent.clone(),
            correlation_id: record.correlation_id,
            service_name: record.service_name.clone(),
            created_at: record.created_at,
        }
    }
}

/// List filters for the audit query surface.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<AuditStatus>,
    pub correlation_id: Option<CorrelationId>,
    pub service_name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Sortable columns for the audit list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditSortField {
    #[default]
    CreatedAt,
    Action,
    Status,
}

impl AuditSortField {
    pub fn column(&self) -> &'static str {
        match self {
            AuditSortField::CreatedAt => "created_at",
            AuditSortField::Action => "action",
            AuditSortField::Status => "status",
        }
    }
}
