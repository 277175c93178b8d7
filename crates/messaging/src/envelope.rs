//! Wire envelopes for the audit subjects.
//!
//! Field names are camelCase and enum values SCREAMING_SNAKE_CASE on the
//! wire; both sides of the bus deserialize with these exact shapes.

use common::{AuditLogId, CorrelationId};
use serde::{Deserialize, Serialize};

/// The action an audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Read,
    Login,
    Logout,
    Rollback,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Read => "READ",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::Rollback => "ROLLBACK",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "READ" => Ok(AuditAction::Read),
            "LOGIN" => Ok(AuditAction::Login),
            "LOGOUT" => Ok(AuditAction::Logout),
            "ROLLBACK" => Ok(AuditAction::Rollback),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an audit row.
///
/// ROLLED_BACK is terminal and the only transition ever applied after insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    #[default]
    Success,
    Failed,
    RolledBack,
    Pending,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failed => "FAILED",
            AuditStatus::RolledBack => "ROLLED_BACK",
            AuditStatus::Pending => "PENDING",
        }
    }
}

impl std::str::FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(AuditStatus::Success),
            "FAILED" => Ok(AuditStatus::Failed),
            "ROLLED_BACK" => Ok(AuditStatus::RolledBack),
            "PENDING" => Ok(AuditStatus::Pending),
            other => Err(format!("unknown audit status '{other}'")),
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Before/after snapshots carried with mutating actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

/// Payload of `audit.log.create`: everything the consumer needs to persist
/// one audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEnvelope {
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
}

impl AuditEnvelope {
    /// Checks the required-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.entity_type.trim().is_empty() {
            return Err("entityType must not be empty".to_string());
        }
        if self.entity_id.trim().is_empty() {
            return Err("entityId must not be empty".to_string());
        }
        if self.service_name.trim().is_empty() {
            return Err("serviceName must not be empty".to_string());
        }
        Ok(())
    }
}

/// Payload of `audit.log.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditAck {
    pub correlation_id: CorrelationId,
    pub audit_log_id: AuditLogId,
    pub success: bool,
}

impl AuditAck {
    pub fn new(correlation_id: CorrelationId, audit_log_id: AuditLogId) -> Self {
        Self {
            correlation_id,
            audit_log_id,
            success: true,
        }
    }
}

/// Payload of `audit.log.failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFail {
    pub correlation_id: CorrelationId,
    pub error: String,
    pub success: bool,
}

impl AuditFail {
    pub fn new(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            error: error.into(),
            success: false,
        }
    }
}

/// Payload of `audit.log.rollback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRollback {
    pub correlation_id: CorrelationId,
    pub reason: String,
}
