use chrono::{DateTime, Utc};
use common::{TransactionId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;

/// Supported transaction currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Jpy,
    Cad,
    Aud,
    Chf,
    Cny,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
            Currency::Chf => "CHF",
            Currency::Cny => "CNY",
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "JPY" => Ok(Currency::Jpy),
            "CAD" => Ok(Currency::Cad),
            "AUD" => Ok(Currency::Aud),
            "CHF" => Ok(Currency::Chf),
            "CNY" => Ok(Currency::Cny),
            other => Err(format!("unknown currency '{other}'")),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Cancelled,
    Processing,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Processing => "PROCESSING",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            other => Err(format!("unknown transaction status '{other}'")),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction row as persisted in the local store.
///
/// Amounts are exact decimals with two fractional digits; arithmetic and
/// comparisons are numeric, never on the string form.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Field snapshot carried in audit `changes` images.
    ///
    /// The amount is rendered as a decimal string so the round-trip contract
    /// is field equality, not float closeness.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "amount": self.amount.to_string(),
            "currency": self.currency,
            "status": self.status,
            "description": self.description,
            "metadata": self.metadata,
        })
    }

    /// Summarized fields carried in the audit envelope metadata.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "amount": self.amount.to_string(),
            "currency": self.currency,
            "status": self.status,
        })
    }
}
