use bigdecimal::Zero;
use chrono::{DateTime, Utc};
use common::{TransactionId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;

use super::transaction::{Currency, TransactionRecord, TransactionStatus};

/// NUMERIC(15,2): at most 15 significant digits, 2 of them fractional.
const MAX_TOTAL_DIGITS: u64 = 15;
const MAX_FRACTIONAL_DIGITS: i64 = 2;

fn validate_amount(amount: &BigDecimal) -> Result<(), String> {
    if amount <= &BigDecimal::zero() {
        return Err("amount must be greater than zero".to_string());
    }
    if amount.fractional_digit_count() > MAX_FRACTIONAL_DIGITS {
        return Err("amount must have at most 2 decimal places".to_string());
    }
    if amount.digits() > MAX_TOTAL_DIGITS {
        return Err("amount must have at most 15 digits".to_string());
    }
    Ok(())
}

/// Body of `POST /api/transactions`.
///
/// Status is not accepted here; new rows always start PENDING and may only
/// change through an update.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransaction {
    pub amount: BigDecimal,
    pub currency: Currency,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl CreateTransaction {
    pub fn validate(&self) -> Result<(), String> {
        validate_amount(&self.amount)
    }

    /// Materializes the row this request creates.
    pub fn into_record(self, user_id: UserId) -> TransactionRecord {
        let now = Utc::now();
        TransactionRecord {
            id: TransactionId::new(),
            user_id,
            amount: self.amount.with_scale(2),
            currency: self.currency,
            status: TransactionStatus::Pending,
            description: self.description,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of `PUT /api/transactions/:id`; every field optional, at least one
/// required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTransaction {
    pub amount: Option<BigDecimal>,
    pub currency: Option<Currency>,
    pub status: Option<TransactionStatus>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl UpdateTransaction {
    pub fn validate(&self) -> Result<(), String> {
        if self.amount.is_none()
            && self.currency.is_none()
            && self.status.is_none()
            && self.description.is_none()
            && self.metadata.is_none()
        {
            return Err("update must contain at least one field".to_string());
        }
        if let Some(amount) = &self.amount {
            validate_amount(amount)?;
        }
        Ok(())
    }

    /// Applies the patch to a pre-mutation row, returning the post-image.
    pub fn apply_to(&self, before: &TransactionRecord) -> TransactionRecord {
        let mut after = before.clone();
        if let Some(amount) = &self.amount {
            after.amount = amount.with_scale(2);
        }
        if let Some(currency) = self.currency {
            after.currency = currency;
        }
        if let Some(status) = self.status {
            after.status = status;
        }
        if let Some(description) = &self.description {
            after.description = Some(description.clone());
        }
        if let Some(metadata) = &self.metadata {
            after.metadata = Some(metadata.clone());
        }
        after.updated_at = Utc::now();
        after
    }
}

/// Transaction shape on the wire. The amount is a decimal string; precision
/// survives serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDto {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: String,
    pub currency: Currency,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TransactionRecord> for TransactionDto {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            amount: record.amount.to_string(),
            currency: record.currency,
            status: record.status,
            description: record.description.clone(),
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_req(amount: &str) -> CreateTransaction {
        CreateTransaction {
            amount: amount.parse().unwrap(),
            currency: Currency::Usd,
            description: None,
            metadata: None,
        }
    }

    #[test]
    fn create_accepts_positive_two_decimal_amounts() {
        assert!(create_req("100.50").validate().is_ok());
        assert!(create_req("0.01").validate().is_ok());
        assert!(create_req("9999999999999.99").validate().is_ok());
    }

    #[test]
    fn create_rejects_non_positive_amounts() {
        assert!(create_req("0").validate().is_err());
        assert!(create_req("-100").validate().is_err());
    }

    #[test]
    fn create_rejects_excess_precision() {
        assert!(create_req("1.005").validate().is_err());
        assert!(create_req("12345678901234.56").validate().is_err());
    }

    #[test]
    fn create_record_defaults_to_pending_with_scaled_amount() {
        let user_id = UserId::new();
        let record = create_req("100.5").into_record(user_id);
        assert_eq!(record.status, TransactionStatus::Pending);
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.amount.to_string(), "100.50");
    }

    #[test]
    fn update_requires_at_least_one_field() {
        let patch = UpdateTransaction::default();
        assert!(patch.validate().is_err());

        let patch = UpdateTransaction {
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn update_validates_amount_when_present() {
        let patch = UpdateTransaction {
            amount: Some("-5".parse().unwrap()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn update_applies_only_provided_fields() {
        let before = create_req("100.50").into_record(UserId::new());
        let patch = UpdateTransaction {
            amount: Some("150.75".parse().unwrap()),
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };

        let after = patch.apply_to(&before);
        assert_eq!(after.amount.to_string(), "150.75");
        assert_eq!(after.status, TransactionStatus::Completed);
        assert_eq!(after.currency, before.currency);
        assert_eq!(after.id, before.id);
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn dto_amount_is_a_decimal_string() {
        let record = create_req("100.50").into_record(UserId::new());
        let value = serde_json::to_value(TransactionDto::from(&record)).unwrap();
        assert_eq!(value["amount"], "100.50");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["currency"], "USD");
        assert!(value["userId"].is_string());
    }

    #[test]
    fn create_body_ignores_client_supplied_status() {
        let body: CreateTransaction = serde_json::from_str(
            r#"{"amount": "10.00", "currency": "EUR", "status": "COMPLETED"}"#,
        )
        .unwrap();
        let record = body.into_record(UserId::new());
        assert_eq!(record.status, TransactionStatus::Pending);
    }
}
