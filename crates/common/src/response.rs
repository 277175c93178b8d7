use chrono::{DateTime, Utc};
use serde::Serialize;

/// Success envelope wrapping every JSON response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    /// Wraps a payload in the success envelope.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    /// Success envelope with no payload.
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            timestamp: Utc::now(),
        }
    }
}

/// Error envelope; the `code` values are stable and consumed by clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code,
                message: message.into(),
            },
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_wraps_payload() {
        let body = serde_json::to_value(ApiResponse::ok(42)).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], 42);
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn empty_omits_data_field() {
        let body = serde_json::to_value(ApiResponse::empty()).unwrap();
        assert_eq!(body["success"], true);
        assert!(body.get("data").is_none());
    }

    #[test]
    fn error_body_carries_code_and_message() {
        let body = serde_json::to_value(ErrorBody::new("NOT_FOUND", "gone")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "gone");
    }
}
