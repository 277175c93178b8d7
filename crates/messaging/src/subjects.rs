//! Subject and stream names shared by both services.

use std::time::Duration;

/// Audit-create requests, published by the saga coordinator.
pub const AUDIT_LOG_CREATE: &str = "audit.log.create";

/// Acknowledgements, published by the audit consumer after a row is written.
pub const AUDIT_LOG_CREATED: &str = "audit.log.created";

/// Failure notices, published by the audit consumer when a write fails.
pub const AUDIT_LOG_FAILED: &str = "audit.log.failed";

/// Compensation requests, published by the saga coordinator on rollback.
pub const AUDIT_LOG_ROLLBACK: &str = "audit.log.rollback";

/// Name of the single durable stream covering all audit subjects.
pub const STREAM_NAME: &str = "AUDIT";

/// Subject wildcard bound to [`STREAM_NAME`].
pub const STREAM_WILDCARD: &str = "audit.log.>";

/// Retention for messages on the stream.
pub const STREAM_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
