//! Distributed-transaction saga for the transaction write path.
//!
//! Each create/update/delete runs as a choreographed saga: the row change is
//! staged in a local database transaction, an audit-create request is
//! published, and the commit is gated on the audit service's
//! acknowledgement. A missing or negative acknowledgement rolls the local
//! change back and publishes a compensation message so the remote side
//! converges too.

pub mod coordinator;
pub mod error;
pub mod registry;

pub use coordinator::{RequestContext, TransactionSaga};
pub use error::SagaError;
pub use registry::AckRegistry;
