//! Transaction-side domain model: records, enums, and wire DTOs.

pub mod dto;
pub mod transaction;
pub mod user;

pub use dto::{CreateTransaction, TransactionDto, UpdateTransaction};
pub use transaction::{Currency, TransactionRecord, TransactionStatus};
pub use user::{User, UserSummary};
