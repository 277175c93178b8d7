//! Durable stream layer for the audit saga.
//!
//! Both services talk to each other exclusively through the four subjects in
//! [`subjects`]. The [`MessageBus`] trait abstracts the broker; production
//! uses a NATS JetStream stream with ~7-day retention, tests use the
//! in-memory bus.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod nats;
pub mod subjects;

pub use bus::{BusMessage, MessageBus, MessageBusExt, Subscription};
pub use envelope::{
    AuditAck, AuditAction, AuditEnvelope, AuditFail, AuditRollback, AuditStatus, ChangeSet,
};
pub use error::{BusError, Result};
pub use memory::InMemoryMessageBus;
pub use nats::NatsMessageBus;
