//! Activity journal of controller operations.

pub mod logger;

pub use logger::{AuditEvent, AuditLogger};
