//! Audit event types for Scribe.

mod event;
mod level;
mod operation;

pub use event::{AuditEvent, AuditEventBuilder};
pub use level::AuditLevel;
pub use operation::Operation;
