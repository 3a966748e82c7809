//! Audit event filtering for Scribe.
//!
//! Filters are stateless predicates deciding keep/drop per event, safe for
//! concurrent reuse. Every filter fails open: when a filter cannot evaluate
//! an event (missing user id, empty configuration) it answers "audit", so
//! that misconfiguration over-audits rather than silently hiding events.

mod chain;
mod field;
mod operation;
mod table;
mod user;

pub use chain::CompositeFilter;
pub use field::FieldFilter;
pub use operation::OperationFilter;
pub use table::TableFilter;
pub use user::UserFilter;

use scribe_audit_types::AuditEvent;
use serde::{Deserialize, Serialize};

/// A predicate deciding whether an event should be audited.
pub trait AuditFilter: Send + Sync {
    /// `true` keeps the event, `false` drops it.
    fn should_audit(&self, event: &AuditEvent) -> bool;
}

/// Polarity of a match-list filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Audit only events that match the list.
    Whitelist,
    /// Audit only events that do not match the list.
    Blacklist,
}

/// Composition of a filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterLogic {
    /// All children must keep the event.
    And,
    /// Any child keeping the event suffices.
    Or,
}
