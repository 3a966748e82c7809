//! Operation filtering.

use crate::AuditFilter;
use scribe_audit_types::{AuditEvent, Operation};

/// Whitelist filter over operation kinds.
///
/// An empty list audits everything.
#[derive(Debug, Clone)]
pub struct OperationFilter {
    operations: Vec<Operation>,
}

impl OperationFilter {
    /// Create a filter keeping only the listed operations.
    pub fn new(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
        }
    }
}

impl AuditFilter for OperationFilter {
    fn should_audit(&self, event: &AuditEvent) -> bool {
        self.operations.is_empty() || self.operations.contains(&event.operation)
    }
}
