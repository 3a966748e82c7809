//! Filter composition.

use crate::{AuditFilter, FilterLogic};
use scribe_audit_types::AuditEvent;
use std::sync::Arc;

/// Combines child filters under And/Or logic, short-circuiting.
///
/// An empty composite audits everything.
pub struct CompositeFilter {
    logic: FilterLogic,
    children: Vec<Arc<dyn AuditFilter>>,
}

impl CompositeFilter {
    /// Create a composite over the given children.
    pub fn new(logic: FilterLogic, children: Vec<Arc<dyn AuditFilter>>) -> Self {
        Self { logic, children }
    }
}

impl AuditFilter for CompositeFilter {
    fn should_audit(&self, event: &AuditEvent) -> bool {
        if self.children.is_empty() {
            return true;
        }
        match self.logic {
            FilterLogic::And => self.children.iter().all(|f| f.should_audit(event)),
            FilterLogic::Or => self.children.iter().any(|f| f.should_audit(event)),
        }
    }
}
