//! Actor filtering.

use crate::{AuditFilter, FilterMode};
use scribe_audit_types::AuditEvent;

/// Filters events by the acting user's identifier.
///
/// An event carrying no user id is always audited: the filter cannot
/// evaluate it, and the failure mode favors over-auditing.
#[derive(Debug, Clone)]
pub struct UserFilter {
    mode: FilterMode,
    user_ids: Vec<String>,
}

impl UserFilter {
    /// Create a filter over the given user identifiers.
    pub fn new(mode: FilterMode, user_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode,
            user_ids: user_ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuditFilter for UserFilter {
    fn should_audit(&self, event: &AuditEvent) -> bool {
        if event.user_id.is_empty() {
            return true;
        }
        let matched = self.user_ids.iter().any(|id| *id == event.user_id);
        match self.mode {
            FilterMode::Whitelist => matched,
            FilterMode::Blacklist => !matched,
        }
    }
}
