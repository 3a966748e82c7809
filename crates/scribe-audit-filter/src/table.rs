//! Table name filtering.

use crate::{AuditFilter, FilterMode};
use scribe_audit_types::AuditEvent;

/// Filters events by table name, with optional `prefix*` wildcards.
#[derive(Debug, Clone)]
pub struct TableFilter {
    mode: FilterMode,
    patterns: Vec<String>,
}

impl TableFilter {
    /// Create a filter over the given table name patterns.
    pub fn new(mode: FilterMode, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode,
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, table: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => table.starts_with(prefix),
                None => table == pattern,
            }
        })
    }
}

impl AuditFilter for TableFilter {
    fn should_audit(&self, event: &AuditEvent) -> bool {
        let matched = self.matches(&event.table);
        match self.mode {
            FilterMode::Whitelist => matched,
            FilterMode::Blacklist => !matched,
        }
    }
}
