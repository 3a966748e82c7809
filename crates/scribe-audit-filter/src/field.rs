//! Changed-field filtering.

use crate::AuditFilter;
use scribe_audit_types::AuditEvent;

/// Audits an event iff any of the named fields changed.
///
/// A field present in only one of the old/new maps counts as changed. An
/// empty watch list audits everything, like the other filters.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    fields: Vec<String>,
}

impl FieldFilter {
    /// Create a filter watching the given field names.
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuditFilter for FieldFilter {
    fn should_audit(&self, event: &AuditEvent) -> bool {
        self.fields.is_empty() || self.fields.iter().any(|field| event.field_changed(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_audit_types::Operation;
    use serde_json::json;
    use std::collections::HashMap;

    fn values(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn keeps_event_when_watched_field_changed() {
        let filter = FieldFilter::new(["email"]);
        let event = AuditEvent::builder(Operation::Update, "users")
            .old_values(values(&[("email", json!("a@x")), ("name", json!("a"))]))
            .new_values(values(&[("email", json!("b@x")), ("name", json!("a"))]))
            .build();
        assert!(filter.should_audit(&event));
    }

    #[test]
    fn drops_event_when_watched_fields_unchanged() {
        let filter = FieldFilter::new(["email"]);
        let event = AuditEvent::builder(Operation::Update, "users")
            .old_values(values(&[("email", json!("a@x")), ("name", json!("a"))]))
            .new_values(values(&[("email", json!("a@x")), ("name", json!("b"))]))
            .build();
        assert!(!filter.should_audit(&event));
    }

    #[test]
    fn empty_watch_list_audits_everything() {
        let filter = FieldFilter::new(Vec::<String>::new());
        let event = AuditEvent::builder(Operation::Update, "users").build();
        assert!(filter.should_audit(&event));
    }

    #[test]
    fn field_added_in_new_values_counts_as_changed() {
        let filter = FieldFilter::new(["deleted_at"]);
        let event = AuditEvent::builder(Operation::Delete, "users")
            .new_values(values(&[("deleted_at", json!("now"))]))
            .build();
        assert!(filter.should_audit(&event));
    }
}
