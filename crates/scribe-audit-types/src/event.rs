//! Core audit event type.

use crate::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A complete audit record for a single tracked data operation.
///
/// Built once in the pipeline façade immediately before dispatch and
/// immutable afterwards; ownership moves to whichever consumer (worker,
/// batch buffer) currently holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// The data operation being audited.
    pub operation: Operation,
    /// Affected table or collection.
    pub table: String,
    /// Primary key of the affected row; composite keys are comma-joined.
    pub primary_key: String,
    /// Column values before the mutation. Empty for `Create`; may hold
    /// current values when no pre-image is available (soft deletes).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub old_values: HashMap<String, serde_json::Value>,
    /// Column values after the mutation.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub new_values: HashMap<String, serde_json::Value>,
    /// The underlying statement, for diagnostics.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sql: String,
    /// Bound arguments of the statement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sql_args: Vec<serde_json::Value>,
    /// Acting user's identifier; empty when unknown.
    #[serde(default)]
    pub user_id: String,
    /// Acting user's display name; empty when unknown.
    #[serde(default)]
    pub username: String,
    /// Client IP address; empty when unknown.
    #[serde(default)]
    pub ip: String,
    /// Client user agent; empty when unknown.
    #[serde(default)]
    pub user_agent: String,
    /// Request correlation identifier; empty when unknown.
    #[serde(default)]
    pub request_id: String,
}

impl AuditEvent {
    /// Create a new event builder.
    pub fn builder(operation: Operation, table: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(operation, table)
    }

    /// Whether the named field differs between the old and new values.
    ///
    /// A field present in only one of the two maps counts as changed.
    pub fn field_changed(&self, field: &str) -> bool {
        match (self.old_values.get(field), self.new_values.get(field)) {
            (Some(old), Some(new)) => old != new,
            (None, None) => false,
            _ => true,
        }
    }
}

/// Builder for constructing audit events.
#[derive(Debug)]
pub struct AuditEventBuilder {
    operation: Operation,
    table: String,
    primary_key: String,
    old_values: HashMap<String, serde_json::Value>,
    new_values: HashMap<String, serde_json::Value>,
    sql: String,
    sql_args: Vec<serde_json::Value>,
    user_id: String,
    username: String,
    ip: String,
    user_agent: String,
    request_id: String,
}

impl AuditEventBuilder {
    /// Create a new builder.
    pub fn new(operation: Operation, table: impl Into<String>) -> Self {
        Self {
            operation,
            table: table.into(),
            primary_key: String::new(),
            old_values: HashMap::new(),
            new_values: HashMap::new(),
            sql: String::new(),
            sql_args: Vec::new(),
            user_id: String::new(),
            username: String::new(),
            ip: String::new(),
            user_agent: String::new(),
            request_id: String::new(),
        }
    }

    /// Set the primary key.
    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Set the pre-mutation values.
    pub fn old_values(mut self, values: HashMap<String, serde_json::Value>) -> Self {
        self.old_values = values;
        self
    }

    /// Set the post-mutation values.
    pub fn new_values(mut self, values: HashMap<String, serde_json::Value>) -> Self {
        self.new_values = values;
        self
    }

    /// Attach the underlying statement and its arguments.
    pub fn sql(mut self, sql: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        self.sql = sql.into();
        self.sql_args = args;
        self
    }

    /// Set the acting user's identifier.
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = id.into();
        self
    }

    /// Set the acting user's display name.
    pub fn username(mut self, name: impl Into<String>) -> Self {
        self.username = name.into();
        self
    }

    /// Set the client IP address.
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Set the client user agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    /// Set the request correlation identifier.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Build the event, stamping the current time.
    pub fn build(self) -> AuditEvent {
        AuditEvent {
            timestamp: Utc::now(),
            operation: self.operation,
            table: self.table,
            primary_key: self.primary_key,
            old_values: self.old_values,
            new_values: self.new_values,
            sql: self.sql,
            sql_args: self.sql_args,
            user_id: self.user_id,
            username: self.username,
            ip: self.ip,
            user_agent: self.user_agent,
            request_id: self.request_id,
        }
    }
}
