//! Audit verbosity levels.

use crate::Operation;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Maximum verbosity of the audit trail.
///
/// A level is a ceiling: the façade gates events against the configured
/// level, and the degradation controller may force a lower one under load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditLevel {
    /// Audit every tracked operation, queries included.
    All,
    /// Audit only operations that change data.
    ChangesOnly,
    /// Audit nothing.
    None,
}

impl AuditLevel {
    /// Whether an operation is admitted at this level.
    pub fn permits(&self, operation: Operation) -> bool {
        match self {
            Self::All => true,
            Self::ChangesOnly => operation.is_mutation(),
            Self::None => false,
        }
    }
}

impl Default for AuditLevel {
    fn default() -> Self {
        Self::ChangesOnly
    }
}
