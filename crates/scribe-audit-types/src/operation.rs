//! Tracked data-layer operations.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The kind of data operation an audit event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    /// Row insertion.
    Create,
    /// Row modification.
    Update,
    /// Row removal (hard or soft).
    Delete,
    /// Read-only access.
    Query,
}

impl Operation {
    /// Whether this operation changes data.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Query)
    }
}
