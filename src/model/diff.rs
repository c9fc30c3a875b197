use serde::{Deserialize, Serialize};

use crate::model::version::{ChangeType, VersionNumber};

// ---------------------------------------------------------------------------
// FieldDiff: per-field comparison result
// ---------------------------------------------------------------------------

/// How a single field differs between two payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldChange {
    Added,
    Removed,
    Modified,
    Unchanged,
}

/// Comparison of one payload field. Values are kept in their serialized
/// text form: strings verbatim, everything else as compact JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change: FieldChange,
    /// Unified diff lines, present only for modified fields and capped.
    pub diff_lines: Vec<String>,
    /// Share of characters matched between old and new, in [0, 1].
    pub similarity: f64,
}

impl FieldDiff {
    pub fn is_changed(&self) -> bool {
        self.change != FieldChange::Unchanged
    }
}

// ---------------------------------------------------------------------------
// VersionComparison: aggregate between two versions
// ---------------------------------------------------------------------------

/// Field-by-field comparison between two versions of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub listing_id: String,
    pub branch_a: String,
    pub version_a: VersionNumber,
    pub branch_b: String,
    pub version_b: VersionNumber,
    pub field_diffs: Vec<FieldDiff>,
    /// Mean of the per-field similarities (1.0 when there are no fields).
    pub overall_similarity: f64,
    pub change_severity: ChangeType,
    pub changed_fields: usize,
    pub total_fields: usize,
}

impl VersionComparison {
    /// Names of the fields that are not unchanged, in field order.
    pub fn changed_field_names(&self) -> Vec<&str> {
        self.field_diffs
            .iter()
            .filter(|d| d.is_changed())
            .map(|d| d.field.as_str())
            .collect()
    }
}
