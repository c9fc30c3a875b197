//! Pure comparison building blocks: content fingerprints, field diffs and
//! severity classification. Nothing here touches storage.

pub mod field_diff;
pub mod hash;
pub mod severity;

pub use field_diff::{diff_field, diff_payloads, similarity_ratio};
pub use hash::{canonical_json, content_hash, CONTENT_HASH_LEN};
pub use severity::{SeverityClassifier, DEFAULT_FIELD_SEVERITY};

use crate::model::diff::FieldDiff;

/// Mean of the per-field similarities; 1.0 when there are no fields.
pub fn mean_similarity(diffs: &[FieldDiff]) -> f64 {
    if diffs.is_empty() {
        return 1.0;
    }
    diffs.iter().map(|d| d.similarity).sum::<f64>() / diffs.len() as f64
}
