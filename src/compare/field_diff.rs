//! Field-level payload comparison.
//!
//! Every key in the union of both payloads yields one [`FieldDiff`], sorted by
//! field name. Modified fields carry a capped unified diff and a character
//! similarity ratio computed from the longest common alignment (Myers diff
//! via `similar`), so pure insertions weigh against the unchanged remainder.

use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeSet;

use crate::model::diff::{FieldChange, FieldDiff};
use crate::model::version::Payload;

/// Lines of unchanged context around each hunk.
const CONTEXT_RADIUS: usize = 3;

/// Compare two payloads field by field.
pub fn diff_payloads(old: &Payload, new: &Payload, max_diff_lines: usize) -> Vec<FieldDiff> {
    let fields: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    fields
        .into_iter()
        .map(|field| diff_field(field, old.get(field), new.get(field), max_diff_lines))
        .collect()
}

/// Compare one field. A missing key and an explicit `null` are treated alike.
pub fn diff_field(
    field: &str,
    old: Option<&Value>,
    new: Option<&Value>,
    max_diff_lines: usize,
) -> FieldDiff {
    let old_text = old.filter(|v| !v.is_null()).map(field_text);
    let new_text = new.filter(|v| !v.is_null()).map(field_text);

    let (change, diff_lines, similarity) = match (&old_text, &new_text) {
        (None, None) => (FieldChange::Unchanged, Vec::new(), 1.0),
        (None, Some(_)) => (FieldChange::Added, Vec::new(), 0.0),
        (Some(_), None) => (FieldChange::Removed, Vec::new(), 0.0),
        (Some(a), Some(b)) if a == b => (FieldChange::Unchanged, Vec::new(), 1.0),
        (Some(a), Some(b)) => (
            FieldChange::Modified,
            unified_lines(field, a, b, max_diff_lines),
            similarity_ratio(a, b),
        ),
    };

    FieldDiff {
        field: field.to_string(),
        old_value: old_text,
        new_value: new_text,
        change,
        diff_lines,
        similarity,
    }
}

/// Strings compare verbatim; everything else by its compact JSON form.
fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fraction of characters that take part in the common alignment, in [0, 1].
pub fn similarity_ratio(old: &str, new: &str) -> f64 {
    if old.is_empty() && new.is_empty() {
        return 1.0;
    }
    let ratio = TextDiff::from_chars(old, new).ratio() as f64;
    ratio.clamp(0.0, 1.0)
}

/// Unified line diff, truncated to `cap` lines.
fn unified_lines(field: &str, old: &str, new: &str, cap: usize) -> Vec<String> {
    let text_diff = TextDiff::from_lines(old, new);

    let mut lines = vec![format!("--- {}", field), format!("+++ {}", field)];

    for group in text_diff.grouped_ops(CONTEXT_RADIUS) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_start = first.old_range().start;
        let new_start = first.new_range().start;
        let old_len = last.old_range().end - old_start;
        let new_len = last.new_range().end - new_start;
        lines.push(format!(
            "@@ -{},{} +{},{} @@",
            old_start + 1,
            old_len,
            new_start + 1,
            new_len
        ));

        for op in &group {
            for change in text_diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Equal => ' ',
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                };
                lines.push(format!("{}{}", sign, change.value().trim_end_matches('\n')));
                if lines.len() >= cap {
                    lines.truncate(cap);
                    return lines;
                }
            }
        }
    }

    lines.truncate(cap);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    #[test]
    fn test_field_added() {
        let diff = diff_field("title", None, Some(&json!("New")), 50);
        assert_eq!(diff.change, FieldChange::Added);
        assert_eq!(diff.similarity, 0.0);
        assert_eq!(diff.old_value, None);
        assert_eq!(diff.new_value.as_deref(), Some("New"));
    }

    #[test]
    fn test_field_removed() {
        let diff = diff_field("title", Some(&json!("Old")), None, 50);
        assert_eq!(diff.change, FieldChange::Removed);
        assert_eq!(diff.similarity, 0.0);
    }

    #[test]
    fn test_null_transitions() {
        let added = diff_field("price", Some(&Value::Null), Some(&json!(10)), 50);
        assert_eq!(added.change, FieldChange::Added);

        let removed = diff_field("price", Some(&json!(10)), Some(&Value::Null), 50);
        assert_eq!(removed.change, FieldChange::Removed);

        let both = diff_field("price", Some(&Value::Null), Some(&Value::Null), 50);
        assert_eq!(both.change, FieldChange::Unchanged);
        assert_eq!(both.similarity, 1.0);
    }

    #[test]
    fn test_field_unchanged() {
        let diff = diff_field("title", Some(&json!("Same")), Some(&json!("Same")), 50);
        assert_eq!(diff.change, FieldChange::Unchanged);
        assert_eq!(diff.similarity, 1.0);
        assert!(diff.diff_lines.is_empty());
    }

    #[test]
    fn test_field_modified() {
        let diff = diff_field(
            "title",
            Some(&json!("Blue Ceramic Mug")),
            Some(&json!("Blue Ceramic Mug 12oz")),
            50,
        );
        assert_eq!(diff.change, FieldChange::Modified);
        assert!(diff.similarity > 0.0 && diff.similarity < 1.0);
        assert!(diff.diff_lines.iter().any(|l| l == "-Blue Ceramic Mug"));
        assert!(diff.diff_lines.iter().any(|l| l == "+Blue Ceramic Mug 12oz"));
    }

    #[test]
    fn test_complex_values_use_json_text() {
        let diff = diff_field(
            "bullets",
            Some(&json!(["a", "b"])),
            Some(&json!(["a", "b", "c"])),
            50,
        );
        assert_eq!(diff.change, FieldChange::Modified);
        assert_eq!(diff.old_value.as_deref(), Some(r#"["a","b"]"#));
    }

    #[test]
    fn test_similarity_ratio_bounds() {
        assert_eq!(similarity_ratio("abc", "abc"), 1.0);
        assert!(similarity_ratio("abcdef", "uvwxyz") < 0.3);
        let partial = similarity_ratio("hello world", "hello there");
        assert!(partial > 0.3 && partial < 0.9);
        // pure insertion: 4 shared chars out of 4 + 8
        let inserted = similarity_ratio("abcd", "abcdefgh");
        assert!((inserted - 8.0 / 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_diff_lines_are_capped() {
        let old: String = (0..200).map(|i| format!("line {}\n", i)).collect();
        let new: String = (0..200).map(|i| format!("row {}\n", i)).collect();
        let diff = diff_field("description", Some(&json!(old)), Some(&json!(new)), 50);
        assert_eq!(diff.diff_lines.len(), 50);
    }

    #[test]
    fn test_payload_diff_covers_union_sorted() {
        let old = payload(json!({"title": "A", "price": 10, "sku": "X1"}));
        let new = payload(json!({"title": "A", "price": 11, "brand": "Acme"}));
        let diffs = diff_payloads(&old, &new, 50);

        let fields: Vec<&str> = diffs.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["brand", "price", "sku", "title"]);
        assert_eq!(diffs[0].change, FieldChange::Added);
        assert_eq!(diffs[1].change, FieldChange::Modified);
        assert_eq!(diffs[2].change, FieldChange::Removed);
        assert_eq!(diffs[3].change, FieldChange::Unchanged);
    }
}
