use std::collections::HashMap;

use crate::model::diff::FieldDiff;
use crate::model::version::ChangeType;

/// Built-in field severities. Fields not listed are patch-level.
pub const DEFAULT_FIELD_SEVERITY: &[(&str, ChangeType)] = &[
    ("title", ChangeType::Major),
    ("category", ChangeType::Major),
    ("brand", ChangeType::Major),
    ("description", ChangeType::Minor),
    ("bullets", ChangeType::Minor),
    ("images", ChangeType::Minor),
    ("keywords", ChangeType::Minor),
    ("variants", ChangeType::Minor),
    ("price", ChangeType::Patch),
    ("sku", ChangeType::Patch),
    ("tags", ChangeType::Patch),
    ("custom", ChangeType::Patch),
];

/// Maps a set of field diffs to the semantic version bump they warrant.
#[derive(Debug, Clone)]
pub struct SeverityClassifier {
    table: HashMap<String, ChangeType>,
}

impl SeverityClassifier {
    /// Built-in table with deployment-specific overrides layered on top.
    pub fn with_overrides(overrides: &HashMap<String, ChangeType>) -> Self {
        let mut classifier = Self::default();
        for (field, severity) in overrides {
            classifier.table.insert(field.clone(), *severity);
        }
        classifier
    }

    pub fn field_severity(&self, field: &str) -> ChangeType {
        self.table.get(field).copied().unwrap_or(ChangeType::Patch)
    }

    /// Highest severity among changed fields; patch when nothing changed.
    pub fn classify(&self, diffs: &[FieldDiff]) -> ChangeType {
        diffs
            .iter()
            .filter(|d| d.is_changed())
            .map(|d| self.field_severity(&d.field))
            .max_by_key(|severity| severity.rank())
            .unwrap_or(ChangeType::Patch)
    }
}

impl Default for SeverityClassifier {
    fn default() -> Self {
        Self {
            table: DEFAULT_FIELD_SEVERITY
                .iter()
                .map(|(field, severity)| (field.to_string(), *severity))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::diff::FieldChange;

    fn diff(field: &str, change: FieldChange) -> FieldDiff {
        FieldDiff {
            field: field.to_string(),
            old_value: None,
            new_value: None,
            change,
            diff_lines: Vec::new(),
            similarity: 0.5,
        }
    }

    #[test]
    fn test_major_wins() {
        let classifier = SeverityClassifier::default();
        let diffs = vec![
            diff("price", FieldChange::Modified),
            diff("title", FieldChange::Modified),
            diff("bullets", FieldChange::Added),
        ];
        assert_eq!(classifier.classify(&diffs), ChangeType::Major);
    }

    #[test]
    fn test_minor() {
        let classifier = SeverityClassifier::default();
        let diffs = vec![
            diff("title", FieldChange::Unchanged),
            diff("images", FieldChange::Removed),
            diff("price", FieldChange::Modified),
        ];
        assert_eq!(classifier.classify(&diffs), ChangeType::Minor);
    }

    #[test]
    fn test_unknown_fields_are_patch() {
        let classifier = SeverityClassifier::default();
        let diffs = vec![diff("warehouse_note", FieldChange::Modified)];
        assert_eq!(classifier.classify(&diffs), ChangeType::Patch);
    }

    #[test]
    fn test_all_unchanged_is_patch() {
        let classifier = SeverityClassifier::default();
        let diffs = vec![
            diff("title", FieldChange::Unchanged),
            diff("category", FieldChange::Unchanged),
        ];
        assert_eq!(classifier.classify(&diffs), ChangeType::Patch);
        assert_eq!(classifier.classify(&[]), ChangeType::Patch);
    }

    #[test]
    fn test_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("price".to_string(), ChangeType::Major);
        overrides.insert("title".to_string(), ChangeType::Minor);
        let classifier = SeverityClassifier::with_overrides(&overrides);

        assert_eq!(classifier.field_severity("price"), ChangeType::Major);
        assert_eq!(classifier.field_severity("title"), ChangeType::Minor);
        assert_eq!(classifier.field_severity("brand"), ChangeType::Major);
    }
}
