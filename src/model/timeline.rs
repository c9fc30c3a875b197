use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::version::{ChangeType, Version, VersionNumber};

/// Chronological view over a listing's versions, optionally limited to one branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionTimeline {
    pub listing_id: String,
    /// Oldest first.
    pub versions: Vec<Version>,
    /// Branches present in `versions`, sorted.
    pub branches: Vec<String>,
    pub total_versions: usize,
    /// The most recently appended version in `versions`.
    pub current_version: Option<VersionNumber>,
}

impl VersionTimeline {
    pub fn new(listing_id: impl Into<String>, versions: Vec<Version>) -> Self {
        let mut branches: Vec<String> = versions.iter().map(|v| v.branch.clone()).collect();
        branches.sort();
        branches.dedup();

        Self {
            listing_id: listing_id.into(),
            total_versions: versions.len(),
            current_version: versions.last().map(|v| v.version_id),
            branches,
            versions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Interchange form of a timeline. Payload bodies are left out.
///
/// `current_version` is `null` when the timeline is empty, never `""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineExport {
    pub listing_id: String,
    pub current_version: Option<VersionNumber>,
    pub total_versions: usize,
    pub branches: Vec<String>,
    pub versions: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub version_id: VersionNumber,
    pub change_type: ChangeType,
    pub change_summary: String,
    pub author: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
}

impl From<&Version> for TimelineEntry {
    fn from(v: &Version) -> Self {
        Self {
            version_id: v.version_id,
            change_type: v.change_type,
            change_summary: v.change_summary.clone(),
            author: v.author.clone(),
            branch: v.branch.clone(),
            created_at: v.created_at,
            content_hash: v.content_hash.clone(),
        }
    }
}

impl From<&VersionTimeline> for TimelineExport {
    fn from(timeline: &VersionTimeline) -> Self {
        Self {
            listing_id: timeline.listing_id.clone(),
            current_version: timeline.current_version,
            total_versions: timeline.total_versions,
            branches: timeline.branches.clone(),
            versions: timeline.versions.iter().map(TimelineEntry::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::version::Payload;

    fn version(id: &str, branch: &str) -> Version {
        Version {
            version_id: id.parse().unwrap(),
            listing_id: "L1".to_string(),
            branch: branch.to_string(),
            payload: Payload::new(),
            change_type: ChangeType::Patch,
            change_summary: format!("save {}", id),
            author: "tester".to_string(),
            parent_version: None,
            content_hash: "abcdef0123456789".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_timeline_aggregates() {
        let timeline = VersionTimeline::new(
            "L1",
            vec![
                version("1.0.0", "main"),
                version("1.0.0", "promo"),
                version("1.0.1", "main"),
            ],
        );
        assert_eq!(timeline.total_versions, 3);
        assert_eq!(timeline.branches, vec!["main", "promo"]);
        assert_eq!(timeline.current_version.unwrap().to_string(), "1.0.1");
    }

    #[test]
    fn test_empty_timeline() {
        let timeline = VersionTimeline::new("L1", Vec::new());
        assert!(timeline.is_empty());
        assert_eq!(timeline.current_version, None);
        assert!(timeline.branches.is_empty());
    }

    #[test]
    fn test_empty_export_uses_null_current_version() {
        let export = TimelineExport::from(&VersionTimeline::new("L1", Vec::new()));
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["current_version"], serde_json::Value::Null);
        assert_eq!(json["total_versions"], 0);
        assert_eq!(json["versions"], serde_json::json!([]));

        let back: TimelineExport = serde_json::from_value(json).unwrap();
        assert_eq!(back, export);

        let blank = serde_json::json!({
            "listing_id": "L1",
            "current_version": "",
            "total_versions": 0,
            "branches": [],
            "versions": []
        });
        assert!(serde_json::from_value::<TimelineExport>(blank).is_err());
    }

    #[test]
    fn test_export_omits_payload() {
        let mut v = version("1.0.0", "main");
        v.payload.insert("title".to_string(), "secret body".into());
        let timeline = VersionTimeline::new("L1", vec![v]);

        let export = TimelineExport::from(&timeline);
        let json = serde_json::to_string(&export).unwrap();
        assert!(!json.contains("secret body"));
        assert!(json.contains("\"content_hash\""));
        assert_eq!(export.versions[0].version_id.to_string(), "1.0.0");
    }
}
