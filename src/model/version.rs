use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{VcsError, VcsResult};

/// A listing body: string keys mapped to arbitrary JSON values.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Convert any serializable value into a [`Payload`].
///
/// Fails with [`VcsError::InvalidPayload`] when the value cannot be
/// serialized or does not serialize to a JSON object.
pub fn payload_from<T: Serialize>(value: &T) -> VcsResult<Payload> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(VcsError::InvalidPayload(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(VcsError::InvalidPayload(err.to_string())),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// ChangeType: severity of a version bump
// ---------------------------------------------------------------------------

/// Magnitude classification that drives the semantic version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Identity changes (new title, category or brand).
    Major,
    /// Content additions (bullets, images, keywords).
    Minor,
    /// Small fixes (price tweak, SKU, tags).
    Patch,
    /// Restored the payload of an earlier version.
    Rollback,
}

impl ChangeType {
    /// Ordering used when picking the most severe change. Rollback is never
    /// produced by classification and ranks with patch.
    pub fn rank(self) -> u8 {
        match self {
            ChangeType::Major => 3,
            ChangeType::Minor => 2,
            ChangeType::Patch | ChangeType::Rollback => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Major => "major",
            ChangeType::Minor => "minor",
            ChangeType::Patch => "patch",
            ChangeType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = VcsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Ok(ChangeType::Major),
            "minor" => Ok(ChangeType::Minor),
            "patch" => Ok(ChangeType::Patch),
            "rollback" => Ok(ChangeType::Rollback),
            other => Err(VcsError::InvalidArgument(format!(
                "unknown change type '{}'",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// VersionNumber: MAJOR.MINOR.PATCH
// ---------------------------------------------------------------------------

/// Semantic version identifier of a listing version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionNumber {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionNumber {
    /// The first version of every (listing, branch) history.
    pub const INITIAL: VersionNumber = VersionNumber::new(1, 0, 0);

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The next version for a change of the given severity.
    pub fn bump(self, change_type: ChangeType) -> Self {
        match change_type {
            ChangeType::Major => Self::new(self.major + 1, 0, 0),
            ChangeType::Minor => Self::new(self.major, self.minor + 1, 0),
            ChangeType::Patch | ChangeType::Rollback => {
                Self::new(self.major, self.minor, self.patch + 1)
            }
        }
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionNumber {
    type Err = VcsError;

    /// Accepts one to three dot-separated components; missing trailing
    /// components default to zero ("2.5" is 2.5.0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        if trimmed.is_empty() {
            return Err(VcsError::InvalidVersion(s.to_string()));
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() > 3 {
            return Err(VcsError::InvalidVersion(s.to_string()));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| VcsError::InvalidVersion(s.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl TryFrom<String> for VersionNumber {
    type Error = VcsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionNumber> for String {
    fn from(value: VersionNumber) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Version: immutable listing snapshot
// ---------------------------------------------------------------------------

/// An immutable snapshot of a listing on one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: VersionNumber,
    pub listing_id: String,
    pub branch: String,
    /// Full listing state at this version.
    pub payload: Payload,
    pub change_type: ChangeType,
    pub change_summary: String,
    pub author: String,
    /// Version this one was derived from; `None` for the first version on a branch.
    pub parent_version: Option<VersionNumber>,
    /// Fingerprint of `payload`.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// NewVersion: save request
// ---------------------------------------------------------------------------

/// Request to record a listing payload. Unset fields fall back to the
/// manager's configured defaults; an unset change type is classified from
/// the field diffs.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub listing_id: String,
    pub payload: Payload,
    pub change_summary: String,
    pub author: Option<String>,
    pub branch: Option<String>,
    pub change_type: Option<ChangeType>,
}

impl NewVersion {
    pub fn new(listing_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            listing_id: listing_id.into(),
            payload,
            change_summary: String::new(),
            author: None,
            branch: None,
            change_type: None,
        }
    }

    /// Set the summary for this version.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.change_summary = summary.into();
        self
    }

    /// Set the author for this version.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the branch for this version.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Force a change type instead of classifying the diff.
    pub fn with_change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = Some(change_type);
        self
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a save: a new version, or the existing latest when the payload
/// hash did not change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "version", rename_all = "snake_case")]
pub enum SaveOutcome {
    Created(Version),
    Unchanged(Version),
}

impl SaveOutcome {
    pub fn version(&self) -> &Version {
        match self {
            SaveOutcome::Created(v) | SaveOutcome::Unchanged(v) => v,
        }
    }

    pub fn into_version(self) -> Version {
        match self {
            SaveOutcome::Created(v) | SaveOutcome::Unchanged(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SaveOutcome::Created(_))
    }
}

/// Result of `auto_version`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutoVersionOutcome {
    Created { version: Version },
    /// No field differs from the latest version.
    Unchanged { version: Version },
    /// Fields changed, but by less than the threshold.
    BelowThreshold { change_ratio: f64, threshold: f64 },
}

impl AutoVersionOutcome {
    /// The newly created version, if any.
    pub fn created(&self) -> Option<&Version> {
        match self {
            AutoVersionOutcome::Created { version } => Some(version),
            _ => None,
        }
    }
}
