use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::compare::{content_hash, diff_payloads, mean_similarity, SeverityClassifier};
use crate::config::VersioningConfig;
use crate::error::{VcsError, VcsResult};
use crate::model::diff::VersionComparison;
use crate::model::timeline::{TimelineExport, VersionTimeline};
use crate::model::version::{
    AutoVersionOutcome, ChangeType, NewVersion, Payload, SaveOutcome, Version, VersionNumber,
};
use crate::store::{InMemoryVersionStore, VersionStore};

/// Longest accepted listing id or branch name.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Changed field names listed in an auto-generated summary before "+N more".
const SUMMARY_FIELD_LIMIT: usize = 5;

type BranchKey = (String, String);

// ---------------------------------------------------------------------------
// VersionManager: public entry point of the engine
// ---------------------------------------------------------------------------

/// Orchestrates saving, comparing, branching, merging and rolling back
/// listing versions on top of a [`VersionStore`].
///
/// Every mutating operation funnels through one save path that runs
/// read-latest, compute next id, append while holding a per
/// (listing, branch) lock. A [`VcsError::DuplicateVersion`] raised by the
/// store (another process sharing a durable store won the race) is retried
/// up to `save_retries` times after re-reading the latest version.
pub struct VersionManager {
    store: Arc<dyn VersionStore>,
    classifier: SeverityClassifier,
    settings: VersioningConfig,
    branch_locks: BranchLockTable,
}

/// A save request with defaults applied and identifiers validated.
struct PendingSave {
    listing_id: String,
    branch: String,
    author: String,
    payload: Payload,
    change_summary: String,
    change_type: Option<ChangeType>,
}

type BranchLockTable = Mutex<HashMap<BranchKey, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one branch lock. On drop it releases the lock and prunes the table
/// entry if nobody else holds a handle to it.
struct BranchGuard<'a> {
    locks: &'a BranchLockTable,
    key: BranchKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for BranchGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Handles are only cloned under the table lock, so a count of one
        // here means no other caller can reach this entry.
        if let Ok(mut locks) = self.locks.lock() {
            if locks
                .get(&self.key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&self.key);
            }
        }
    }
}

impl VersionManager {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self::with_config(store, VersioningConfig::default())
    }

    pub fn with_config(store: Arc<dyn VersionStore>, settings: VersioningConfig) -> Self {
        Self {
            store,
            classifier: SeverityClassifier::with_overrides(&settings.severity_overrides),
            settings,
            branch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Manager over a fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryVersionStore::new()))
    }

    pub fn settings(&self) -> &VersioningConfig {
        &self.settings
    }

    pub fn default_branch(&self) -> &str {
        &self.settings.default_branch
    }

    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Save path
    // -----------------------------------------------------------------------

    /// Record a payload as the next version of its branch.
    ///
    /// Returns [`SaveOutcome::Unchanged`] with the current latest version
    /// when the payload hash matches it.
    #[instrument(skip(self, request), fields(listing_id = %request.listing_id))]
    pub async fn save_version(&self, request: NewVersion) -> VcsResult<SaveOutcome> {
        let pending = self.resolve(request)?;
        let _guard = self
            .lock_branch(&pending.listing_id, &pending.branch)
            .await?;
        self.save_unlocked(&pending).await
    }

    fn resolve(&self, request: NewVersion) -> VcsResult<PendingSave> {
        let branch = request
            .branch
            .unwrap_or_else(|| self.settings.default_branch.clone());
        validate_identifier("listing id", &request.listing_id)?;
        validate_identifier("branch", &branch)?;

        Ok(PendingSave {
            listing_id: request.listing_id,
            branch,
            author: request
                .author
                .unwrap_or_else(|| self.settings.default_author.clone()),
            payload: request.payload,
            change_summary: request.change_summary,
            change_type: request.change_type,
        })
    }

    /// Wait for exclusive access to one (listing, branch). The table entry
    /// is dropped again once no caller holds or waits on it.
    async fn lock_branch(&self, listing_id: &str, branch: &str) -> VcsResult<BranchGuard<'_>> {
        let key = (listing_id.to_string(), branch.to_string());
        let lock = {
            let mut locks = self
                .branch_locks
                .lock()
                .map_err(|e| VcsError::Internal(format!("branch lock table poisoned: {}", e)))?;
            locks.entry(key.clone()).or_default().clone()
        };

        Ok(BranchGuard {
            locks: &self.branch_locks,
            key,
            guard: Some(lock.lock_owned().await),
        })
    }

    /// Caller must hold the branch lock.
    async fn save_unlocked(&self, pending: &PendingSave) -> VcsResult<SaveOutcome> {
        let mut attempt = 0;
        loop {
            match self.try_save(pending).await {
                Err(err) if err.is_retryable() && attempt < self.settings.save_retries => {
                    attempt += 1;
                    warn!(
                        listing_id = %pending.listing_id,
                        branch = %pending.branch,
                        attempt,
                        error = %err,
                        "version number taken by a concurrent writer; retrying"
                    );
                }
                other => return other,
            }
        }
    }

    async fn try_save(&self, pending: &PendingSave) -> VcsResult<SaveOutcome> {
        let hash = content_hash(&pending.payload);
        let latest = self
            .store
            .latest(&pending.listing_id, &pending.branch)
            .await?;
        let now = Utc::now();

        let version = match latest {
            None => Version {
                version_id: VersionNumber::INITIAL,
                listing_id: pending.listing_id.clone(),
                branch: pending.branch.clone(),
                payload: pending.payload.clone(),
                change_type: pending.change_type.unwrap_or(ChangeType::Major),
                change_summary: pending.change_summary.clone(),
                author: pending.author.clone(),
                parent_version: None,
                content_hash: hash,
                created_at: now,
            },
            Some(latest) => {
                if latest.content_hash == hash {
                    debug!(
                        listing_id = %pending.listing_id,
                        branch = %pending.branch,
                        version = %latest.version_id,
                        "payload unchanged; keeping latest version"
                    );
                    return Ok(SaveOutcome::Unchanged(latest));
                }

                let change_type = match pending.change_type {
                    Some(change_type) => change_type,
                    None => {
                        let diffs = diff_payloads(
                            &latest.payload,
                            &pending.payload,
                            self.settings.max_diff_lines,
                        );
                        self.classifier.classify(&diffs)
                    }
                };

                Version {
                    version_id: latest.version_id.bump(change_type),
                    listing_id: pending.listing_id.clone(),
                    branch: pending.branch.clone(),
                    payload: pending.payload.clone(),
                    change_type,
                    change_summary: pending.change_summary.clone(),
                    author: pending.author.clone(),
                    parent_version: Some(latest.version_id),
                    content_hash: hash,
                    created_at: now.max(latest.created_at),
                }
            }
        };

        self.store.append(version.clone()).await?;
        info!(
            listing_id = %version.listing_id,
            branch = %version.branch,
            version = %version.version_id,
            change_type = %version.change_type,
            "created version"
        );
        Ok(SaveOutcome::Created(version))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_latest(&self, listing_id: &str, branch: &str) -> VcsResult<Option<Version>> {
        self.store.latest(listing_id, branch).await
    }

    /// Point lookup; `version_id` is a `MAJOR.MINOR.PATCH` string.
    pub async fn get_version(
        &self,
        listing_id: &str,
        version_id: &str,
        branch: &str,
    ) -> VcsResult<Option<Version>> {
        let version_id: VersionNumber = version_id.parse()?;
        self.store.get(listing_id, branch, &version_id).await
    }

    /// Chronological view of up to `limit` recent versions (the configured
    /// history limit when `None`), across all branches when `branch` is `None`.
    pub async fn get_timeline(
        &self,
        listing_id: &str,
        branch: Option<&str>,
        limit: Option<usize>,
    ) -> VcsResult<VersionTimeline> {
        let limit = limit.unwrap_or(self.settings.history_limit);
        let versions = self.store.list(listing_id, branch, limit).await?;
        Ok(VersionTimeline::new(listing_id, versions))
    }

    /// Sorted branch names of a listing.
    pub async fn get_branches(&self, listing_id: &str) -> VcsResult<Vec<String>> {
        Ok(self.store.branches(listing_id).await?.into_iter().collect())
    }

    /// Timeline summary as pretty-printed JSON, payloads omitted.
    pub async fn export_timeline(
        &self,
        listing_id: &str,
        branch: Option<&str>,
    ) -> VcsResult<String> {
        let timeline = self.get_timeline(listing_id, branch, None).await?;
        Ok(serde_json::to_string_pretty(&TimelineExport::from(&timeline))?)
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    /// Compare two versions on the same branch.
    pub async fn compare(
        &self,
        listing_id: &str,
        version_a: &str,
        version_b: &str,
        branch: &str,
    ) -> VcsResult<VersionComparison> {
        let a = self.require_version(listing_id, version_a, branch).await?;
        let b = self.require_version(listing_id, version_b, branch).await?;
        Ok(self.build_comparison(&a, &b))
    }

    /// Compare the latest versions of two branches.
    pub async fn compare_branches(
        &self,
        listing_id: &str,
        branch_a: &str,
        branch_b: &str,
    ) -> VcsResult<VersionComparison> {
        let a = self.require_latest(listing_id, branch_a).await?;
        let b = self.require_latest(listing_id, branch_b).await?;
        Ok(self.build_comparison(&a, &b))
    }

    fn build_comparison(&self, a: &Version, b: &Version) -> VersionComparison {
        let field_diffs = diff_payloads(&a.payload, &b.payload, self.settings.max_diff_lines);
        let changed_fields = field_diffs.iter().filter(|d| d.is_changed()).count();

        VersionComparison {
            listing_id: a.listing_id.clone(),
            branch_a: a.branch.clone(),
            version_a: a.version_id,
            branch_b: b.branch.clone(),
            version_b: b.version_id,
            overall_similarity: mean_similarity(&field_diffs),
            change_severity: self.classifier.classify(&field_diffs),
            changed_fields,
            total_fields: field_diffs.len(),
            field_diffs,
        }
    }

    async fn require_version(
        &self,
        listing_id: &str,
        version_id: &str,
        branch: &str,
    ) -> VcsResult<Version> {
        self.get_version(listing_id, version_id, branch)
            .await?
            .ok_or_else(|| VcsError::VersionNotFound {
                listing_id: listing_id.to_string(),
                branch: branch.to_string(),
                version_id: version_id.to_string(),
            })
    }

    async fn require_latest(&self, listing_id: &str, branch: &str) -> VcsResult<Version> {
        self.get_latest(listing_id, branch)
            .await?
            .ok_or_else(|| VcsError::NoHistory {
                listing_id: listing_id.to_string(),
                branch: branch.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Rollback, branch, merge, auto-version
    // -----------------------------------------------------------------------

    /// Record the payload of `target_version` as a new `rollback` version.
    ///
    /// Rolling back to a payload identical to the current latest is the
    /// ordinary hash no-op and returns [`SaveOutcome::Unchanged`].
    #[instrument(skip(self))]
    pub async fn rollback(
        &self,
        listing_id: &str,
        target_version: &str,
        branch: &str,
        author: &str,
    ) -> VcsResult<SaveOutcome> {
        validate_identifier("listing id", listing_id)?;
        validate_identifier("branch", branch)?;

        let _guard = self.lock_branch(listing_id, branch).await?;

        let target = self.require_version(listing_id, target_version, branch).await?;
        let outcome = self
            .save_unlocked(&PendingSave {
                listing_id: listing_id.to_string(),
                branch: branch.to_string(),
                author: author.to_string(),
                payload: target.payload,
                change_summary: format!("Rollback to v{}", target.version_id),
                change_type: Some(ChangeType::Rollback),
            })
            .await?;

        if outcome.is_created() {
            info!(listing_id, branch, target = %target.version_id, "rolled back");
        }
        Ok(outcome)
    }

    /// Start `new_branch` from the latest version of `from_branch`. The new
    /// branch gets its own sequence starting at 1.0.0.
    #[instrument(skip(self))]
    pub async fn create_branch(
        &self,
        listing_id: &str,
        new_branch: &str,
        from_branch: &str,
        author: &str,
    ) -> VcsResult<Version> {
        validate_identifier("listing id", listing_id)?;
        validate_identifier("branch", new_branch)?;
        validate_identifier("branch", from_branch)?;
        if new_branch == from_branch {
            return Err(VcsError::InvalidArgument(format!(
                "cannot branch '{}' from itself",
                new_branch
            )));
        }

        let _guard = self.lock_branch(listing_id, new_branch).await?;

        let source = self
            .get_latest(listing_id, from_branch)
            .await?
            .ok_or_else(|| VcsError::BranchSourceMissing {
                listing_id: listing_id.to_string(),
                branch: from_branch.to_string(),
            })?;

        if self.get_latest(listing_id, new_branch).await?.is_some() {
            return Err(VcsError::BranchAlreadyExists {
                listing_id: listing_id.to_string(),
                branch: new_branch.to_string(),
            });
        }

        let outcome = self
            .save_unlocked(&PendingSave {
                listing_id: listing_id.to_string(),
                branch: new_branch.to_string(),
                author: author.to_string(),
                payload: source.payload,
                change_summary: format!(
                    "Branch '{}' from {} v{}",
                    new_branch, from_branch, source.version_id
                ),
                change_type: Some(ChangeType::Patch),
            })
            .await?;

        info!(listing_id, new_branch, from_branch, "created branch");
        Ok(outcome.into_version())
    }

    /// Copy the latest payload of `source_branch` onto `target_branch` as a
    /// minor version. Last writer wins; fields are not reconciled.
    #[instrument(skip(self))]
    pub async fn merge_branch(
        &self,
        listing_id: &str,
        source_branch: &str,
        target_branch: &str,
        author: &str,
    ) -> VcsResult<SaveOutcome> {
        validate_identifier("listing id", listing_id)?;
        validate_identifier("branch", source_branch)?;
        validate_identifier("branch", target_branch)?;
        if source_branch == target_branch {
            return Err(VcsError::InvalidArgument(format!(
                "cannot merge '{}' into itself",
                source_branch
            )));
        }

        let _guard = self.lock_branch(listing_id, target_branch).await?;

        let source = self
            .get_latest(listing_id, source_branch)
            .await?
            .ok_or_else(|| VcsError::BranchSourceMissing {
                listing_id: listing_id.to_string(),
                branch: source_branch.to_string(),
            })?;

        let outcome = self
            .save_unlocked(&PendingSave {
                listing_id: listing_id.to_string(),
                branch: target_branch.to_string(),
                author: author.to_string(),
                payload: source.payload,
                change_summary: format!(
                    "Merge '{}' v{} into {}",
                    source_branch, source.version_id, target_branch
                ),
                change_type: Some(ChangeType::Minor),
            })
            .await?;

        if outcome.is_created() {
            info!(listing_id, source_branch, target_branch, "merged branch");
        }
        Ok(outcome)
    }

    /// Save `payload` only when it differs from the latest version by at
    /// least `threshold`, measured as `1 - mean field similarity`. Uses the
    /// configured threshold when `None`.
    #[instrument(skip(self, payload))]
    pub async fn auto_version(
        &self,
        listing_id: &str,
        payload: Payload,
        branch: &str,
        author: &str,
        threshold: Option<f64>,
    ) -> VcsResult<AutoVersionOutcome> {
        validate_identifier("listing id", listing_id)?;
        validate_identifier("branch", branch)?;
        let threshold = threshold.unwrap_or(self.settings.auto_version_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(VcsError::InvalidArgument(format!(
                "threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        let _guard = self.lock_branch(listing_id, branch).await?;

        let mut pending = PendingSave {
            listing_id: listing_id.to_string(),
            branch: branch.to_string(),
            author: author.to_string(),
            payload,
            change_summary: "Initial version".to_string(),
            change_type: None,
        };

        let Some(latest) = self.get_latest(listing_id, branch).await? else {
            let outcome = self.save_unlocked(&pending).await?;
            return Ok(AutoVersionOutcome::Created {
                version: outcome.into_version(),
            });
        };

        let diffs = diff_payloads(&latest.payload, &pending.payload, self.settings.max_diff_lines);
        let changed: Vec<&str> = diffs
            .iter()
            .filter(|d| d.is_changed())
            .map(|d| d.field.as_str())
            .collect();
        if changed.is_empty() {
            return Ok(AutoVersionOutcome::Unchanged { version: latest });
        }

        let change_ratio = 1.0 - mean_similarity(&diffs);
        if change_ratio < threshold {
            debug!(listing_id, branch, change_ratio, threshold, "change below threshold");
            return Ok(AutoVersionOutcome::BelowThreshold {
                change_ratio,
                threshold,
            });
        }

        pending.change_summary = auto_summary(&changed);
        Ok(match self.save_unlocked(&pending).await? {
            SaveOutcome::Created(version) => AutoVersionOutcome::Created { version },
            SaveOutcome::Unchanged(version) => AutoVersionOutcome::Unchanged { version },
        })
    }
}

/// "Updated: a, b, c" with at most five names, then "+N more".
fn auto_summary(changed: &[&str]) -> String {
    let shown = changed.len().min(SUMMARY_FIELD_LIMIT);
    let mut summary = format!("Updated: {}", changed[..shown].join(", "));
    if changed.len() > SUMMARY_FIELD_LIMIT {
        summary.push_str(&format!(" +{} more", changed.len() - SUMMARY_FIELD_LIMIT));
    }
    summary
}

/// Listing ids and branch names: non-empty, bounded, no control characters.
pub fn validate_identifier(kind: &str, value: &str) -> VcsResult<()> {
    if value.trim().is_empty() {
        return Err(VcsError::InvalidArgument(format!("{} must not be empty", kind)));
    }
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(VcsError::InvalidArgument(format!(
            "{} exceeds {} characters",
            kind, MAX_IDENTIFIER_LEN
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(VcsError::InvalidArgument(format!(
            "{} contains control characters",
            kind
        )));
    }
    Ok(())
}
