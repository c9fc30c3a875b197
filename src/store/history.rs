use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{VcsError, VcsResult};
use crate::model::version::{Version, VersionNumber};

// ---------------------------------------------------------------------------
// VersionStore trait: append-only storage of listing versions
// ---------------------------------------------------------------------------

/// Storage backend for immutable listing versions, keyed by
/// (listing id, branch, version id).
///
/// Stores only grow: `append` is the sole write and never replaces a record.
/// Insertion order defines "latest" and the order returned by `list`.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Persist a new version. Fails with [`VcsError::DuplicateVersion`] when
    /// the (listing, branch, version) key is already taken.
    async fn append(&self, version: Version) -> VcsResult<()>;

    /// Most recently appended version on a branch.
    async fn latest(&self, listing_id: &str, branch: &str) -> VcsResult<Option<Version>>;

    /// Point lookup.
    async fn get(
        &self,
        listing_id: &str,
        branch: &str,
        version_id: &VersionNumber,
    ) -> VcsResult<Option<Version>>;

    /// The `limit` most recent versions, returned oldest first. With no
    /// branch, versions from every branch of the listing are interleaved in
    /// insertion order.
    async fn list(
        &self,
        listing_id: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> VcsResult<Vec<Version>>;

    /// Branches that hold at least one version of the listing.
    async fn branches(&self, listing_id: &str) -> VcsResult<BTreeSet<String>>;

    /// Number of stored versions for a listing, optionally on one branch.
    async fn version_count(&self, listing_id: &str, branch: Option<&str>) -> VcsResult<usize> {
        Ok(self.list(listing_id, branch, usize::MAX).await?.len())
    }
}

// ---------------------------------------------------------------------------
// InMemoryVersionStore: for testing and ephemeral sessions
// ---------------------------------------------------------------------------

/// Per-listing history: every branch interleaved in append order.
#[derive(Default)]
struct ListingHistory {
    versions: Vec<Version>,
    index: HashMap<(String, VersionNumber), usize>,
    heads: HashMap<String, usize>,
}

/// In-memory version store. Data is lost when the store is dropped.
pub struct InMemoryVersionStore {
    listings: RwLock<HashMap<String, ListingHistory>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self {
            listings: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn append(&self, version: Version) -> VcsResult<()> {
        let mut listings = self.listings.write().await;
        let history = listings.entry(version.listing_id.clone()).or_default();

        let key = (version.branch.clone(), version.version_id);
        if history.index.contains_key(&key) {
            return Err(VcsError::DuplicateVersion {
                listing_id: version.listing_id,
                branch: version.branch,
                version_id: version.version_id.to_string(),
            });
        }

        debug!(
            listing_id = %version.listing_id,
            branch = %version.branch,
            version = %version.version_id,
            "appending version"
        );

        let position = history.versions.len();
        history.heads.insert(version.branch.clone(), position);
        history.index.insert(key, position);
        history.versions.push(version);
        Ok(())
    }

    async fn latest(&self, listing_id: &str, branch: &str) -> VcsResult<Option<Version>> {
        let listings = self.listings.read().await;
        Ok(listings.get(listing_id).and_then(|history| {
            history
                .heads
                .get(branch)
                .map(|&position| history.versions[position].clone())
        }))
    }

    async fn get(
        &self,
        listing_id: &str,
        branch: &str,
        version_id: &VersionNumber,
    ) -> VcsResult<Option<Version>> {
        let listings = self.listings.read().await;
        Ok(listings.get(listing_id).and_then(|history| {
            history
                .index
                .get(&(branch.to_string(), *version_id))
                .map(|&position| history.versions[position].clone())
        }))
    }

    async fn list(
        &self,
        listing_id: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> VcsResult<Vec<Version>> {
        let listings = self.listings.read().await;
        let Some(history) = listings.get(listing_id) else {
            return Ok(Vec::new());
        };

        let mut recent: Vec<Version> = history
            .versions
            .iter()
            .rev()
            .filter(|v| branch.map_or(true, |b| v.branch == b))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn branches(&self, listing_id: &str) -> VcsResult<BTreeSet<String>> {
        let listings = self.listings.read().await;
        Ok(listings
            .get(listing_id)
            .map(|history| history.heads.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn version_count(&self, listing_id: &str, branch: Option<&str>) -> VcsResult<usize> {
        let listings = self.listings.read().await;
        Ok(listings
            .get(listing_id)
            .map(|history| match branch {
                Some(b) => history.versions.iter().filter(|v| v.branch == b).count(),
                None => history.versions.len(),
            })
            .unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::version::{ChangeType, Payload};
    use chrono::Utc;

    fn version(listing_id: &str, branch: &str, id: &str) -> Version {
        Version {
            version_id: id.parse().unwrap(),
            listing_id: listing_id.to_string(),
            branch: branch.to_string(),
            payload: Payload::new(),
            change_type: ChangeType::Patch,
            change_summary: String::new(),
            author: "tester".to_string(),
            parent_version: None,
            content_hash: "0000000000000000".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_append_and_get() {
        let store = InMemoryVersionStore::new();
        store.append(version("L1", "main", "1.0.0")).await.unwrap();

        let found = store
            .get("L1", "main", &"1.0.0".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.listing_id, "L1");

        assert!(store
            .get("L1", "other", &"1.0.0".parse().unwrap())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get("L2", "main", &"1.0.0".parse().unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_in_memory_rejects_duplicate() {
        let store = InMemoryVersionStore::new();
        store.append(version("L1", "main", "1.0.0")).await.unwrap();

        let err = store.append(version("L1", "main", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, VcsError::DuplicateVersion { .. }));
        assert!(err.is_retryable());

        // Same version id on another branch is a separate key.
        store.append(version("L1", "promo", "1.0.0")).await.unwrap();
        assert_eq!(store.version_count("L1", None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_latest_follows_insertion_order() {
        let store = InMemoryVersionStore::new();
        assert!(store.latest("L1", "main").await.unwrap().is_none());

        store.append(version("L1", "main", "1.0.0")).await.unwrap();
        store.append(version("L1", "promo", "1.0.0")).await.unwrap();
        store.append(version("L1", "main", "1.1.0")).await.unwrap();

        let latest = store.latest("L1", "main").await.unwrap().unwrap();
        assert_eq!(latest.version_id.to_string(), "1.1.0");
        let promo = store.latest("L1", "promo").await.unwrap().unwrap();
        assert_eq!(promo.version_id.to_string(), "1.0.0");
    }

    #[tokio::test]
    async fn test_in_memory_list_filters_and_limits() {
        let store = InMemoryVersionStore::new();
        for id in ["1.0.0", "1.0.1", "1.0.2", "1.0.3"] {
            store.append(version("L1", "main", id)).await.unwrap();
        }
        store.append(version("L1", "promo", "1.0.0")).await.unwrap();

        let main = store.list("L1", Some("main"), 2).await.unwrap();
        let ids: Vec<String> = main.iter().map(|v| v.version_id.to_string()).collect();
        assert_eq!(ids, vec!["1.0.2", "1.0.3"]);

        let all = store.list("L1", None, 10).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.last().unwrap().branch, "promo");

        assert!(store.list("missing", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_branches() {
        let store = InMemoryVersionStore::new();
        store.append(version("L1", "main", "1.0.0")).await.unwrap();
        store.append(version("L1", "promo", "1.0.0")).await.unwrap();
        store.append(version("L2", "winter", "1.0.0")).await.unwrap();

        let branches: Vec<String> = store.branches("L1").await.unwrap().into_iter().collect();
        assert_eq!(branches, vec!["main", "promo"]);
        assert!(store.branches("L3").await.unwrap().is_empty());
    }
}
