//! RocksDB-backed version store.
//!
//! Layout:
//! - `versions`: `[listing][0x00][seq: u64 BE]` -> version record
//! - `version_index`: `[listing][0x00][branch][0x00][version]` -> seq
//! - `branch_heads`: `[listing][0x00][branch]` -> seq of the latest version
//! - `meta`: `next_seq` -> next insertion sequence
//!
//! The sequence is a store-wide surrogate id, so iterating a listing's prefix
//! in `versions` yields insertion order across all of its branches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{BoundColumnFamily, Direction, IteratorMode, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{VcsError, VcsResult};
use crate::model::version::{ChangeType, Version, VersionNumber};
use crate::store::history::VersionStore;

use super::{CF_BRANCH_HEADS, CF_META, CF_VERSIONS, CF_VERSION_INDEX};

const NEXT_SEQ_KEY: &[u8] = b"next_seq";
const SEPARATOR: u8 = 0x00;

/// On-disk form of a version. The payload is kept as JSON text because
/// arbitrary JSON values cannot round-trip through bincode.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRecord {
    version_id: String,
    listing_id: String,
    branch: String,
    payload_json: String,
    change_type: ChangeType,
    change_summary: String,
    author: String,
    parent_version: Option<String>,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl VersionRecord {
    fn from_version(version: &Version) -> VcsResult<Self> {
        Ok(Self {
            version_id: version.version_id.to_string(),
            listing_id: version.listing_id.clone(),
            branch: version.branch.clone(),
            payload_json: serde_json::to_string(&version.payload)?,
            change_type: version.change_type,
            change_summary: version.change_summary.clone(),
            author: version.author.clone(),
            parent_version: version.parent_version.map(|p| p.to_string()),
            content_hash: version.content_hash.clone(),
            created_at: version.created_at,
        })
    }

    fn into_version(self) -> VcsResult<Version> {
        Ok(Version {
            version_id: self.version_id.parse()?,
            listing_id: self.listing_id,
            branch: self.branch,
            payload: serde_json::from_str(&self.payload_json)?,
            change_type: self.change_type,
            change_summary: self.change_summary,
            author: self.author,
            parent_version: self
                .parent_version
                .map(|p| p.parse::<VersionNumber>())
                .transpose()?,
            content_hash: self.content_hash,
            created_at: self.created_at,
        })
    }
}

/// RocksDB-backed store for listing versions.
pub struct RocksVersionStore {
    db: Arc<DB>,
    /// Serializes the uniqueness check, sequence allocation and batch write.
    write_lock: Mutex<()>,
}

impl RocksVersionStore {
    /// Create a new RocksDB version store.
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    fn cf(&self, name: &str) -> VcsResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| VcsError::Storage(format!("Missing {} column family", name)))
    }

    fn serialize_record(&self, record: &VersionRecord) -> VcsResult<Vec<u8>> {
        bincode::serialize(record)
            .map_err(|e| VcsError::Storage(format!("Failed to serialize version: {}", e)))
    }

    fn deserialize_record(&self, bytes: &[u8]) -> VcsResult<VersionRecord> {
        bincode::deserialize(bytes)
            .map_err(|e| VcsError::Storage(format!("Failed to deserialize version: {}", e)))
    }

    fn listing_prefix(listing_id: &str) -> Vec<u8> {
        let mut key = listing_id.as_bytes().to_vec();
        key.push(SEPARATOR);
        key
    }

    fn version_key(listing_id: &str, seq: u64) -> Vec<u8> {
        let mut key = Self::listing_prefix(listing_id);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn head_key(listing_id: &str, branch: &str) -> Vec<u8> {
        let mut key = Self::listing_prefix(listing_id);
        key.extend_from_slice(branch.as_bytes());
        key
    }

    fn index_key(listing_id: &str, branch: &str, version_id: &VersionNumber) -> Vec<u8> {
        let mut key = Self::head_key(listing_id, branch);
        key.push(SEPARATOR);
        key.extend_from_slice(version_id.to_string().as_bytes());
        key
    }

    fn decode_seq(bytes: &[u8]) -> VcsResult<u64> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| VcsError::Storage(format!("Invalid sequence of {} bytes", bytes.len())))?;
        Ok(u64::from_be_bytes(raw))
    }

    fn read_seq(&self, cf_name: &str, key: &[u8]) -> VcsResult<Option<u64>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, key) {
            Ok(Some(bytes)) => Ok(Some(Self::decode_seq(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(VcsError::Storage(format!("Failed to read {}: {}", cf_name, e))),
        }
    }

    fn read_version(&self, listing_id: &str, seq: u64) -> VcsResult<Option<Version>> {
        let cf = self.cf(CF_VERSIONS)?;
        match self.db.get_cf(&cf, Self::version_key(listing_id, seq)) {
            Ok(Some(bytes)) => Ok(Some(self.deserialize_record(&bytes)?.into_version()?)),
            Ok(None) => Ok(None),
            Err(e) => Err(VcsError::Storage(format!("Failed to get version: {}", e))),
        }
    }

    /// Visit every record of a listing in insertion order.
    fn scan_listing(
        &self,
        listing_id: &str,
        mut visit: impl FnMut(VersionRecord),
    ) -> VcsResult<()> {
        let cf = self.cf(CF_VERSIONS)?;
        let prefix = Self::listing_prefix(listing_id);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, value) =
                item.map_err(|e| VcsError::Storage(format!("Failed to iterate versions: {}", e)))?;
            if !key.starts_with(&prefix) {
                break;
            }
            visit(self.deserialize_record(&value)?);
        }
        Ok(())
    }
}

#[async_trait]
impl VersionStore for RocksVersionStore {
    async fn append(&self, version: Version) -> VcsResult<()> {
        let _guard = self.write_lock.lock().await;

        let index_key = Self::index_key(&version.listing_id, &version.branch, &version.version_id);
        if self.read_seq(CF_VERSION_INDEX, &index_key)?.is_some() {
            return Err(VcsError::DuplicateVersion {
                listing_id: version.listing_id,
                branch: version.branch,
                version_id: version.version_id.to_string(),
            });
        }

        let seq = self.read_seq(CF_META, NEXT_SEQ_KEY)?.unwrap_or(0);
        let record = VersionRecord::from_version(&version)?;
        let value = self.serialize_record(&record)?;

        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_index = self.cf(CF_VERSION_INDEX)?;
        let cf_heads = self.cf(CF_BRANCH_HEADS)?;
        let cf_meta = self.cf(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_versions, Self::version_key(&version.listing_id, seq), value);
        batch.put_cf(&cf_index, index_key, seq.to_be_bytes());
        batch.put_cf(
            &cf_heads,
            Self::head_key(&version.listing_id, &version.branch),
            seq.to_be_bytes(),
        );
        batch.put_cf(&cf_meta, NEXT_SEQ_KEY, (seq + 1).to_be_bytes());

        self.db
            .write(batch)
            .map_err(|e| VcsError::Storage(format!("Failed to append version: {}", e)))?;

        debug!(
            listing_id = %version.listing_id,
            branch = %version.branch,
            version = %version.version_id,
            seq,
            "appended version"
        );
        Ok(())
    }

    async fn latest(&self, listing_id: &str, branch: &str) -> VcsResult<Option<Version>> {
        match self.read_seq(CF_BRANCH_HEADS, &Self::head_key(listing_id, branch))? {
            Some(seq) => self.read_version(listing_id, seq),
            None => Ok(None),
        }
    }

    async fn get(
        &self,
        listing_id: &str,
        branch: &str,
        version_id: &VersionNumber,
    ) -> VcsResult<Option<Version>> {
        let index_key = Self::index_key(listing_id, branch, version_id);
        match self.read_seq(CF_VERSION_INDEX, &index_key)? {
            Some(seq) => self.read_version(listing_id, seq),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        listing_id: &str,
        branch: Option<&str>,
        limit: usize,
    ) -> VcsResult<Vec<Version>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut window: VecDeque<VersionRecord> = VecDeque::new();
        self.scan_listing(listing_id, |record| {
            if branch.map_or(true, |b| record.branch == b) {
                if window.len() == limit {
                    window.pop_front();
                }
                window.push_back(record);
            }
        })?;

        window.into_iter().map(VersionRecord::into_version).collect()
    }

    async fn branches(&self, listing_id: &str) -> VcsResult<BTreeSet<String>> {
        let cf = self.cf(CF_BRANCH_HEADS)?;
        let prefix = Self::listing_prefix(listing_id);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut branches = BTreeSet::new();
        for item in iter {
            let (key, _) =
                item.map_err(|e| VcsError::Storage(format!("Failed to iterate branches: {}", e)))?;
            if !key.starts_with(&prefix) {
                break;
            }
            branches.insert(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }
        Ok(branches)
    }

    async fn version_count(&self, listing_id: &str, branch: Option<&str>) -> VcsResult<usize> {
        let mut count = 0;
        self.scan_listing(listing_id, |record| {
            if branch.map_or(true, |b| record.branch == b) {
                count += 1;
            }
        })?;
        Ok(count)
    }
}
