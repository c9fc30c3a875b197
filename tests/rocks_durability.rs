//! Durability tests for the RocksDB version store.

#![cfg(feature = "rocksdb-storage")]

use listing_vcs::store::{open_db, RocksVersionStore};
use listing_vcs::{
    payload_from, ChangeType, NewVersion, VcsError, VersionManager, VersionNumber, VersionStore,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn manager_at(path: &Path) -> VersionManager {
    let db = open_db(path).unwrap();
    VersionManager::new(Arc::new(RocksVersionStore::new(db)))
}

async fn save(manager: &VersionManager, branch: &str, value: Value) {
    manager
        .save_version(NewVersion::new("L1", payload_from(&value).unwrap()).with_branch(branch))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let manager = manager_at(dir.path());
        save(&manager, "main", json!({"title": "A", "price": 10})).await;
        save(&manager, "main", json!({"title": "B", "price": 10})).await;
        manager.create_branch("L1", "promo", "main", "growth").await.unwrap();
        save(&manager, "promo", json!({"title": "B", "price": 8})).await;
    }

    let manager = manager_at(dir.path());
    let latest = manager.get_latest("L1", "main").await.unwrap().unwrap();
    assert_eq!(latest.version_id.to_string(), "2.0.0");
    assert_eq!(latest.parent_version, Some(VersionNumber::INITIAL));
    assert_eq!(latest.payload, payload_from(&json!({"title": "B", "price": 10})).unwrap());

    let promo = manager.get_latest("L1", "promo").await.unwrap().unwrap();
    assert_eq!(promo.version_id.to_string(), "1.0.1");
    assert_eq!(promo.change_type, ChangeType::Patch);

    assert_eq!(manager.get_branches("L1").await.unwrap(), vec!["main", "promo"]);

    let timeline = manager.get_timeline("L1", None, None).await.unwrap();
    let order: Vec<(String, String)> = timeline
        .versions
        .iter()
        .map(|v| (v.branch.clone(), v.version_id.to_string()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("main".to_string(), "1.0.0".to_string()),
            ("main".to_string(), "2.0.0".to_string()),
            ("promo".to_string(), "1.0.0".to_string()),
            ("promo".to_string(), "1.0.1".to_string()),
        ]
    );

    // Saving continues from the persisted head.
    save(&manager, "main", json!({"title": "B", "price": 9})).await;
    let latest = manager.get_latest("L1", "main").await.unwrap().unwrap();
    assert_eq!(latest.version_id.to_string(), "2.0.1");
}

#[tokio::test]
async fn test_duplicate_append_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = RocksVersionStore::new(open_db(dir.path()).unwrap());

    let version = VersionManager::in_memory()
        .save_version(NewVersion::new("L1", payload_from(&json!({"title": "A"})).unwrap()))
        .await
        .unwrap()
        .into_version();

    store.append(version.clone()).await.unwrap();
    let err = store.append(version).await.unwrap_err();
    assert!(matches!(err, VcsError::DuplicateVersion { .. }));
    assert_eq!(store.version_count("L1", None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_listings_do_not_share_history() {
    let dir = TempDir::new().unwrap();
    let manager = manager_at(dir.path());

    save(&manager, "main", json!({"title": "A"})).await;
    manager
        .save_version(NewVersion::new("L10", payload_from(&json!({"title": "Z"})).unwrap()))
        .await
        .unwrap();

    let l1 = manager.get_timeline("L1", None, None).await.unwrap();
    assert_eq!(l1.total_versions, 1);
    assert_eq!(l1.versions[0].listing_id, "L1");
    assert!(manager.get_latest("L", "main").await.unwrap().is_none());
}
