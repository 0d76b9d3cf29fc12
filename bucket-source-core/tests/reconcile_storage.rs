mod common;

use std::fs;
use std::sync::Arc;

use bucket_source_core::api::{Bucket, BucketSpec, BUCKET_KIND};
use bucket_source_core::condition::{ConditionStatus, ARTIFACT_AVAILABLE, NO_ARTIFACT_FOUND_REASON};
use bucket_source_core::contract::MockSecretReader;
use bucket_source_core::reconcile::StageResult;
use bucket_source_core::storage::Storage;
use common::reconciler_with;
use tempfile::tempdir;

fn bucket() -> Bucket {
    Bucket::new(
        "test-bucket",
        BucketSpec {
            bucket_name: "dummy".to_string(),
            endpoint: "localhost:9000".to_string(),
            ..BucketSpec::default()
        },
    )
}

#[tokio::test]
async fn test_garbage_collects_all_but_current_artifact() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "hostname.example.com").unwrap());

    let dir = base.path().join("bucket/test-bucket");
    fs::create_dir_all(dir.join("nested")).unwrap();
    for name in ["a.tar.gz", "b.tar.gz", "c.tar.gz", "d.tar.gz"] {
        fs::write(dir.join(name), name).unwrap();
    }

    let mut obj = bucket();
    obj.status.artifact = Some(storage.new_artifact_for(BUCKET_KIND, &obj.metadata, "d"));
    let reconciler = reconciler_with(Arc::clone(&storage), MockSecretReader::new());

    let result = reconciler.reconcile_storage(&mut obj).await.unwrap();

    assert_eq!(result, StageResult::Continue);
    for removed in ["a.tar.gz", "b.tar.gz", "c.tar.gz"] {
        assert!(!dir.join(removed).exists(), "{removed} should be collected");
    }
    assert!(dir.join("d.tar.gz").is_file());
    assert!(dir.join("nested").is_dir());

    let artifact = obj.status.artifact.as_ref().unwrap();
    assert_eq!(artifact.url, "http://hostname.example.com/bucket/test-bucket/d.tar.gz");
    assert!(obj.status.conditions.is_empty());
}

#[tokio::test]
async fn test_garbage_collection_spares_resources_on_the_same_bucket() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "hostname.example.com").unwrap());
    let reconciler = reconciler_with(Arc::clone(&storage), MockSecretReader::new());

    let mut team_a = bucket();
    team_a.metadata.namespace = "team-a".to_string();
    let mut team_b = bucket();
    team_b.metadata.namespace = "team-b".to_string();

    for (obj, revision) in [(&mut team_a, "rev-a"), (&mut team_b, "rev-b")] {
        let artifact = storage.new_artifact_for(BUCKET_KIND, &obj.metadata, revision);
        storage.mkdir_all(&artifact).unwrap();
        storage.atomic_write_file(&artifact, revision.as_bytes(), 0o644).unwrap();
        obj.status.artifact = Some(artifact);
    }

    assert_eq!(reconciler.reconcile_storage(&mut team_a).await.unwrap(), StageResult::Continue);
    assert_eq!(reconciler.reconcile_storage(&mut team_b).await.unwrap(), StageResult::Continue);
    assert_eq!(reconciler.reconcile_storage(&mut team_a).await.unwrap(), StageResult::Continue);

    let a = team_a.status.artifact.as_ref().unwrap();
    let b = team_b.status.artifact.as_ref().unwrap();
    assert_eq!(a.path, "bucket/team-a/test-bucket/rev-a.tar.gz");
    assert_eq!(b.path, "bucket/team-b/test-bucket/rev-b.tar.gz");
    assert!(storage.artifact_exist(a));
    assert!(storage.artifact_exist(b));
}

#[tokio::test]
async fn test_missing_artifact_requeues() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "hostname.example.com").unwrap());

    let mut obj = bucket();
    obj.status.artifact = Some(storage.new_artifact_for(BUCKET_KIND, &obj.metadata, "invalid"));
    let reconciler = reconciler_with(storage, MockSecretReader::new());

    let result = reconciler.reconcile_storage(&mut obj).await.unwrap();

    assert_eq!(result, StageResult::Requeue);
    assert!(obj.status.artifact.is_none());
    let condition = obj.status.conditions.get(ARTIFACT_AVAILABLE).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, NO_ARTIFACT_FOUND_REASON);
    assert_eq!(condition.message, "No artifact for resource in storage");
}

#[tokio::test]
async fn test_rebinds_url_to_current_hostname() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "new-hostname.example.com").unwrap());

    let mut obj = bucket();
    let mut artifact = storage.new_artifact_for(BUCKET_KIND, &obj.metadata, "rev");
    artifact.checksum = "abc".to_string();
    artifact.url = "http://old-hostname.example.com/bucket/test-bucket/rev.tar.gz".to_string();
    storage.mkdir_all(&artifact).unwrap();
    storage
        .atomic_write_file(&artifact, "content".as_bytes(), 0o644)
        .unwrap();

    obj.status.artifact = Some(artifact);
    let reconciler = reconciler_with(storage, MockSecretReader::new());

    let result = reconciler.reconcile_storage(&mut obj).await.unwrap();

    assert_eq!(result, StageResult::Continue);
    let rebound = obj.status.artifact.unwrap();
    assert_eq!(rebound.url, "http://new-hostname.example.com/bucket/test-bucket/rev.tar.gz");
    assert_eq!(rebound.path, "bucket/test-bucket/rev.tar.gz");
    assert_eq!(rebound.revision, "rev");
    assert_eq!(rebound.checksum, "abc");
}

#[tokio::test]
async fn test_no_artifact_continues() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "hostname.example.com").unwrap());
    let reconciler = reconciler_with(storage, MockSecretReader::new());

    let mut obj = bucket();
    let result = reconciler.reconcile_storage(&mut obj).await.unwrap();

    assert_eq!(result, StageResult::Continue);
    assert!(obj.status.conditions.is_empty());
}
