mod common;

use std::fs;
use std::sync::Arc;

use bucket_source_core::api::{Artifact, Bucket, BucketSpec, BUCKET_KIND};
use bucket_source_core::condition::{
    ConditionStatus, ARTIFACT_AVAILABLE, STORAGE_OPERATION_FAILED_REASON, SUCCEEDED_REASON,
};
use bucket_source_core::contract::MockSecretReader;
use bucket_source_core::reconcile::StageResult;
use bucket_source_core::storage::Storage;
use bucket_source_core::Error;
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
async fn test_up_to_date_revision_is_not_rewritten() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "localhost").unwrap());
    let reconciler = reconciler_with(Arc::clone(&storage), MockSecretReader::new());

    let mut obj = bucket();
    let artifact = storage.new_artifact_for(BUCKET_KIND, &obj.metadata, "existing");
    storage.mkdir_all(&artifact).unwrap();
    storage
        .atomic_write_file(&artifact, "stored tarball".as_bytes(), 0o644)
        .unwrap();
    let stored_path = storage.local_path(&artifact);
    let modified = fs::metadata(&stored_path).unwrap().modified().unwrap();

    obj.status.artifact = Some(artifact.clone());
    let scratch = tempdir().unwrap();
    fs::write(scratch.path().join("file.txt"), "fresh content").unwrap();

    for _ in 0..2 {
        let result = reconciler
            .reconcile_artifact(&mut obj, &artifact, scratch.path())
            .await
            .unwrap();
        assert_eq!(result, StageResult::Continue);

        let condition = obj.status.conditions.get(ARTIFACT_AVAILABLE).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, SUCCEEDED_REASON);
        assert_eq!(
            condition.message,
            "Compressed source to artifact with revision 'existing'"
        );
    }
    assert_eq!(obj.status.artifact, Some(artifact));
    assert_eq!(fs::read_to_string(&stored_path).unwrap(), "stored tarball");
    assert_eq!(fs::metadata(&stored_path).unwrap().modified().unwrap(), modified);
    assert_eq!(fs::read_dir(stored_path.parent().unwrap()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_deleted_source_dir_fails_stat() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "localhost").unwrap());
    let reconciler = reconciler_with(storage, MockSecretReader::new());

    let scratch = tempdir().unwrap();
    let gone = scratch.path().to_path_buf();
    scratch.close().unwrap();

    let mut obj = bucket();
    let err = reconciler
        .reconcile_artifact(&mut obj, &Artifact::default(), &gone)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StorageFault { .. }), "got {err:?}");
    let condition = obj.status.conditions.get(ARTIFACT_AVAILABLE).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, STORAGE_OPERATION_FAILED_REASON);
    assert_eq!(condition.message, "Failed to stat source path");
}

#[tokio::test]
async fn test_file_as_source_dir_is_rejected() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "localhost").unwrap());
    let reconciler = reconciler_with(storage, MockSecretReader::new());

    let scratch = tempdir().unwrap();
    let file = scratch.path().join("not-a-dir");
    fs::write(&file, "x").unwrap();

    let mut obj = bucket();
    let err = reconciler
        .reconcile_artifact(&mut obj, &Artifact::default(), &file)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StorageFault { .. }), "got {err:?}");
    assert_eq!(
        obj.status.conditions.get(ARTIFACT_AVAILABLE).unwrap().message,
        "Source path is not a directory"
    );
}

#[tokio::test]
async fn test_new_revision_is_archived() {
    let base = tempdir().unwrap();
    let storage = Arc::new(Storage::new(base.path(), "localhost").unwrap());
    let reconciler = reconciler_with(Arc::clone(&storage), MockSecretReader::new());

    let scratch = tempdir().unwrap();
    fs::create_dir_all(scratch.path().join("dir")).unwrap();
    fs::write(scratch.path().join("dir/file.yaml"), "kind: ConfigMap").unwrap();

    let mut obj = bucket();
    obj.status.artifact = Some(storage.new_artifact_for(BUCKET_KIND, &obj.metadata, "old"));
    let artifact = storage.new_artifact_for(BUCKET_KIND, &obj.metadata, "new");

    let result = reconciler
        .reconcile_artifact(&mut obj, &artifact, scratch.path())
        .await
        .unwrap();

    assert_eq!(result, StageResult::Continue);
    let stored = obj.status.artifact.clone().unwrap();
    assert_eq!(stored.revision, "new");
    assert_eq!(stored.path, "bucket/test-bucket/new.tar.gz");
    assert_eq!(stored.url, "http://localhost/bucket/test-bucket/new.tar.gz");
    assert_eq!(stored.checksum.len(), 64);
    assert!(stored.last_update_time.is_some());
    assert!(storage.artifact_exist(&stored));
    assert_eq!(storage.checksum(&stored).unwrap(), stored.checksum);
    assert_eq!(
        obj.status.conditions.get(ARTIFACT_AVAILABLE).unwrap().message,
        "Compressed source to artifact with revision 'new'"
    );
}
