//! Bucket reconciliation pipeline: storage → source → artifact.
//!
//! Each attempt runs three ordered stages against one [`Bucket`]:
//!   - [`BucketReconciler::reconcile_storage`] validates the recorded artifact,
//!     garbage collects its directory and rebinds its URL
//!   - [`BucketReconciler::reconcile_source`] downloads the non-ignored objects
//!     into a scratch directory and computes the revision
//!   - [`BucketReconciler::reconcile_artifact`] packages the scratch directory
//!     into the store unless the revision is unchanged
//!
//! Any stage can stop the attempt early. Permanent failures (missing secret,
//! malformed credentials, absent bucket) are only recorded as conditions;
//! transient ones are recorded and returned so the caller backs off.
//!
//! # Error Handling
//! The returned `Err` is always mirrored by a `False` condition carrying a
//! message that names the offending secret, bucket or object.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{future, TryStreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{Artifact, Bucket, BUCKET_KIND};
use crate::bucket::ignore::{IgnoreMatcher, IGNORE_FILE};
use crate::bucket::{validate_credentials, DefaultProviderFactory};
use crate::checksum::checksum_dir;
use crate::condition::{
    summarize_ready, ARTIFACT_AVAILABLE, AUTHENTICATION_FAILED_REASON, BUCKET_OPERATION_FAILED_REASON,
    BUCKET_OPERATION_SUCCEEDED_REASON, NO_ARTIFACT_FOUND_REASON, SOURCE_AVAILABLE,
    STORAGE_OPERATION_FAILED_REASON, SUCCEEDED_REASON,
};
use crate::contract::{BucketProvider, ProviderFactory, SecretReader};
use crate::error::Error;
use crate::storage::{secure_join, Storage};

/// Upper bound on object downloads in flight for one bucket.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 20;

/// What a single stage wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    /// Run the next stage.
    Continue,
    /// End the attempt; the next one happens after the poll interval.
    Stop,
    /// End the attempt and ask for an immediate, non-backoff retry.
    Requeue,
}

/// Scheduling request handed back to the control loop alongside the
/// `Result`. An `Err` means exponential backoff regardless of this value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

pub struct BucketReconciler {
    storage: Arc<Storage>,
    secrets: Arc<dyn SecretReader>,
    providers: Arc<dyn ProviderFactory>,
}

impl BucketReconciler {
    pub fn new(
        storage: Arc<Storage>,
        secrets: Arc<dyn SecretReader>,
        providers: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            storage,
            secrets,
            providers,
        }
    }

    /// Reconciler using the built-in provider dispatch.
    pub fn with_default_providers(storage: Arc<Storage>, secrets: Arc<dyn SecretReader>) -> Self {
        Self::new(storage, secrets, Arc::new(DefaultProviderFactory))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run one full attempt. The scratch directory lives only for the
    /// duration of this call and is removed on every exit path.
    #[tracing::instrument(skip_all, fields(bucket = %obj.key()))]
    pub async fn reconcile(&self, obj: &mut Bucket, cancel: &CancellationToken) -> Result<ReconcileResult, Error> {
        let generation = obj.metadata.generation;
        info!(generation, "Starting reconciliation");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = self.reconcile_stages(obj) => outcome,
        };

        summarize_ready(&mut obj.status.conditions, generation);

        match outcome {
            Ok(StageResult::Requeue) => {
                info!("Reconciliation requested an immediate requeue");
                Ok(ReconcileResult {
                    requeue: true,
                    requeue_after: None,
                })
            }
            Ok(_) => {
                obj.status.observed_generation = generation;
                info!(interval = ?obj.spec.interval, "Reconciliation finished");
                Ok(ReconcileResult {
                    requeue: false,
                    requeue_after: Some(obj.spec.interval),
                })
            }
            Err(e) => {
                error!(error = %e, "Reconciliation failed");
                Err(e)
            }
        }
    }

    async fn reconcile_stages(&self, obj: &mut Bucket) -> Result<StageResult, Error> {
        match self.reconcile_storage(obj).await? {
            StageResult::Continue => {}
            other => return Ok(other),
        }

        let scratch = tempfile::Builder::new()
            .prefix(&format!("bucket-{}-{}-", obj.metadata.namespace, obj.metadata.name))
            .tempdir()
            .map_err(|e| Error::storage(std::env::temp_dir(), e))?;
        let mut artifact = Artifact::default();

        let timeout = obj.spec.timeout();
        let fetched = tokio::time::timeout(timeout, self.reconcile_source(obj, &mut artifact, scratch.path())).await;
        match fetched {
            Err(_) => {
                let message = format!(
                    "Timed out after {timeout:?} fetching bucket {:?}",
                    obj.spec.bucket_name
                );
                obj.status.conditions.mark_false(
                    SOURCE_AVAILABLE,
                    BUCKET_OPERATION_FAILED_REASON,
                    message.clone(),
                    obj.metadata.generation,
                );
                return Err(Error::Transient(message));
            }
            Ok(result) => match result? {
                StageResult::Continue => {}
                other => return Ok(other),
            },
        }

        self.reconcile_artifact(obj, &artifact, scratch.path()).await
    }

    /// Validate the recorded artifact against storage.
    pub async fn reconcile_storage(&self, obj: &mut Bucket) -> Result<StageResult, Error> {
        let generation = obj.metadata.generation;
        let current = match obj.status.artifact.clone() {
            None => return Ok(StageResult::Continue),
            Some(artifact) => artifact,
        };

        if !self.storage.artifact_exist(&current) {
            warn!(path = %current.path, "Recorded artifact is missing from storage");
            obj.status.artifact = None;
            obj.status.conditions.mark_false(
                ARTIFACT_AVAILABLE,
                NO_ARTIFACT_FOUND_REASON,
                "No artifact for resource in storage",
                generation,
            );
            return Ok(StageResult::Requeue);
        }

        let storage = Arc::clone(&self.storage);
        let collected = run_blocking(move || storage.remove_all_but_current(&current))
            .await
            .and_then(|result| result);
        if let Err(e) = collected {
            obj.status.conditions.mark_false(
                ARTIFACT_AVAILABLE,
                STORAGE_OPERATION_FAILED_REASON,
                format!("Failed to garbage collect artifacts: {e}"),
                generation,
            );
            return Err(e);
        }
        if let Some(artifact) = obj.status.artifact.as_mut() {
            self.storage.set_artifact_url(artifact);
            debug!(url = %artifact.url, "Artifact present in storage");
        }
        Ok(StageResult::Continue)
    }

    /// Download the bucket into `dir` and fill in `artifact`'s path and
    /// revision.
    pub async fn reconcile_source(
        &self,
        obj: &mut Bucket,
        artifact: &mut Artifact,
        dir: &Path,
    ) -> Result<StageResult, Error> {
        let generation = obj.metadata.generation;
        let bucket_name = obj.spec.bucket_name.clone();

        let mut credentials = None;
        if let Some(secret_ref) = &obj.spec.secret_ref {
            let namespace = &obj.metadata.namespace;
            let secret = match self.secrets.get_secret(namespace, &secret_ref.name).await {
                Ok(secret) => secret,
                Err(e) => {
                    let err = Error::AuthenticationFailed {
                        reference: format!("{namespace}/{}", secret_ref.name),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Could not read bucket credentials");
                    obj.status.conditions.mark_false(
                        SOURCE_AVAILABLE,
                        AUTHENTICATION_FAILED_REASON,
                        format!("Failed to get secret '{namespace}/{}': {e}", secret_ref.name),
                        generation,
                    );
                    return Ok(StageResult::Stop);
                }
            };
            match validate_credentials(&secret) {
                Ok(c) => credentials = Some(c),
                Err(e) => {
                    warn!(error = %e, "Invalid bucket credentials");
                    obj.status.conditions.mark_false(
                        SOURCE_AVAILABLE,
                        BUCKET_OPERATION_FAILED_REASON,
                        format!("Failed to construct S3 client: {e}"),
                        generation,
                    );
                    return Ok(StageResult::Stop);
                }
            }
        }

        let provider = match self.providers.new_provider(obj, credentials) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "Could not construct bucket client");
                obj.status.conditions.mark_false(
                    SOURCE_AVAILABLE,
                    BUCKET_OPERATION_FAILED_REASON,
                    format!("Failed to construct S3 client: {e}"),
                    generation,
                );
                return if e.is_transient() { Err(e) } else { Ok(StageResult::Stop) };
            }
        };

        match provider.bucket_exists(&bucket_name).await {
            Ok(true) => {}
            Ok(false) => {
                info!(bucket_name = %bucket_name, "Bucket does not exist");
                obj.status.conditions.mark_false(
                    SOURCE_AVAILABLE,
                    BUCKET_OPERATION_FAILED_REASON,
                    format!("Bucket {bucket_name:?} does not exist"),
                    generation,
                );
                return Ok(StageResult::Stop);
            }
            Err(e) => {
                error!(bucket_name = %bucket_name, error = %e, "Failed to verify bucket existence");
                obj.status.conditions.mark_false(
                    SOURCE_AVAILABLE,
                    BUCKET_OPERATION_FAILED_REASON,
                    format!("Failed to verify existence of bucket {bucket_name:?}"),
                    generation,
                );
                return Err(e);
            }
        }

        let ignore_file = match read_object(provider.as_ref(), &bucket_name, IGNORE_FILE).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                obj.status.conditions.mark_false(
                    SOURCE_AVAILABLE,
                    BUCKET_OPERATION_FAILED_REASON,
                    format!("Failed to get '{IGNORE_FILE}' file from bucket {bucket_name:?}: {e}"),
                    generation,
                );
                return Err(e);
            }
        };
        let matcher = IgnoreMatcher::new(ignore_file.as_deref().into_iter().chain(obj.spec.ignore.as_deref()));

        // Local paths already claimed by a listed key. Keys that normalise to
        // the same file are fetched once.
        let mut targets = HashSet::new();
        let fetched: Result<(), Error> = async {
            let objects = provider.list_objects(&bucket_name).await?;
            objects
                .try_filter(|object| {
                    let wanted = !matcher.is_ignored(&object.key) && claim_target(&mut targets, dir, &object.key);
                    future::ready(wanted)
                })
                .try_for_each_concurrent(MAX_CONCURRENT_DOWNLOADS, |object| {
                    let provider = provider.as_ref();
                    let bucket_name = bucket_name.as_str();
                    async move { download_object(provider, bucket_name, &object.key, dir).await }
                })
                .await
        }
        .await;
        if let Err(e) = fetched {
            obj.status.conditions.mark_false(
                SOURCE_AVAILABLE,
                BUCKET_OPERATION_FAILED_REASON,
                format!("Failed to download objects from bucket {bucket_name:?}: {e}"),
                generation,
            );
            if e.is_not_found() {
                warn!(bucket_name = %bucket_name, error = %e, "Bucket content disappeared while fetching");
                return Ok(StageResult::Stop);
            }
            error!(bucket_name = %bucket_name, error = %e, "Failed to download bucket objects");
            return Err(e);
        }

        let root = dir.to_path_buf();
        let revision = match run_blocking(move || checksum_dir(&root)).await.and_then(|result| result) {
            Ok(revision) => revision,
            Err(e) => {
                obj.status.conditions.mark_false(
                    SOURCE_AVAILABLE,
                    STORAGE_OPERATION_FAILED_REASON,
                    format!("Failed to calculate revision: {e}"),
                    generation,
                );
                return Err(e);
            }
        };
        *artifact = self.storage.new_artifact_for(BUCKET_KIND, &obj.metadata, &revision);

        let count = targets.len();
        info!(bucket_name = %bucket_name, count, revision = %revision, "Fetched bucket objects");
        obj.status.conditions.mark_true(
            SOURCE_AVAILABLE,
            BUCKET_OPERATION_SUCCEEDED_REASON,
            format!("Downloaded {count} objects from bucket"),
            generation,
        );
        Ok(StageResult::Continue)
    }

    /// Package `dir` into the store as `artifact`, unless the recorded
    /// artifact already has the same revision.
    pub async fn reconcile_artifact(
        &self,
        obj: &mut Bucket,
        artifact: &Artifact,
        dir: &Path,
    ) -> Result<StageResult, Error> {
        let generation = obj.metadata.generation;

        let stat_failure = match std::fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => None,
            Ok(_) => Some((
                "Source path is not a directory",
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            )),
            Err(e) => Some(("Failed to stat source path", e)),
        };
        if let Some((message, source)) = stat_failure {
            error!(path = %dir.display(), error = %source, "{message}");
            obj.status.conditions.mark_false(
                ARTIFACT_AVAILABLE,
                STORAGE_OPERATION_FAILED_REASON,
                message,
                generation,
            );
            return Err(Error::storage(dir, source));
        }

        let message = format!("Compressed source to artifact with revision '{}'", artifact.revision);

        let up_to_date = obj
            .status
            .artifact
            .as_ref()
            .is_some_and(|current| current.has_revision(&artifact.revision));
        if up_to_date {
            debug!(revision = %artifact.revision, "Artifact up-to-date, skipping archive");
            obj.status
                .conditions
                .mark_true(ARTIFACT_AVAILABLE, SUCCEEDED_REASON, message, generation);
            return Ok(StageResult::Continue);
        }

        // Fires when this future is dropped; the archive stops at the next entry.
        let cancel = CancellationToken::new();
        let _stop_archive = cancel.clone().drop_guard();

        let storage = Arc::clone(&self.storage);
        let source = dir.to_path_buf();
        let mut pending = artifact.clone();
        let stored = run_blocking(move || -> Result<(Artifact, String), (&'static str, Error)> {
            storage
                .mkdir_all(&pending)
                .map_err(|e| ("Failed to create artifact directory", e))?;
            storage
                .archive(&mut pending, &source, &cancel)
                .map_err(|e| ("Failed to archive source", e))?;
            let checksum = storage
                .checksum(&pending)
                .map_err(|e| ("Failed to calculate artifact checksum", e))?;
            Ok((pending, checksum))
        })
        .await
        .map_err(|e| ("Failed to archive source", e))
        .and_then(|result| result);
        let (mut artifact, checksum) = match stored {
            Ok(stored) => stored,
            Err((context, e)) => {
                error!(path = %artifact.path, error = %e, "{context}");
                obj.status.conditions.mark_false(
                    ARTIFACT_AVAILABLE,
                    STORAGE_OPERATION_FAILED_REASON,
                    format!("{context}: {e}"),
                    generation,
                );
                return Err(e);
            }
        };

        artifact.checksum = checksum;
        self.storage.set_artifact_url(&mut artifact);
        info!(
            revision = %artifact.revision,
            checksum = %artifact.checksum,
            url = %artifact.url,
            "Stored artifact"
        );
        obj.status.artifact = Some(artifact);
        obj.status
            .conditions
            .mark_true(ARTIFACT_AVAILABLE, SUCCEEDED_REASON, message, generation);
        Ok(StageResult::Continue)
    }
}

async fn read_object(provider: &dyn BucketProvider, bucket: &str, key: &str) -> Result<Vec<u8>, Error> {
    let mut stream = provider.get_object(bucket, key).await?;
    let mut buf = Vec::new();
    while let Some(chunk) = stream.try_next().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Run blocking filesystem work on the blocking pool so it never stalls
/// the runtime workers driving other buckets.
async fn run_blocking<T, F>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Transient(format!("filesystem task failed: {e}")))
}

/// Record the local path for `key`. False when the key names no file or
/// its path was already claimed by an earlier key.
fn claim_target(targets: &mut HashSet<PathBuf>, dir: &Path, key: &str) -> bool {
    let path = secure_join(dir, key);
    if path == dir {
        warn!(key, "Skipping object whose key resolves to the bucket root");
        return false;
    }
    if !targets.insert(path) {
        warn!(key, "Skipping object whose key resolves to an already fetched path");
        return false;
    }
    true
}

/// Stream one object to its key's location under `dir`.
async fn download_object(provider: &dyn BucketProvider, bucket: &str, key: &str, dir: &Path) -> Result<(), Error> {
    let path = secure_join(dir, key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::storage(parent, e))?;
    }

    let mut stream = provider.get_object(bucket, key).await?;
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| Error::storage(&path, e))?;
    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await.map_err(|e| Error::storage(&path, e))?;
    }
    file.flush().await.map_err(|e| Error::storage(&path, e))?;

    debug!(key, path = %path.display(), "Downloaded object");
    Ok(())
}
