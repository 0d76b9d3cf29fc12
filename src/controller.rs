//! Scheduling around the reconciler: one-shot passes and the watch loop.
//!
//! Every bucket gets its own task. After an attempt the task waits for the
//! poll interval, requeues immediately when asked to, or backs off
//! exponentially after an error. Cancelling the token stops all tasks.

use std::sync::Arc;
use std::time::Duration;

use bucket_source_core::api::Bucket;
use bucket_source_core::reconcile::BucketReconciler;
use bucket_source_core::Error;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// First delay after a failed attempt; doubles per consecutive failure.
const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Immediate requeues honoured within one `reconcile_once` pass.
const MAX_REQUEUES: u32 = 3;

/// Outcome of a one-shot pass for a single bucket.
#[derive(Debug, Serialize)]
pub struct BucketReport {
    pub name: String,
    pub namespace: String,
    pub status: bucket_source_core::api::BucketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Delay before retrying after `failures` consecutive errors.
pub fn backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(2u64.pow(exponent))).min(MAX_BACKOFF)
}

/// Reconcile every bucket once, concurrently.
pub async fn reconcile_once(
    reconciler: Arc<BucketReconciler>,
    buckets: Vec<Bucket>,
    cancel: CancellationToken,
) -> Vec<BucketReport> {
    let tasks = buckets.into_iter().map(|mut obj| {
        let reconciler = Arc::clone(&reconciler);
        let cancel = cancel.clone();
        async move {
            let mut attempts = 0;
            let outcome = loop {
                attempts += 1;
                match reconciler.reconcile(&mut obj, &cancel).await {
                    Ok(result) if result.requeue && attempts <= MAX_REQUEUES => continue,
                    other => break other,
                }
            };
            BucketReport {
                name: obj.metadata.name,
                namespace: obj.metadata.namespace,
                status: obj.status,
                error: outcome.err().map(|e| e.to_string()),
            }
        }
    });
    join_all(tasks).await
}

/// Keep every bucket reconciled until `cancel` fires. Returns the final
/// state of each resource.
pub async fn watch(
    reconciler: Arc<BucketReconciler>,
    buckets: Vec<Bucket>,
    cancel: CancellationToken,
) -> Vec<Bucket> {
    info!(buckets = buckets.len(), "Starting watch loop");
    let handles: Vec<_> = buckets
        .into_iter()
        .map(|obj| tokio::spawn(run_bucket(Arc::clone(&reconciler), obj, cancel.clone())))
        .collect();

    let mut finished = Vec::with_capacity(handles.len());
    for joined in join_all(handles).await {
        match joined {
            Ok(obj) => finished.push(obj),
            Err(e) => error!(error = %e, "Bucket task panicked"),
        }
    }
    info!("Watch loop stopped");
    finished
}

async fn run_bucket(reconciler: Arc<BucketReconciler>, mut obj: Bucket, cancel: CancellationToken) -> Bucket {
    let mut failures = 0u32;
    loop {
        let delay = match reconciler.reconcile(&mut obj, &cancel).await {
            Ok(result) if result.requeue => {
                failures = 0;
                Duration::ZERO
            }
            Ok(result) => {
                failures = 0;
                result.requeue_after.unwrap_or(obj.spec.interval)
            }
            Err(Error::Cancelled) => break,
            Err(e) => {
                failures += 1;
                let delay = backoff(failures);
                warn!(
                    bucket = %obj.key(),
                    failures,
                    "Reconcile failed, retrying in {delay:?}: {e}"
                );
                delay
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!(bucket = %obj.key(), "Bucket task cancelled");
    obj
}
