//! Bucket resource and artifact types.
//!
//! The reconciler reads [`BucketSpec`] and mutates [`BucketStatus`]; the
//! resource itself is owned by whatever control loop hosts the reconciler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::Conditions;

/// Top-level directory of bucket artifacts in the store.
pub const BUCKET_KIND: &str = "bucket";

/// Provider name for any S3-compatible endpoint.
pub const GENERIC_PROVIDER: &str = "generic";

/// Default per-operation timeout when the resource does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
}

/// Reference to a secret in the resource's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSpec {
    /// Selects the bucket client implementation, e.g. `generic`.
    pub provider: String,
    pub bucket_name: String,
    /// `host[:port]` of the object store.
    pub endpoint: String,
    /// Talk plain HTTP instead of HTTPS.
    #[serde(default)]
    pub insecure: bool,
    /// Signing region. Discovered from the bucket location when absent.
    #[serde(default)]
    pub region: Option<String>,
    pub interval: Duration,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub secret_ref: Option<LocalObjectReference>,
    /// Extra ignore patterns, in `.sourceignore` format.
    #[serde(default)]
    pub ignore: Option<String>,
}

impl Default for BucketSpec {
    fn default() -> Self {
        Self {
            provider: GENERIC_PROVIDER.to_string(),
            bucket_name: String::new(),
            endpoint: String::new(),
            insecure: false,
            region: None,
            interval: Duration::from_secs(60),
            timeout: None,
            secret_ref: None,
            ignore: None,
        }
    }
}

impl BucketSpec {
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStatus {
    #[serde(default)]
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub observed_generation: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub metadata: ObjectMeta,
    pub spec: BucketSpec,
    #[serde(default)]
    pub status: BucketStatus,
}

impl Bucket {
    pub fn new(name: impl Into<String>, spec: BucketSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: String::new(),
                generation: 1,
            },
            spec,
            status: BucketStatus::default(),
        }
    }

    /// `namespace/name`, used in log fields and secret references.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}

/// The persisted output of one successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Location relative to the storage base directory.
    pub path: String,
    /// Digest of the fetched object tree, before compression.
    pub revision: String,
    /// Digest of the stored tarball bytes.
    #[serde(default)]
    pub checksum: String,
    /// Retrieval URL, derived from the storage hostname and `path`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn has_revision(&self, revision: &str) -> bool {
        !self.revision.is_empty() && self.revision == revision
    }
}
