//! Static configuration: where artifacts live and which buckets to reconcile.

use std::path::PathBuf;
use std::time::Duration;

use bucket_source_core::api::{Bucket, BucketSpec, LocalObjectReference, ObjectMeta, GENERIC_PROVIDER};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_HOSTNAME: &str = "localhost:9090";
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            storage_path = %self.storage.path.display(),
            hostname = %self.storage.hostname,
            buckets_count = self.buckets.len(),
            "Loaded Config"
        );
        for bucket in &self.buckets {
            bucket.trace_loaded();
        }
        debug!(?self, "Config loaded (full debug)");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    /// Advertised `host[:port]` baked into artifact URLs.
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub bucket_name: String,
    pub endpoint: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Name of the secret holding `accesskey`/`secretkey`.
    #[serde(default)]
    pub secret_ref: Option<String>,
    #[serde(default)]
    pub ignore: Option<String>,
}

impl BucketConfig {
    pub fn trace_loaded(&self) {
        info!(
            bucket = %format!("{}/{}", self.namespace, self.name),
            bucket_name = %self.bucket_name,
            endpoint = %self.endpoint,
            provider = %self.provider,
            interval_seconds = self.interval_seconds,
            "Loaded bucket"
        );
    }

    /// Fresh resource with an empty status.
    pub fn to_bucket(&self) -> Bucket {
        Bucket {
            metadata: ObjectMeta {
                name: self.name.clone(),
                namespace: self.namespace.clone(),
                generation: 1,
            },
            spec: BucketSpec {
                provider: self.provider.clone(),
                bucket_name: self.bucket_name.clone(),
                endpoint: self.endpoint.clone(),
                insecure: self.insecure,
                region: self.region.clone(),
                interval: Duration::from_secs(self.interval_seconds),
                timeout: self.timeout_seconds.map(Duration::from_secs),
                secret_ref: self
                    .secret_ref
                    .clone()
                    .map(|name| LocalObjectReference { name }),
                ignore: self.ignore.clone(),
            },
            status: Default::default(),
        }
    }
}

fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_provider() -> String {
    GENERIC_PROVIDER.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECONDS
}
