//! # contract: seams between the reconciler and its collaborators
//!
//! The reconciler never talks to a concrete object store or secret backend.
//! It goes through the traits below, which lets production code plug in the
//! generic S3 client and an environment-backed secret reader, while tests
//! plug in `mockall` mocks.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; the generated `Mock*` types are
//!   exported under the `test-export-mocks` feature so dependent crates can
//!   use them in their own tests.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::api::Bucket;
use crate::error::Error;

/// Object content, streamed in chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Lazy, single-pass listing of a bucket.
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<ObjectMetadata, Error>> + Send>>;

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

/// Secret data as stored by the secret backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// Static key/secret pair extracted from a [`Secret`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Operations the reconciler needs from a remote bucket.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BucketProvider: Send + Sync {
    /// `Ok(false)` means the bucket definitely does not exist. An `Err` means
    /// existence could not be determined and must not be read as absence.
    async fn bucket_exists(&self, bucket_name: &str) -> Result<bool, Error>;

    /// Start listing the bucket. Pages are fetched as the stream is polled.
    async fn list_objects(&self, bucket_name: &str) -> Result<ObjectStream, Error>;

    /// Fetch one object. A missing key yields [`Error::NotFound`].
    async fn get_object(&self, bucket_name: &str, key: &str) -> Result<ByteStream, Error>;
}

/// Builds a [`BucketProvider`] for a resource, keyed on `spec.provider`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ProviderFactory: Send + Sync {
    fn new_provider(
        &self,
        obj: &Bucket,
        credentials: Option<Credentials>,
    ) -> Result<Box<dyn BucketProvider>, Error>;
}

/// Read access to secrets referenced by resources.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Fetch `namespace/name`. A missing secret is an [`Error::NotFound`].
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;
}
