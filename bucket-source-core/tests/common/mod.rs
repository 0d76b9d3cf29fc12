#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bucket_source_core::api::{Bucket, BucketSpec};
use bucket_source_core::bucket::DefaultProviderFactory;
use bucket_source_core::contract::MockSecretReader;
use bucket_source_core::reconcile::BucketReconciler;
use bucket_source_core::storage::Storage;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serve `objects` from `bucket` the way an S3 endpoint would: HEAD for
/// existence, a single-page v2 listing and one GET per key.
pub async fn mount_bucket(server: &MockServer, bucket: &str, objects: &[(&str, &str)]) {
    Mock::given(method("HEAD"))
        .and(path(format!("/{bucket}")))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/{bucket}")))
        .and(query_param("list-type", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(listing(bucket, objects, None), "application/xml"))
        .mount(server)
        .await;

    for (key, content) in objects {
        mount_object(server, bucket, key, content).await;
    }
}

pub async fn mount_object(server: &MockServer, bucket: &str, key: &str, content: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{bucket}/{key}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(content.to_string()))
        .mount(server)
        .await;
}

/// ListObjectsV2 response body. A `next_token` marks the page as truncated.
pub fn listing(bucket: &str, objects: &[(&str, &str)], next_token: Option<&str>) -> String {
    let contents: String = objects
        .iter()
        .map(|(key, content)| {
            format!(
                "<Contents><Key>{key}</Key><LastModified>2021-01-01T12:00:00.000Z</LastModified>\
                 <Size>{}</Size><StorageClass>STANDARD</StorageClass></Contents>",
                content.len()
            )
        })
        .collect();
    let truncation = match next_token {
        Some(token) => format!("<IsTruncated>true</IsTruncated><NextContinuationToken>{token}</NextContinuationToken>"),
        None => "<IsTruncated>false</IsTruncated>".to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>{bucket}</Name><Prefix/>{truncation}{contents}</ListBucketResult>"#
    )
}

pub fn bucket_for(server: &MockServer, bucket_name: &str) -> Bucket {
    Bucket::new(
        "test-bucket",
        BucketSpec {
            bucket_name: bucket_name.to_string(),
            endpoint: server.uri(),
            insecure: true,
            interval: Duration::from_secs(60),
            timeout: Some(Duration::from_secs(30)),
            ..BucketSpec::default()
        },
    )
}

pub fn reconciler_with(storage: Arc<Storage>, secrets: MockSecretReader) -> BucketReconciler {
    BucketReconciler::new(storage, Arc::new(secrets), Arc::new(DefaultProviderFactory))
}
