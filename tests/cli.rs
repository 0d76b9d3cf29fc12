use std::fs::write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, NamedTempFile};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>dummy</Name>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>test.txt</Key><Size>4</Size></Contents>
</ListBucketResult>"#;

fn write_config(storage: &std::path::Path, endpoint: &str, bucket_name: &str) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        "storage:\n  path: {}\n  hostname: localhost:9090\nbuckets:\n  - name: test-bucket\n    bucket_name: {bucket_name}\n    endpoint: {endpoint}\n    insecure: true\n    timeout_seconds: 10\n",
        storage.display()
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_cli_publishes_artifact() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/dummy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dummy"))
        .and(query_param("list-type", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(LISTING, "application/xml"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dummy/test.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("test"))
        .mount(&server)
        .await;

    let storage = tempdir().unwrap();
    let config = write_config(storage.path(), &server.uri(), "dummy");
    let revision = "143f40f8f1fe8cc8a973db92066405cbf5145817d3f788ebb83bc13139531e83";

    let mut cmd = Command::cargo_bin("bucket-source").expect("Binary exists");
    cmd.arg("reconcile")
        .arg("--config")
        .arg(config.path())
        .env_remove("STORAGE_PATH")
        .env_remove("STORAGE_ADV_ADDR");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "http://localhost:9090/bucket/default/test-bucket/{revision}.tar.gz"
        )))
        .stdout(predicate::str::contains("\"Ready\""));

    assert!(storage
        .path()
        .join(format!("bucket/default/test-bucket/{revision}.tar.gz"))
        .is_file());
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_cli_reports_missing_bucket_without_failing() {
    let server = MockServer::start().await;
    let storage = tempdir().unwrap();
    let config = write_config(storage.path(), &server.uri(), "invalid");

    let mut cmd = Command::cargo_bin("bucket-source").expect("Binary exists");
    cmd.arg("reconcile")
        .arg("--config")
        .arg(config.path())
        .env_remove("STORAGE_PATH")
        .env_remove("STORAGE_ADV_ADDR");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Bucket \\\"invalid\\\" does not exist"));
}

#[test]
fn reconcile_cli_fails_on_unreachable_endpoint() {
    let storage = tempdir().unwrap();
    let config = write_config(storage.path(), "127.0.0.1:1", "dummy");

    let mut cmd = Command::cargo_bin("bucket-source").expect("Binary exists");
    cmd.arg("reconcile")
        .arg("--config")
        .arg(config.path())
        .env_remove("STORAGE_PATH")
        .env_remove("STORAGE_ADV_ADDR");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("\"error\""))
        .stderr(predicate::str::contains("failed to reconcile"));
}

#[test]
fn cli_rejects_missing_config() {
    let mut cmd = Command::cargo_bin("bucket-source").expect("Binary exists");
    cmd.arg("reconcile").arg("--config").arg("/nonexistent/config.yaml");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}
