//! Generic S3-compatible bucket client.
//!
//! Path-style addressing over `reqwest`: `HEAD /{bucket}` for existence,
//! `GET /{bucket}?list-type=2` for listing, `GET /{bucket}/{key}` for content.
//! Requests are SigV4-signed when credentials are configured and sent
//! anonymously otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, TryStreamExt};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use super::sigv4::{self, EMPTY_PAYLOAD_SHA256};
use crate::api::BucketSpec;
use crate::contract::{BucketProvider, ByteStream, Credentials, ObjectMetadata, ObjectStream};
use crate::error::Error;

pub const DEFAULT_REGION: &str = "us-east-1";

pub struct GenericS3Provider {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    base_url: Url,
    /// `host[:port]` exactly as sent in the Host header.
    host: String,
    credentials: Option<Credentials>,
    region: Option<String>,
    discovered_region: OnceCell<String>,
}

impl GenericS3Provider {
    pub fn new(spec: &BucketSpec, credentials: Option<Credentials>) -> Result<Self, Error> {
        let scheme = if spec.insecure { "http" } else { "https" };
        let raw = if spec.endpoint.contains("://") {
            spec.endpoint.clone()
        } else {
            format!("{scheme}://{}", spec.endpoint)
        };
        let base_url = Url::parse(&raw)
            .map_err(|e| Error::Configuration(format!("invalid endpoint {:?}: {e}", spec.endpoint)))?;
        if base_url.host_str().is_none() {
            return Err(Error::Configuration(format!("endpoint {:?} has no host", spec.endpoint)));
        }
        let host = base_url[url::Position::BeforeHost..url::Position::AfterPort].to_string();

        let client = reqwest::Client::builder()
            .timeout(spec.timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                host,
                credentials,
                region: spec.region.clone().filter(|r| !r.is_empty()),
                discovered_region: OnceCell::new(),
            }),
        })
    }
}

impl Inner {
    async fn send(
        &self,
        method: Method,
        bucket: &str,
        key: Option<&str>,
        params: &[(&str, &str)],
    ) -> Result<Response, Error> {
        let region = match self.credentials {
            Some(_) => self.region(bucket).await?,
            None => DEFAULT_REGION.to_string(),
        };
        self.send_in_region(method, bucket, key, params, &region).await
    }

    async fn send_in_region(
        &self,
        method: Method,
        bucket: &str,
        key: Option<&str>,
        params: &[(&str, &str)],
        region: &str,
    ) -> Result<Response, Error> {
        let mut path = format!("/{}", sigv4::uri_encode(bucket));
        if let Some(key) = key {
            path.push('/');
            path.push_str(&sigv4::encode_key(key));
        }
        let query = sigv4::canonical_query(params);

        let mut url = self.base_url.clone();
        url.set_path(&path);
        url.set_query((!query.is_empty()).then_some(query.as_str()));

        let mut request = self.client.request(method.clone(), url);
        if let Some(credentials) = &self.credentials {
            let signed = sigv4::sign(credentials, region, method.as_str(), &self.host, &path, &query, Utc::now());
            request = request
                .header("x-amz-date", signed.amz_date)
                .header("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)
                .header(reqwest::header::AUTHORIZATION, signed.authorization);
        }

        debug!(%method, bucket, key, "Sending S3 request");
        Ok(request.send().await?)
    }

    /// Signing region: configured, or looked up once via `?location`.
    async fn region(&self, bucket: &str) -> Result<String, Error> {
        if let Some(region) = &self.region {
            return Ok(region.clone());
        }
        self.discovered_region
            .get_or_try_init(|| async {
                let response = self
                    .send_in_region(Method::GET, bucket, None, &[("location", "")], DEFAULT_REGION)
                    .await?;
                if !response.status().is_success() {
                    debug!(bucket, status = %response.status(), "Bucket location unavailable, using default region");
                    return Ok(DEFAULT_REGION.to_string());
                }
                let body = response.text().await?;
                let region = parse_location(&body);
                info!(bucket, region = %region, "Discovered bucket region");
                Ok::<_, Error>(region)
            })
            .await
            .cloned()
    }

    async fn list_page(&self, bucket: &str, token: Option<&str>) -> Result<ListBucketResult, Error> {
        let mut params = vec![("list-type", "2")];
        if let Some(token) = token {
            params.push(("continuation-token", token));
        }
        let response = self.send(Method::GET, bucket, None, &params).await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(Error::NotFound(format!("bucket {bucket:?}"))),
            s => {
                return Err(Error::Transient(format!(
                    "listing bucket {bucket:?} returned {s}"
                )))
            }
        }
        let body = response.text().await?;
        quick_xml::de::from_str(&body)
            .map_err(|e| Error::transient(format!("malformed listing for bucket {bucket:?}"), e))
    }
}

enum Page {
    First,
    Next(String),
    Done,
}

#[async_trait]
impl BucketProvider for GenericS3Provider {
    async fn bucket_exists(&self, bucket_name: &str) -> Result<bool, Error> {
        let response = self.inner.send(Method::HEAD, bucket_name, None, &[]).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Error::Transient(format!(
                "checking existence of bucket {bucket_name:?} returned {s}"
            ))),
        }
    }

    async fn list_objects(&self, bucket_name: &str) -> Result<ObjectStream, Error> {
        let inner = Arc::clone(&self.inner);
        let bucket = bucket_name.to_string();
        let pages = stream::try_unfold((inner, bucket, Page::First), |(inner, bucket, page)| async move {
            let token = match page {
                Page::Done => return Ok(None),
                Page::First => None,
                Page::Next(token) => Some(token),
            };
            let result = inner.list_page(&bucket, token.as_deref()).await?;
            let next = match result.next_continuation_token {
                Some(token) if result.is_truncated => Page::Next(token),
                _ => Page::Done,
            };
            let objects = result.contents.into_iter().map(|entry| Ok::<_, Error>(entry.into_metadata()));
            Ok::<_, Error>(Some((stream::iter(objects), (inner, bucket, next))))
        });
        Ok(Box::pin(pages.try_flatten()))
    }

    async fn get_object(&self, bucket_name: &str, key: &str) -> Result<ByteStream, Error> {
        let response = self.inner.send(Method::GET, bucket_name, Some(key), &[]).await?;
        match response.status() {
            s if s.is_success() => Ok(Box::pin(response.bytes_stream().map_err(Error::from))),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("object {key:?}"))),
            s => Err(Error::Transient(format!("fetching object {key:?} returned {s}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListEntry>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    last_modified: Option<String>,
}

impl ListEntry {
    fn into_metadata(self) -> ObjectMetadata {
        ObjectMetadata {
            last_modified: self
                .last_modified
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            key: self.key,
            size: self.size,
            content_type: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LocationConstraint {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_location(body: &str) -> String {
    let location = quick_xml::de::from_str::<LocationConstraint>(body.trim())
        .map(|l| l.value.trim().to_string())
        .unwrap_or_default();
    match location.as_str() {
        "" => DEFAULT_REGION.to_string(),
        "EU" => "eu-west-1".to_string(),
        other => other.to_string(),
    }
}
