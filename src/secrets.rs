//! Secret backend reading bucket credentials from environment variables.
//!
//! A secret named `minio-credentials` maps onto
//! `BUCKET_SECRET_MINIO_CREDENTIALS_ACCESSKEY` and
//! `BUCKET_SECRET_MINIO_CREDENTIALS_SECRETKEY`. Both come from `.env` when
//! present, since the binary loads it with `dotenvy` at startup.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bucket_source_core::bucket::{ACCESS_KEY_FIELD, SECRET_KEY_FIELD};
use bucket_source_core::contract::{Secret, SecretReader};
use bucket_source_core::Error;
use tracing::debug;

pub const SECRET_ENV_PREFIX: &str = "BUCKET_SECRET";

#[derive(Debug, Clone, Default)]
pub struct EnvSecretReader;

impl EnvSecretReader {
    pub fn new() -> Self {
        Self
    }

    /// Environment variable holding `field` of secret `name`.
    pub fn env_var(name: &str, field: &str) -> String {
        let name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{SECRET_ENV_PREFIX}_{name}_{}", field.to_ascii_uppercase())
    }
}

#[async_trait]
impl SecretReader for EnvSecretReader {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        let data: BTreeMap<String, Vec<u8>> = [ACCESS_KEY_FIELD, SECRET_KEY_FIELD]
            .into_iter()
            .filter_map(|field| {
                std::env::var(Self::env_var(name, field))
                    .ok()
                    .map(|value| (field.to_string(), value.into_bytes()))
            })
            .collect();

        if data.is_empty() {
            debug!(namespace, name, "No secret variables in environment");
            return Err(Error::NotFound(format!("secret \"{namespace}/{name}\"")));
        }
        debug!(namespace, name, fields = data.len(), "Read secret from environment");
        Ok(Secret {
            name: name.to_string(),
            data,
        })
    }
}
