//! `load_config` module: reads the YAML config file, applies environment
//! overrides and validates the result.
//!
//! # Environment
//! - `STORAGE_PATH` replaces `storage.path`
//! - `STORAGE_ADV_ADDR` replaces `storage.hostname`
//!
//! # Errors
//! All errors use `anyhow::Error` and are surfaced at the CLI boundary.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing::{error, info};

use crate::config::Config;

pub const STORAGE_PATH_ENV: &str = "STORAGE_PATH";
pub const STORAGE_ADV_ADDR_ENV: &str = "STORAGE_ADV_ADDR";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: Config = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(storage_path) = std::env::var(STORAGE_PATH_ENV) {
        info!(storage_path = %storage_path, "Storage path overridden from env");
        config.storage.path = PathBuf::from(storage_path);
    }
    if let Ok(hostname) = std::env::var(STORAGE_ADV_ADDR_ENV) {
        info!(hostname = %hostname, "Storage hostname overridden from env");
        config.storage.hostname = hostname;
    }

    validate(&config)?;
    config.trace_loaded();
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.hostname.trim().is_empty() {
        bail!("storage.hostname must not be empty");
    }

    let mut seen = HashSet::new();
    for bucket in &config.buckets {
        let key = format!("{}/{}", bucket.namespace, bucket.name);
        if bucket.name.is_empty() {
            bail!("every bucket needs a name");
        }
        if !seen.insert(key.clone()) {
            bail!("duplicate bucket {key}");
        }
        if bucket.bucket_name.is_empty() {
            bail!("bucket {key}: bucket_name must not be empty");
        }
        if bucket.endpoint.is_empty() {
            bail!("bucket {key}: endpoint must not be empty");
        }
        if bucket.interval_seconds == 0 {
            bail!("bucket {key}: interval_seconds must be greater than zero");
        }
        if bucket.timeout_seconds == Some(0) {
            bail!("bucket {key}: timeout_seconds must be greater than zero");
        }
    }
    Ok(())
}
