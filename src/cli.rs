//! # bucket-source CLI Interface (Module)
//!
//! Command parsing and orchestration only. Everything that touches buckets,
//! checksums or artifacts lives in `bucket-source-core`.
//!
//! ## Features
//! - `reconcile`: a single pass over every configured bucket, statuses
//!   printed as JSON on stdout
//! - `watch`: continuous reconciliation until Ctrl-C
//!
//! ## How To Use
//! - From the shell: `bucket-source --help`.
//! - From tests: build a [`Cli`] and call [`run`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bucket_source_core::reconcile::BucketReconciler;
use bucket_source_core::storage::Storage;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::controller::{reconcile_once, watch};
use crate::load_config::load_config;
use crate::secrets::EnvSecretReader;

/// CLI for bucket-source: mirror S3-compatible buckets into versioned artifacts.
#[derive(Parser)]
#[clap(
    name = "bucket-source",
    version,
    about = "Reconcile S3-compatible buckets into versioned tarball artifacts"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile every configured bucket once and print the resulting statuses
    Reconcile {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Keep every configured bucket reconciled until interrupted
    Watch {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn build_reconciler(config: &Config) -> Result<Arc<BucketReconciler>> {
    let storage = Storage::new(&config.storage.path, config.storage.hostname.clone())
        .with_context(|| format!("Failed to initialise storage at {:?}", config.storage.path))?;
    Ok(Arc::new(BucketReconciler::with_default_providers(
        Arc::new(storage),
        Arc::new(EnvSecretReader::new()),
    )))
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Reconcile { config } => {
            let config = load_config(config)?;
            let reconciler = build_reconciler(&config)?;
            let buckets = config.buckets.iter().map(|b| b.to_bucket()).collect();
            tracing::info!(command = "reconcile", "Starting reconciliation pass");

            let reports = reconcile_once(reconciler, buckets, CancellationToken::new()).await;
            println!("{}", serde_json::to_string_pretty(&reports)?);

            let failed = reports.iter().filter(|r| r.error.is_some()).count();
            if failed > 0 {
                tracing::error!(command = "reconcile", failed, "Reconciliation pass had failures");
                anyhow::bail!("{failed} bucket(s) failed to reconcile");
            }
            tracing::info!(command = "reconcile", buckets = reports.len(), "Reconciliation pass complete");
            Ok(())
        }
        Commands::Watch { config } => {
            let config = load_config(config)?;
            let reconciler = build_reconciler(&config)?;
            let buckets = config.buckets.iter().map(|b| b.to_bucket()).collect();

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => tracing::info!("Interrupt received, shutting down"),
                    Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
                }
                on_signal.cancel();
            });

            tracing::info!(command = "watch", "Starting watch");
            watch(reconciler, buckets, cancel).await;
            Ok(())
        }
    }
}
