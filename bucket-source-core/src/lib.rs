#![doc = "bucket-source-core: reconciliation core for Bucket sources."]

//! This crate holds the data model, checksum engine, artifact store, bucket
//! client and reconciliation pipeline. It has no opinion on where resources
//! come from or how often they are reconciled; that is the binary's job.
//!
//! # Usage
//! Build a [`reconcile::BucketReconciler`] from a [`storage::Storage`], a
//! [`contract::SecretReader`] and a [`contract::ProviderFactory`], then call
//! `reconcile` per resource.

pub mod api;
pub mod bucket;
pub mod checksum;
pub mod condition;
pub mod contract;
pub mod error;
pub mod reconcile;
pub mod storage;

pub use error::{Error, Result};
