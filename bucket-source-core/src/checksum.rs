//! Content digests for fetched object trees and stored artifacts.
//!
//! A tree digest feeds one SHA-256 accumulator with every regular file under
//! the root, ordered by `/`-separated relative path (byte-wise), as
//! `relative path || file content`. The digest therefore changes when a file
//! moves even if its bytes do not, and does not depend on the order the
//! filesystem enumerates entries in.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Digest of all regular files under `root`.
pub fn checksum_dir(root: &Path) -> Result<String> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::Checksum {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Checksum {
                path: entry.path().to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            })?;
        entries.push((relative_key(rel), entry.path().to_path_buf()));
    }
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut hasher = Sha256::new();
    for (rel, path) in &entries {
        hasher.update(rel.as_bytes());
        copy_into(&mut hasher, path)?;
    }
    debug!(root = %root.display(), files = entries.len(), "Computed tree checksum");
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of a single file's bytes.
pub fn checksum_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    copy_into(&mut hasher, path)?;
    Ok(hex::encode(hasher.finalize()))
}

fn copy_into(hasher: &mut Sha256, path: &Path) -> Result<()> {
    let checksum_err = |source| Error::Checksum {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(checksum_err)?;
    io::copy(&mut file, hasher).map_err(checksum_err)?;
    Ok(())
}

fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
