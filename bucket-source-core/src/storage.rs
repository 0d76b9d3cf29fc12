//! Local artifact store.
//!
//! [`Storage`] owns a base directory and the hostname artifacts are served
//! under. Artifacts are written through a temporary sibling and renamed into
//! place, so the file server never sees a partial tarball. Garbage collection
//! is scoped to the directory of a single resource.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Header;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{Artifact, ObjectMeta};
use crate::checksum;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Storage {
    base_path: PathBuf,
    hostname: String,
}

impl Storage {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl Into<PathBuf>, hostname: impl Into<String>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| Error::storage(&base_path, e))?;
        let storage = Self {
            base_path,
            hostname: hostname.into(),
        };
        info!(
            base_path = %storage.base_path.display(),
            hostname = %storage.hostname,
            "Initialised artifact storage"
        );
        Ok(storage)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Artifact addressed as `<kind>/<namespace>/<name>/<revision>.tar.gz`.
    /// Every resource gets its own directory, even when several resources
    /// fetch the same remote bucket. An empty namespace is left out.
    pub fn new_artifact_for(&self, kind: &str, metadata: &ObjectMeta, revision: &str) -> Artifact {
        let dir: Vec<&str> = [kind, metadata.namespace.as_str(), metadata.name.as_str()]
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .collect();
        Artifact {
            path: format!("{}/{revision}.tar.gz", dir.join("/")),
            revision: revision.to_string(),
            ..Artifact::default()
        }
    }

    /// Absolute location of the artifact. `..` components cannot climb out of
    /// the base directory.
    pub fn local_path(&self, artifact: &Artifact) -> PathBuf {
        secure_join(&self.base_path, &artifact.path)
    }

    /// Create all parent directories of the artifact.
    pub fn mkdir_all(&self, artifact: &Artifact) -> Result<()> {
        let path = self.local_path(artifact);
        let dir = path.parent().unwrap_or(&self.base_path);
        fs::create_dir_all(dir).map_err(|e| Error::storage(dir, e))
    }

    /// Write `reader` to the artifact's path without ever exposing a partial
    /// file. An existing file is replaced.
    pub fn atomic_write_file<R: Read>(&self, artifact: &Artifact, mut reader: R, mode: u32) -> Result<()> {
        let path = self.local_path(artifact);
        self.write_atomically(artifact, mode, |file| {
            io::copy(&mut reader, file)
                .map(|_| ())
                .map_err(|e| Error::storage(&path, e))
        })?;
        debug!(path = %path.display(), "Atomically wrote artifact");
        Ok(())
    }

    /// Let `write` fill a temporary sibling of the artifact, then fsync,
    /// chmod and rename it into place. Returns the size of the new file.
    fn write_atomically<F>(&self, artifact: &Artifact, mode: u32, write: F) -> Result<u64>
    where
        F: FnOnce(&mut File) -> Result<()>,
    {
        let path = self.local_path(artifact);
        let dir = path.parent().unwrap_or(&self.base_path);

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(dir)
            .map_err(|e| Error::storage(dir, e))?;
        write(tmp.as_file_mut())?;
        tmp.as_file_mut()
            .flush()
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::storage(tmp.path(), e))?;
        set_mode(tmp.as_file(), mode).map_err(|e| Error::storage(tmp.path(), e))?;
        let size = tmp
            .as_file()
            .metadata()
            .map_err(|e| Error::storage(tmp.path(), e))?
            .len();
        tmp.persist(&path).map_err(|e| Error::storage(&path, e.error))?;
        Ok(size)
    }

    /// True when the artifact's file is present. Any I/O error counts as
    /// absent.
    pub fn artifact_exist(&self, artifact: &Artifact) -> bool {
        fs::metadata(self.local_path(artifact)).is_ok_and(|m| m.is_file())
    }

    /// Point the artifact's URL at the current hostname.
    pub fn set_artifact_url(&self, artifact: &mut Artifact) {
        artifact.url = format!(
            "http://{}/{}",
            self.hostname.trim_end_matches('/'),
            artifact.path.trim_start_matches('/')
        );
    }

    /// Delete every file next to the artifact except the artifact itself.
    /// Returns the removed paths.
    pub fn remove_all_but_current(&self, artifact: &Artifact) -> Result<Vec<PathBuf>> {
        let current = self.local_path(artifact);
        let dir = current.parent().unwrap_or(&self.base_path);

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(dir, e)),
        };

        let mut removed = Vec::new();
        let mut failure = None;
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(dir, e))?;
            let path = entry.path();
            if path == current {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| Error::storage(&path, e))?;
            if file_type.is_dir() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = ?e, "Failed to garbage collect file");
                    failure.get_or_insert(Error::storage(&path, e));
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if !removed.is_empty() {
            info!(dir = %dir.display(), removed = removed.len(), "Garbage collected artifacts");
        }
        Ok(removed)
    }

    /// Stream `dir` as a gzip-compressed tarball into the artifact's path and
    /// stamp the artifact's update time. Stops between entries once `cancel`
    /// fires, leaving the previous artifact in place.
    pub fn archive(&self, artifact: &mut Artifact, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        let size = self.write_atomically(artifact, 0o644, |file| {
            let encoder = GzEncoder::new(file, Compression::default());
            archive_dir(dir, encoder, cancel)?
                .finish()
                .map(|_| ())
                .map_err(|e| Error::storage(dir, e))
        })?;
        artifact.last_update_time = Some(Utc::now());
        info!(path = %artifact.path, size, "Archived source directory");
        Ok(())
    }

    /// Digest of the stored tarball bytes.
    pub fn checksum(&self, artifact: &Artifact) -> Result<String> {
        checksum::checksum_file(&self.local_path(artifact))
    }
}

/// Deterministic tar of the regular files and directories under `root`,
/// written to `writer`. Ownership and timestamps are zeroed so equal trees
/// give equal bytes.
fn archive_dir<W: Write>(root: &Path, writer: W, cancel: &CancellationToken) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for entry in walkdir::WalkDir::new(root).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::storage(path, e.into())
        })?;
        let path = entry.path();
        if path == root {
            continue;
        }
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder
                .append_data(&mut header, rel, io::empty())
                .map_err(|e| Error::storage(path, e))?;
        } else if file_type.is_file() {
            let file = File::open(path).map_err(|e| Error::storage(path, e))?;
            let len = file.metadata().map_err(|e| Error::storage(path, e))?.len();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(len);
            builder
                .append_data(&mut header, rel, file)
                .map_err(|e| Error::storage(path, e))?;
        } else {
            debug!(path = %path.display(), "Skipping non-regular file during archive");
        }
    }

    builder.into_inner().map_err(|e| Error::storage(root, e))
}

/// Join `rel` onto `root`, resolving `.` and `..` lexically without leaving
/// `root`. Object keys and artifact paths both go through here.
pub fn secure_join(root: &Path, rel: &str) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.iter().fold(root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}
