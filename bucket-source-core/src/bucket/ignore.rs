//! `.sourceignore` handling.
//!
//! Patterns use gitignore syntax and are matched against object keys, so
//! `ignored/` excludes every key under that prefix. Matching itself is done
//! by the `ignore` crate.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

/// Name of the object holding ignore patterns at the bucket root.
pub const IGNORE_FILE: &str = ".sourceignore";

/// Always excluded, on top of whatever the bucket or resource adds.
pub const DEFAULT_EXCLUDES: &[&str] = &[".git/", ".gitignore", ".gitmodules", ".gitattributes"];

pub struct IgnoreMatcher {
    inner: Gitignore,
}

impl IgnoreMatcher {
    /// Build a matcher from the default excludes plus each pattern source in
    /// order. Later sources can re-include with `!pattern`.
    pub fn new<'a>(sources: impl IntoIterator<Item = &'a str>) -> Self {
        let mut builder = GitignoreBuilder::new("");
        let defaults = DEFAULT_EXCLUDES.iter().copied();
        let lines = sources.into_iter().flat_map(str::lines);
        for line in defaults.chain(lines) {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(e) = builder.add_line(None, line) {
                warn!(pattern = line, error = %e, "Skipping invalid ignore pattern");
            }
        }
        let inner = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build ignore matcher, only defaults apply");
            Gitignore::empty()
        });
        Self { inner }
    }

    /// True when the object must not be downloaded.
    pub fn is_ignored(&self, key: &str) -> bool {
        if key.ends_with('/') || key == IGNORE_FILE {
            return true;
        }
        let ignored = self
            .inner
            .matched_path_or_any_parents(key.trim_start_matches('/'), false)
            .is_ignore();
        if ignored {
            debug!(key, "Ignoring object");
        }
        ignored
    }
}
