//! # File Materializer
//!
//! Turns a [`WatchedResource`] into files on disk and removes them again.
//!
//! ## Layout
//!
//! ```text
//! <base>/<namespace>/<kind>/<name>/<data key>
//! ```
//!
//! `<base>` is the configured output folder, or the value of the target-directory
//! annotation on the resource (absolute, or relative to the output folder).
//! Every file is written to a temp file in the same directory and renamed into
//! place, so readers never observe a partially written file. Deleting a resource
//! removes its whole directory, which does not depend on knowing the keys that
//! were written last time.

use crate::controller::resource::{ResourceKey, ResourceKind, WatchedResource};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Kubernetes data key grammar, also used for namespace and name path segments
static VALID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-._a-zA-Z0-9]+$").expect("Failed to compile path segment regex - this should never happen")
});

fn is_valid_segment(segment: &str) -> bool {
    segment != "." && segment != ".." && VALID_SEGMENT.is_match(segment)
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("invalid path segment {segment:?} for {resource}")]
    InvalidSegment { resource: ResourceKey, segment: String },
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("file operation did not complete: {0}")]
    Interrupted(String),
}

impl MaterializeError {
    /// Path the failed operation targeted, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            MaterializeError::InvalidSegment { .. } | MaterializeError::Interrupted(_) => None,
            MaterializeError::CreateDir { path, .. }
            | MaterializeError::Write { path, .. }
            | MaterializeError::Remove { path, .. } => Some(path),
        }
    }
}

/// Why a resource is being written, for logs and Kubernetes Events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteReason {
    /// Present in a full listing (startup, resync, LIST mode)
    Resume,
    Create,
    Update,
}

impl WriteReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WriteReason::Resume => "resume",
            WriteReason::Create => "create",
            WriteReason::Update => "update",
        }
    }
}

impl fmt::Display for WriteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful [`FileMaterializer::write_resource`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub dir: PathBuf,
    pub files_written: usize,
    /// Files left over from keys that no longer exist
    pub files_removed: usize,
    /// Data keys that cannot be used as file names
    pub skipped_keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FileMaterializer {
    base: PathBuf,
    file_mode: u32,
    target_dir_annotation: String,
}

impl FileMaterializer {
    pub fn new(base: impl Into<PathBuf>, file_mode: u32, target_dir_annotation: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            file_mode,
            target_dir_annotation: target_dir_annotation.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Base directory for a resource, honouring the target-directory annotation
    #[must_use]
    pub fn base_for(&self, resource: &WatchedResource) -> PathBuf {
        match resource
            .annotations
            .get(&self.target_dir_annotation)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
        {
            // join() replaces the base when the annotation is absolute
            Some(target) => self.base.join(target),
            None => self.base.clone(),
        }
    }

    /// Directory holding every file of a resource
    pub fn resource_dir(&self, resource: &WatchedResource) -> Result<PathBuf, MaterializeError> {
        layout_dir(&self.base_for(resource), &resource.key())
    }

    /// Directory a resource would use without any annotation override
    pub fn default_resource_dir(&self, key: &ResourceKey) -> Result<PathBuf, MaterializeError> {
        layout_dir(&self.base, key)
    }

    /// Deterministic path of a single data entry
    pub fn file_path(&self, resource: &WatchedResource, data_key: &str) -> Result<PathBuf, MaterializeError> {
        if !is_valid_segment(data_key) {
            return Err(MaterializeError::InvalidSegment {
                resource: resource.key(),
                segment: data_key.to_string(),
            });
        }
        Ok(self.resource_dir(resource)?.join(data_key))
    }

    /// Write one file per data entry and drop files for keys that disappeared.
    pub fn write_resource(
        &self,
        resource: &WatchedResource,
        reason: WriteReason,
    ) -> Result<WriteOutcome, MaterializeError> {
        let key = resource.key();
        let dir = self.resource_dir(resource)?;
        fs::create_dir_all(&dir).map_err(|source| MaterializeError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let mut outcome = WriteOutcome {
            dir: dir.clone(),
            ..WriteOutcome::default()
        };
        let mut kept = BTreeSet::new();

        for (data_key, value) in &resource.data {
            if !is_valid_segment(data_key) {
                warn!(
                    resource = %key,
                    data_key = data_key.as_str(),
                    "Skipping data key that is not a valid file name"
                );
                outcome.skipped_keys.push(data_key.clone());
                continue;
            }
            let path = dir.join(data_key);
            self.write_atomic(&dir, &path, value)?;
            debug!(resource = %key, path = %path.display(), bytes = value.len(), "file.written");
            kept.insert(data_key.as_str());
            outcome.files_written += 1;
        }

        outcome.files_removed = prune_stale_files(&dir, &kept)?;

        info!(
            resource = %key,
            reason = reason.as_str(),
            dir = %dir.display(),
            files = outcome.files_written,
            removed = outcome.files_removed,
            "Materialized resource"
        );
        Ok(outcome)
    }

    /// Remove every file produced for a resource.
    ///
    /// Returns `false` when there was nothing to remove.
    pub fn delete_resource(&self, resource: &WatchedResource) -> Result<bool, MaterializeError> {
        let dir = self.resource_dir(resource)?;
        self.delete_dir(&resource.key(), &dir)
    }

    /// Remove a resource directory and its kind directory when left empty.
    ///
    /// The namespace directory is shared with the loop of the other kind and stays.
    pub fn delete_dir(&self, key: &ResourceKey, dir: &Path) -> Result<bool, MaterializeError> {
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(resource = %key, dir = %dir.display(), "Nothing to remove");
                return Ok(false);
            }
            Err(source) => {
                return Err(MaterializeError::Remove {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }

        // Fails while other resources of this kind remain
        if let Some(kind_dir) = dir.parent() {
            let _ = fs::remove_dir(kind_dir);
        }

        info!(resource = %key, dir = %dir.display(), "Removed materialized resource");
        Ok(true)
    }

    /// Resource identities currently materialized under the output folder.
    ///
    /// Only the default layout is enumerated; annotation targets are not scanned.
    #[must_use]
    pub fn materialized_under(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Vec<(ResourceKey, PathBuf)> {
        let root = match namespace {
            Some(ns) if is_valid_segment(ns) => self.base.join(ns),
            Some(_) => return Vec::new(),
            None => self.base.clone(),
        };
        let depth = if namespace.is_some() { 2 } else { 3 };
        if !root.is_dir() {
            return Vec::new();
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry while enumerating output folder");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.base) else {
                continue;
            };
            let segments: Vec<&str> = relative.iter().filter_map(|s| s.to_str()).collect();
            if let [ns, kind_dir, name] = segments.as_slice() {
                if *kind_dir == kind.dir_name() {
                    found.push((ResourceKey::new(kind, *ns, *name), entry.path().to_path_buf()));
                }
            }
        }
        found
    }

    fn write_atomic(&self, dir: &Path, path: &Path, content: &[u8]) -> Result<(), MaterializeError> {
        let write_err = |source| MaterializeError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(dir)
            .map_err(write_err)?;
        tmp.write_all(content).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        self.apply_mode(tmp.as_file()).map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    #[cfg(unix)]
    fn apply_mode(&self, file: &fs::File) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(self.file_mode))
    }

    #[cfg(not(unix))]
    fn apply_mode(&self, _file: &fs::File) -> io::Result<()> {
        Ok(())
    }
}

fn layout_dir(base: &Path, key: &ResourceKey) -> Result<PathBuf, MaterializeError> {
    for segment in [key.namespace.as_str(), key.name.as_str()] {
        if !is_valid_segment(segment) {
            return Err(MaterializeError::InvalidSegment {
                resource: key.clone(),
                segment: segment.to_string(),
            });
        }
    }
    Ok(base
        .join(&key.namespace)
        .join(key.kind.dir_name())
        .join(&key.name))
}

/// Remove regular files in `dir` whose name is not in `kept`
fn prune_stale_files(dir: &Path, kept: &BTreeSet<&str>) -> Result<usize, MaterializeError> {
    let entries = fs::read_dir(dir).map_err(|source| MaterializeError::Remove {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let keep = name.to_str().is_some_and(|n| kept.contains(n));
        if keep || entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(MaterializeError::Remove { path, source }),
        }
    }
    Ok(removed)
}

/// Stable digest of a resource's data, used to skip rewriting unchanged content
#[must_use]
pub fn content_fingerprint(data: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
