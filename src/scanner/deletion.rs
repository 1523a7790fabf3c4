//! Release removal: iterative tree deletion with a depth cap, dry-run support
//! and post-deletion verification.
//!
//! Pipeline: enumerate the whole tree with an explicit work stack (no
//! recursion) -> refuse before touching anything if it is deeper than the cap
//! -> unlink files -> remove directories deepest-first -> verify the root is gone.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::errors::{Result, StbError};

/// Summary of one removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub duration: Duration,
    pub dry_run: bool,
}

/// Deletes release trees, honoring the daemon-wide dry-run switch.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseRemover {
    max_depth: usize,
    dry_run: bool,
}

impl ReleaseRemover {
    #[must_use]
    pub const fn new(max_depth: usize, dry_run: bool) -> Self {
        Self { max_depth, dry_run }
    }

    /// Remove `path` and everything below it. Missing paths are a no-op.
    pub fn remove(&self, path: &Path) -> Result<RemovalReport> {
        if self.dry_run {
            tracing::info!(path = %path.display(), dry_run = true, "would delete tree");
            return Ok(RemovalReport {
                dry_run: true,
                ..RemovalReport::default()
            });
        }
        let report = remove_tree(path, self.max_depth)?;
        tracing::debug!(
            path = %path.display(),
            files = report.files_removed,
            dirs = report.dirs_removed,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "deleted tree"
        );
        Ok(report)
    }
}

/// Iteratively delete `root`.
pub fn remove_tree(root: &Path, max_depth: usize) -> Result<RemovalReport> {
    let start = Instant::now();
    let meta = match fs::symlink_metadata(root) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(RemovalReport::default());
        }
        Err(err) => return Err(StbError::io(root, err)),
    };

    let mut report = RemovalReport::default();
    if !meta.is_dir() {
        fs::remove_file(root).map_err(|e| StbError::io(root, e))?;
        report.files_removed = 1;
        report.duration = start.elapsed();
        return Ok(report);
    }

    let (files, dirs) = enumerate_tree(root, max_depth)?;

    for file in &files {
        match fs::remove_file(file) {
            Ok(()) => report.files_removed += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StbError::io(file, err)),
        }
    }
    for dir in dirs.iter().rev() {
        match fs::remove_dir(dir) {
            Ok(()) => report.dirs_removed += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StbError::io(dir, err)),
        }
    }

    if fs::symlink_metadata(root).is_ok() {
        return Err(StbError::Runtime {
            details: format!("path still exists after deletion: {}", root.display()),
        });
    }

    report.duration = start.elapsed();
    Ok(report)
}

/// Walk `root` without recursion. Returns non-directory entries and
/// directories, the latter in discovery order (parents before children).
pub(crate) fn enumerate_tree(root: &Path, max_depth: usize) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| StbError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StbError::io(&dir, e))?;
            let child = entry.path();
            let file_type = entry.file_type().map_err(|e| StbError::io(&child, e))?;
            if file_type.is_dir() {
                if depth + 1 > max_depth {
                    tracing::warn!(
                        root = %root.display(),
                        path = %child.display(),
                        max_depth,
                        "tree exceeds max depth; refusing to touch it"
                    );
                    return Err(StbError::TreeTooDeep {
                        path: root.to_path_buf(),
                        max_depth,
                    });
                }
                dirs.push(child.clone());
                stack.push((child, depth + 1));
            } else {
                files.push(child);
            }
        }
    }

    Ok((files, dirs))
}
