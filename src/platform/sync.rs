//! Copy/verify seam between the placement engine and the bytes on disk.
//!
//! The engine only ever asks for four things: copy one release tree, restore
//! its modification time, wipe a release, and compare top-level entry counts.
//! `CommandSyncExecutor` delegates the copy to an external tool (rsync by
//! default); `NativeSyncExecutor` does it in-process.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use filetime::FileTime;

use crate::core::config::{SyncConfig, SyncMode};
use crate::core::errors::{Result, StbError};
use crate::core::paths::release_path;
use crate::scanner::deletion::{enumerate_tree, remove_tree};

/// Moves release trees between sections.
pub trait SyncExecutor: Send + Sync {
    /// Copy `source_section/release_name` to `dest_section/release_name`.
    fn copy(&self, source_section: &Path, release_name: &str, dest_section: &Path) -> Result<()>;

    /// Set the modification time of `dest` to `unix_secs`.
    fn restore_timestamp(&self, dest: &Path, unix_secs: i64) -> Result<()> {
        restore_timestamp(dest, unix_secs)
    }

    /// Remove `section/release_name` if present.
    fn wipe(&self, section: &Path, release_name: &str) -> Result<()>;

    /// Compare the number of top-level entries in both trees.
    ///
    /// Deliberately shallow: nested directories are not descended, so this
    /// does not detect omissions below the first level.
    fn counts_match(&self, source: &Path, dest: &Path) -> Result<bool> {
        shallow_counts_match(source, dest)
    }
}

/// Build the configured executor.
#[must_use]
pub fn executor_from_config(config: &SyncConfig, max_depth: usize) -> Arc<dyn SyncExecutor> {
    match config.mode {
        SyncMode::Command => Arc::new(CommandSyncExecutor::new(config, max_depth)),
        SyncMode::Native => Arc::new(NativeSyncExecutor::new(max_depth)),
    }
}

// ──────────────────── external tool ────────────────────

/// Runs `<program> <args...> <source>/<name> <dest>/`.
#[derive(Debug, Clone)]
pub struct CommandSyncExecutor {
    program: String,
    args: Vec<String>,
    max_depth: usize,
}

impl CommandSyncExecutor {
    #[must_use]
    pub fn new(config: &SyncConfig, max_depth: usize) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            max_depth,
        }
    }
}

impl SyncExecutor for CommandSyncExecutor {
    fn copy(&self, source_section: &Path, release_name: &str, dest_section: &Path) -> Result<()> {
        fs::create_dir_all(dest_section).map_err(|e| StbError::io(dest_section, e))?;
        let source = release_path(source_section, release_name);
        let mut dest_arg = dest_section.as_os_str().to_os_string();
        dest_arg.push("/");

        tracing::debug!(
            program = %self.program,
            source = %source.display(),
            dest = %dest_section.display(),
            "running sync command"
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&source)
            .arg(&dest_arg)
            .output()
            .map_err(|e| StbError::Sync {
                program: self.program.clone(),
                details: format!("failed to start: {e}"),
            })?;
        if !output.status.success() {
            return Err(StbError::Sync {
                program: self.program.clone(),
                details: format!(
                    "{} for {}: {}",
                    output.status,
                    source.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    fn wipe(&self, section: &Path, release_name: &str) -> Result<()> {
        wipe_release(section, release_name, self.max_depth)
    }
}

// ──────────────────── in-process ────────────────────

/// Copies with std::fs. Symlinks are recreated, never followed.
#[derive(Debug, Clone, Copy)]
pub struct NativeSyncExecutor {
    max_depth: usize,
}

impl NativeSyncExecutor {
    #[must_use]
    pub const fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl SyncExecutor for NativeSyncExecutor {
    fn copy(&self, source_section: &Path, release_name: &str, dest_section: &Path) -> Result<()> {
        let source = release_path(source_section, release_name);
        let dest = release_path(dest_section, release_name);
        copy_tree(&source, &dest, self.max_depth)
    }

    fn wipe(&self, section: &Path, release_name: &str) -> Result<()> {
        wipe_release(section, release_name, self.max_depth)
    }
}

fn copy_tree(source: &Path, dest: &Path, max_depth: usize) -> Result<()> {
    let meta = fs::symlink_metadata(source).map_err(|e| StbError::io(source, e))?;
    if !meta.is_dir() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StbError::io(parent, e))?;
        }
        return copy_entry(source, dest);
    }

    let (files, dirs) = enumerate_tree(source, max_depth)?;
    for dir in &dirs {
        let target = rebase(source, dir, dest)?;
        fs::create_dir_all(&target).map_err(|e| StbError::io(&target, e))?;
    }
    for file in &files {
        let target = rebase(source, file, dest)?;
        copy_entry(file, &target)?;
    }
    // Directory mtimes were bumped by the writes above; children first.
    for dir in dirs.iter().rev() {
        let target = rebase(source, dir, dest)?;
        if let Ok(meta) = fs::metadata(dir) {
            let mtime = FileTime::from_last_modification_time(&meta);
            filetime::set_file_mtime(&target, mtime).map_err(|e| StbError::io(&target, e))?;
        }
    }
    Ok(())
}

fn rebase(source_root: &Path, entry: &Path, dest_root: &Path) -> Result<std::path::PathBuf> {
    let rel = entry.strip_prefix(source_root).map_err(|_| StbError::Runtime {
        details: format!(
            "{} escaped copy root {}",
            entry.display(),
            source_root.display()
        ),
    })?;
    Ok(dest_root.join(rel))
}

fn copy_entry(source: &Path, dest: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source).map_err(|e| StbError::io(source, e))?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(source).map_err(|e| StbError::io(source, e))?;
        match fs::remove_file(dest) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StbError::io(dest, err)),
        }
        return make_symlink(&target, dest);
    }
    if !meta.is_file() {
        tracing::debug!(path = %source.display(), "skipping special file during copy");
        return Ok(());
    }
    fs::copy(source, dest).map_err(|e| StbError::io(dest, e))?;
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dest, mtime).map_err(|e| StbError::io(dest, e))?;
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| StbError::io(link, e))
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    tracing::warn!(
        link = %link.display(),
        target = %target.display(),
        "symlinks are not recreated on this platform"
    );
    Ok(())
}

// ──────────────────── shared helpers ────────────────────

/// Set both access and modification time of `path` to `unix_secs`.
pub fn restore_timestamp(path: &Path, unix_secs: i64) -> Result<()> {
    let stamp = FileTime::from_unix_time(unix_secs, 0);
    filetime::set_file_times(path, stamp, stamp).map_err(|e| StbError::io(path, e))
}

/// Remove `section/release_name` and everything below it.
pub fn wipe_release(section: &Path, release_name: &str, max_depth: usize) -> Result<()> {
    remove_tree(&release_path(section, release_name), max_depth).map(|_| ())
}

/// Top-level entry counts of both directories are equal.
pub fn shallow_counts_match(source: &Path, dest: &Path) -> Result<bool> {
    let source_count = count_entries(source)?;
    let dest_count = match count_entries(dest) {
        Ok(count) => count,
        Err(StbError::Io { source: err, .. }) if err.kind() == ErrorKind::NotFound => {
            return Ok(false);
        }
        Err(err) => return Err(err),
    };
    if source_count != dest_count {
        tracing::debug!(
            source = %source.display(),
            dest = %dest.display(),
            source_count,
            dest_count,
            "top-level entry counts differ"
        );
    }
    Ok(source_count == dest_count)
}

fn count_entries(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir).map_err(|e| StbError::io(dir, e))? {
        entry.map_err(|e| StbError::io(dir, e))?;
        count += 1;
    }
    Ok(count)
}
