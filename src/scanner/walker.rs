//! Parallel, iterative tree sizer used to measure one release directory.
//!
//! Directories are fanned out over a crossbeam work channel to a small pool of
//! scoped worker threads; there is no recursion, so deeply nested or
//! adversarial trees cannot exhaust the stack. Symlinks are never followed.
//! Entries that cannot be read contribute zero bytes and are counted, never
//! fatal.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

/// Result of sizing one tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeMeasure {
    /// Sum of regular-file sizes; directories contribute nothing of their own.
    pub bytes: u64,
    pub files: u64,
    pub dirs: u64,
    /// Entries whose metadata or listing could not be read.
    pub unreadable: u64,
    /// Some subtree sat below `max_depth` and was not descended.
    pub depth_truncated: bool,
}

/// Item in the work queue: (directory_path, depth below the root).
type WorkItem = (PathBuf, usize);

#[derive(Default)]
struct Totals {
    bytes: AtomicU64,
    files: AtomicU64,
    dirs: AtomicU64,
    unreadable: AtomicU64,
    truncated: AtomicBool,
}

/// Sizes directory trees with a bounded worker pool.
#[derive(Debug, Clone, Copy)]
pub struct TreeSizer {
    parallelism: usize,
    max_depth: usize,
}

impl TreeSizer {
    #[must_use]
    pub fn new(parallelism: usize, max_depth: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            max_depth,
        }
    }

    /// Measure everything below `root`.
    pub fn measure(&self, root: &Path) -> TreeMeasure {
        let totals = Totals::default();
        let in_flight = AtomicUsize::new(1);
        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();
        let _ = work_tx.send((root.to_path_buf(), 0));

        thread::scope(|scope| {
            // The calling thread is always one of the workers.
            for idx in 1..self.parallelism {
                let work_rx = work_rx.clone();
                let work_tx = work_tx.clone();
                let totals = &totals;
                let in_flight = &in_flight;
                let max_depth = self.max_depth;
                let spawned = thread::Builder::new()
                    .name(format!("stb-sizer-{idx}"))
                    .spawn_scoped(scope, move || {
                        sizer_thread(&work_rx, &work_tx, totals, in_flight, root, max_depth);
                    });
                if let Err(err) = spawned {
                    tracing::debug!(error = %err, "sizer worker spawn failed; continuing with fewer");
                }
            }
            sizer_thread(
                &work_rx,
                &work_tx,
                &totals,
                &in_flight,
                root,
                self.max_depth,
            );
        });

        TreeMeasure {
            bytes: totals.bytes.load(Ordering::Relaxed),
            files: totals.files.load(Ordering::Relaxed),
            dirs: totals.dirs.load(Ordering::Relaxed),
            unreadable: totals.unreadable.load(Ordering::Relaxed),
            depth_truncated: totals.truncated.load(Ordering::Relaxed),
        }
    }
}

fn sizer_thread(
    work_rx: &channel::Receiver<WorkItem>,
    work_tx: &channel::Sender<WorkItem>,
    totals: &Totals,
    in_flight: &AtomicUsize,
    root: &Path,
    max_depth: usize,
) {
    loop {
        match work_rx.recv_timeout(Duration::from_millis(20)) {
            Ok((dir, depth)) => {
                process_directory(&dir, depth, work_tx, totals, in_flight, root, max_depth);
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn process_directory(
    dir: &Path,
    depth: usize,
    work_tx: &channel::Sender<WorkItem>,
    totals: &Totals,
    in_flight: &AtomicUsize,
    root: &Path,
    max_depth: usize,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(path = %dir.display(), error = %err, "cannot list directory; counted as empty");
            totals.unreadable.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    for entry_result in entries {
        let Ok(entry) = entry_result else {
            totals.unreadable.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        let Ok(file_type) = entry.file_type() else {
            totals.unreadable.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        if file_type.is_symlink() {
            continue;
        }

        if file_type.is_dir() {
            totals.dirs.fetch_add(1, Ordering::Relaxed);
            if depth + 1 > max_depth {
                if !totals.truncated.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        root = %root.display(),
                        path = %entry.path().display(),
                        max_depth,
                        "release tree deeper than max depth; size is a lower bound"
                    );
                }
                continue;
            }
            in_flight.fetch_add(1, Ordering::AcqRel);
            if work_tx.send((entry.path(), depth + 1)).is_err() {
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.is_file() => {
                totals.files.fetch_add(1, Ordering::Relaxed);
                totals.bytes.fetch_add(meta.len(), Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(path = %entry.path().display(), error = %err, "cannot stat entry; counted as zero");
                totals.unreadable.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
