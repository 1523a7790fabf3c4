//! Announce log: one positional line per migration or deletion, tailed by an
//! external notification bot.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! tailer never sees interleaved partial lines. Degradation chain:
//! 1. Primary file path (append)
//! 2. stderr with `[STB-ANNOUNCE]` prefix
//! 3. Silent discard (the daemon never fails because the bot log is unwritable)

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::topology::Label;

/// Events the bot understands, keyed by their leading tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// `TSM`: a release moved from the incoming to the archive tier.
    Migrate {
        name: String,
        size_mb: u64,
        source_free_gb: u64,
        dest_path: PathBuf,
        dest_free_gb: u64,
        label: Label,
    },
    /// `TSD`: a release deleted from the incoming tier (no archive tier for it).
    DeleteIncoming {
        name: String,
        size_mb: u64,
        label: Label,
        free_gb: u64,
    },
    /// `TDELA`: a release evicted from the archive tier.
    EvictArchive {
        name: String,
        size_mb: u64,
        label: Label,
    },
}

impl AnnounceEvent {
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Migrate { .. } => "TSM",
            Self::DeleteIncoming { .. } => "TSD",
            Self::EvictArchive { .. } => "TDELA",
        }
    }

    /// The line as consumers parse it, without the trailing newline.
    #[must_use]
    pub fn line(&self) -> String {
        let mut out = String::from(self.tag());
        match self {
            Self::Migrate {
                name,
                size_mb,
                source_free_gb,
                dest_path,
                dest_free_gb,
                label,
            } => {
                let _ = write!(
                    out,
                    " {} {size_mb} {source_free_gb} {} {dest_free_gb} {}",
                    quoted(name),
                    quoted(&dest_path.to_string_lossy()),
                    quoted(label.as_str()),
                );
            }
            Self::DeleteIncoming {
                name,
                size_mb,
                label,
                free_gb,
            } => {
                let _ = write!(
                    out,
                    " {} {size_mb} {} {free_gb} {}",
                    quoted(name),
                    quoted(label.as_str()),
                    quoted(label.as_str()),
                );
            }
            Self::EvictArchive {
                name,
                size_mb,
                label,
            } => {
                let _ = write!(out, " {} {size_mb} {}", quoted(name), quoted(label.as_str()));
            }
        }
        out
    }
}

/// Double-quote a field so it stays one token on one physical line:
/// backslash and quote are backslash-escaped, control characters become
/// `\n`, `\r`, `\t` or `\xNN`.
fn quoted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Degradation state of the announce writer.
#[derive(Debug)]
enum Sink {
    File(File),
    Stderr,
    Discard,
}

/// Append-only announce-log writer, safe to share between threads.
#[derive(Debug)]
pub struct AnnounceLog {
    path: PathBuf,
    sink: Mutex<Sink>,
}

impl AnnounceLog {
    /// Open (creating parents as needed) the announce log at `path`.
    pub fn open(path: &Path) -> Self {
        let sink = match open_append(path) {
            Ok(file) => Sink::File(file),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "announce log unavailable; announcing on stderr"
                );
                Sink::Stderr
            }
        };
        Self {
            path: path.to_path_buf(),
            sink: Mutex::new(sink),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current degradation state.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match *self.sink.lock() {
            Sink::File(_) => "file",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    /// Append one event line.
    pub fn announce(&self, event: &AnnounceEvent) {
        let line = format!("{}\n", event.line());
        let mut sink = self.sink.lock();
        if let Sink::File(file) = &mut *sink {
            match file.write_all(line.as_bytes()) {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %err,
                        "announce log write failed; degrading to stderr"
                    );
                    *sink = Sink::Stderr;
                }
            }
        }
        if matches!(*sink, Sink::Stderr)
            && write!(io::stderr(), "[STB-ANNOUNCE] {line}").is_err()
        {
            *sink = Sink::Discard;
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
