//! Scan results: one top-level release directory and how it was discovered.

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::core::errors::{Result, StbError};
use crate::core::topology::Label;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Whether a scan honours the per-section `dated` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatedPolicy {
    /// Every immediate subdirectory is a candidate.
    Ignore,
    /// Sections marked `dated` only yield numeric names old enough to be settled.
    Respect,
}

/// One release directory, re-derived from the filesystem whenever needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Release {
    pub path: PathBuf,
    pub name: String,
    pub section_path: PathBuf,
    pub size_bytes: u64,
    #[serde(rename = "modified_at", serialize_with = "serialize_system_time")]
    pub modified: SystemTime,
    pub owner_label: Label,
}

impl Release {
    /// Size rounded up to whole gigabytes, the unit capacity checks use.
    #[must_use]
    pub const fn size_gb_ceil(&self) -> u64 {
        self.size_bytes.div_ceil(GIB)
    }

    /// Size in whole megabytes, as reported on announce lines.
    #[must_use]
    pub const fn size_mb(&self) -> u64 {
        self.size_bytes / MIB
    }

    /// Modification time as Unix seconds; pre-epoch times are negative.
    #[must_use]
    pub fn modified_unix_secs(&self) -> i64 {
        system_time_to_unix(self.modified)
    }

    #[must_use]
    pub fn modified_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.modified)
    }

    /// The directory currently has no entries at all.
    pub fn is_empty_dir(&self) -> Result<bool> {
        let mut entries = fs::read_dir(&self.path).map_err(|e| StbError::io(&self.path, e))?;
        Ok(entries.next().is_none())
    }

    /// Whether this release still exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }
}

/// Convert a `SystemTime` to signed Unix seconds.
#[must_use]
pub fn system_time_to_unix(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_secs()).map_or(i64::MIN, |secs| -secs),
    }
}

fn serialize_system_time<S: Serializer>(
    time: &SystemTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&DateTime::<Utc>::from(*time).to_rfc3339())
}
