//! Globally-oldest release selection across a set of sections.
//!
//! Each section's immediate subdirectories are listed and ordered by
//! `(modified, name)`; the section heads are then compared and the first
//! section to reach the minimum timestamp wins. Only the winner is sized,
//! since size never affects which release is chosen.

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use regex::Regex;

use crate::core::config::ScannerConfig;
use crate::core::errors::{Result, StbError};
use crate::core::topology::DiskSection;
use crate::scanner::release::{DatedPolicy, Release};
use crate::scanner::walker::TreeSizer;

/// Names eligible in `dated` sections.
pub const DATED_PATTERN: &str = r"^[0-9]+$";

#[derive(Debug, Clone)]
struct Candidate<'a> {
    section: &'a DiskSection,
    name: String,
    path: PathBuf,
    modified: SystemTime,
}

/// Read-only release discovery.
#[derive(Debug, Clone)]
pub struct ReleaseScanner {
    sizer: TreeSizer,
    dated_min_age: Duration,
    dated_pattern: Regex,
}

impl ReleaseScanner {
    pub fn new(config: &ScannerConfig) -> Result<Self> {
        let dated_pattern = Regex::new(DATED_PATTERN).map_err(|e| StbError::Runtime {
            details: format!("dated pattern failed to compile: {e}"),
        })?;
        Ok(Self {
            sizer: TreeSizer::new(config.parallelism, config.max_depth),
            dated_min_age: Duration::from_secs(config.dated_min_age_hours.saturating_mul(3600)),
            dated_pattern,
        })
    }

    /// The oldest release across `sections`, or `None` when nothing qualifies.
    pub fn find_oldest<'a, I>(&self, sections: I, policy: DatedPolicy) -> Option<Release>
    where
        I: IntoIterator<Item = &'a DiskSection>,
    {
        self.find_oldest_at(sections, policy, SystemTime::now())
    }

    /// Same as [`Self::find_oldest`], with the dated-age cutoff measured from `now`.
    pub fn find_oldest_at<'a, I>(
        &self,
        sections: I,
        policy: DatedPolicy,
        now: SystemTime,
    ) -> Option<Release>
    where
        I: IntoIterator<Item = &'a DiskSection>,
    {
        let mut best: Option<Candidate<'a>> = None;
        for section in sections {
            let dated = policy == DatedPolicy::Respect && section.dated;
            let Some(head) = self.section_oldest(section, dated, now) else {
                continue;
            };
            let replace = best
                .as_ref()
                .is_none_or(|current| head.modified < current.modified);
            if replace {
                best = Some(head);
            }
        }

        let winner = best?;
        let measure = self.sizer.measure(&winner.path);
        tracing::debug!(
            release = %winner.name,
            section = %winner.section.path.display(),
            size_bytes = measure.bytes,
            unreadable = measure.unreadable,
            "oldest release selected"
        );
        Some(Release {
            path: winner.path,
            name: winner.name,
            section_path: winner.section.path.clone(),
            size_bytes: measure.bytes,
            modified: winner.modified,
            owner_label: winner.section.label.clone(),
        })
    }

    fn section_oldest<'a>(
        &self,
        section: &'a DiskSection,
        dated: bool,
        now: SystemTime,
    ) -> Option<Candidate<'a>> {
        let entries = match fs::read_dir(&section.path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    section = %section.path.display(),
                    label = %section.label,
                    error = %err,
                    "cannot list section; skipping it this round"
                );
                return None;
            }
        };

        let mut candidates: Vec<Candidate<'a>> = Vec::new();
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::debug!(path = %entry.path().display(), "skipping non-UTF-8 release name");
                continue;
            };
            if dated && !self.dated_pattern.is_match(&name) {
                continue;
            }
            let modified = match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    tracing::debug!(path = %entry.path().display(), error = %err, "cannot read mtime");
                    continue;
                }
            };
            if dated && !self.is_settled(modified, now) {
                continue;
            }
            candidates.push(Candidate {
                section,
                path: entry.path(),
                name,
                modified,
            });
        }

        candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        candidates.into_iter().next()
    }

    fn is_settled(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .is_ok_and(|age| age >= self.dated_min_age)
    }
}
