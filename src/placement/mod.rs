//! Placement engine: incoming-tier relief, archive placement, archive eviction.
//!
//! Every manager shares one immutable [`PlacementContext`] built at startup;
//! nothing here reads ambient state.

#![allow(missing_docs)]

pub mod archive;
pub mod incoming;
pub mod reclaim;

use std::sync::Arc;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::topology::{DeviceId, Topology};
use crate::logger::announce::{AnnounceEvent, AnnounceLog};
use crate::platform::probe::DiskSpaceProbe;
use crate::platform::sync::SyncExecutor;
use crate::scanner::deletion::ReleaseRemover;
use crate::scanner::release_scanner::ReleaseScanner;

/// Free-space thresholds, all in whole gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Incoming devices below this are relieved.
    pub race_gb: u64,
    /// Archive devices below this are evicted from.
    pub archive_gb: u64,
    /// Headroom a destination must keep on top of the release size.
    pub buffer_gb: u64,
}

impl Limits {
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            race_gb: config.free_space_limit_gb_race,
            archive_gb: config.free_space_limit_gb_archive,
            buffer_gb: config.archive_buffer_gb,
        }
    }
}

/// Collaborators and settings shared by the managers.
pub struct PlacementContext {
    pub topology: Arc<Topology>,
    pub limits: Limits,
    pub dry_run: bool,
    pub probe: Arc<dyn DiskSpaceProbe>,
    pub sync: Arc<dyn SyncExecutor>,
    pub scanner: ReleaseScanner,
    pub remover: ReleaseRemover,
    pub announcer: Arc<AnnounceLog>,
}

impl PlacementContext {
    /// Wire a context from config. `dry_run` is OR-ed with `config.debug`.
    pub fn from_config(
        config: &Config,
        dry_run: bool,
        probe: Arc<dyn DiskSpaceProbe>,
        sync: Arc<dyn SyncExecutor>,
        announcer: Arc<AnnounceLog>,
    ) -> Result<Self> {
        let dry_run = dry_run || config.debug;
        Ok(Self {
            topology: Arc::new(Topology::from_config(config)?),
            limits: Limits::from_config(config),
            dry_run,
            probe,
            sync,
            scanner: ReleaseScanner::new(&config.scanner)?,
            remover: ReleaseRemover::new(config.scanner.max_depth, dry_run),
            announcer,
        })
    }

    /// Fresh free-space reading in GB.
    pub fn free_gb(&self, device: &DeviceId) -> Result<u64> {
        self.probe.free_space(device).map(|reading| reading.free_gb)
    }

    /// Emit an announce line, or only log it when running dry.
    pub fn announce(&self, event: &AnnounceEvent) {
        let line = event.line();
        if self.dry_run {
            tracing::info!(dry_run = true, line = %line, "would announce");
            return;
        }
        tracing::info!(tag = event.tag(), line = %line, "announce");
        self.announcer.announce(event);
    }
}

impl std::fmt::Debug for PlacementContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementContext")
            .field("limits", &self.limits)
            .field("dry_run", &self.dry_run)
            .field("incoming_sections", &self.topology.incoming().len())
            .field("archive_sections", &self.topology.archive().len())
            .field("announce_log", &self.announcer.path())
            .finish_non_exhaustive()
    }
}
