//! Archive placement: capacity-first destination choice and the verified
//! copy-then-delete move.
//!
//! The destination device is the archive device with the most free space,
//! regardless of which device hosts the release's label; the label only has
//! to have an archive tier at all. On that device the release goes into the
//! section carrying its label when there is one, else the device's first
//! section.
//!
//! Move sequence: wipe any stale destination -> copy -> shallow count check
//! -> restore mtime -> delete source. A count mismatch stops before the
//! source is touched.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::errors::{Result, StbError};
use crate::core::paths::release_path;
use crate::core::topology::{ArchiveTier, DeviceGroup, DiskSection};
use crate::placement::PlacementContext;
use crate::placement::reclaim::ArchiveCapacityReclaimer;
use crate::scanner::release::Release;

/// A checked decision about where one release will go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPlan {
    /// Incoming section the release was found in.
    pub source: DiskSection,
    /// Archive section that will receive it.
    pub dest: DiskSection,
    /// Free space on the destination device when the plan was made.
    pub dest_free_gb: u64,
    /// Release size plus buffer, rounded up.
    pub required_gb: u64,
}

impl PlacementPlan {
    #[must_use]
    pub fn dest_release_path(&self, release: &Release) -> PathBuf {
        release_path(&self.dest.path, &release.name)
    }
}

/// Places incoming releases into the archive tier and keeps that tier within
/// its threshold.
#[derive(Debug, Clone)]
pub struct ArchiveSectionManager {
    ctx: Arc<PlacementContext>,
    reclaimer: ArchiveCapacityReclaimer,
}

impl ArchiveSectionManager {
    #[must_use]
    pub fn new(ctx: Arc<PlacementContext>) -> Self {
        let reclaimer = ArchiveCapacityReclaimer::new(Arc::clone(&ctx));
        Self { ctx, reclaimer }
    }

    /// Plan and execute a move. False on any failure; the source is then
    /// still in place.
    pub fn place(&self, release: &Release) -> bool {
        match self.try_place(release) {
            Ok(plan) => {
                tracing::info!(
                    release = %release.name,
                    dest = %plan.dest.path.display(),
                    "release placed"
                );
                true
            }
            Err(err) => {
                log_failure(release, &err);
                false
            }
        }
    }

    /// [`Self::place`] with the failure reason preserved.
    pub fn try_place(&self, release: &Release) -> Result<PlacementPlan> {
        let plan = self.plan_placement(release)?;
        self.execute(release, &plan)?;
        Ok(plan)
    }

    /// Archive-tier upkeep with no release in hand.
    pub fn reclaim(&self) -> bool {
        self.reclaimer.reclaim_all()
    }

    /// Resolve source and destination and check capacity, without moving bytes.
    pub fn plan_placement(&self, release: &Release) -> Result<PlacementPlan> {
        let topology = &self.ctx.topology;
        let source = topology
            .incoming_by_path(&release.section_path)
            .ok_or_else(|| StbError::Placement {
                release: release.name.clone(),
                reason: format!(
                    "{} is not a configured incoming section",
                    release.section_path.display()
                ),
            })?
            .clone();

        let label_targets = match topology.archive_tier(&release.owner_label) {
            Ok(ArchiveTier::Targets(targets)) => targets,
            Ok(ArchiveTier::DeleteOnly) => {
                return Err(StbError::Placement {
                    release: release.name.clone(),
                    reason: format!("label {} has no archive tier", release.owner_label),
                });
            }
            Err(StbError::Placement { reason, .. }) => {
                return Err(StbError::Placement {
                    release: release.name.clone(),
                    reason,
                });
            }
            Err(err) => return Err(err),
        };

        let (group, dest_free_gb) = self.most_free_device(release)?;
        let required_gb = release
            .size_gb_ceil()
            .saturating_add(self.ctx.limits.buffer_gb);
        if dest_free_gb < required_gb {
            return Err(StbError::Capacity {
                release: release.name.clone(),
                required_gb,
                best_free_gb: dest_free_gb,
            });
        }

        let group_sections = topology.group_sections(group);
        let dest = label_targets
            .iter()
            .find(|section| section.device == group.device)
            .copied()
            .or_else(|| group_sections.first().copied())
            .ok_or_else(|| StbError::Placement {
                release: release.name.clone(),
                reason: format!("device {} has no archive section", group.device),
            })?
            .clone();

        tracing::debug!(
            release = %release.name,
            dest = %dest.path.display(),
            device = %group.device,
            dest_free_gb,
            required_gb,
            "placement planned"
        );
        Ok(PlacementPlan {
            source,
            dest,
            dest_free_gb,
            required_gb,
        })
    }

    /// Probe every archive device and keep the first one with the most room.
    /// Devices whose probe fails are left out of the comparison.
    fn most_free_device(&self, release: &Release) -> Result<(&DeviceGroup, u64)> {
        let mut best: Option<(&DeviceGroup, u64)> = None;
        let mut last_error = None;
        for group in self.ctx.topology.archive_devices() {
            match self.ctx.free_gb(&group.device) {
                Ok(free) => {
                    if best.is_none_or(|(_, best_free)| free > best_free) {
                        best = Some((group, free));
                    }
                }
                Err(err) => {
                    tracing::warn!(device = %group.device, error = %err, "archive device left out of placement");
                    last_error = Some(err);
                }
            }
        }
        best.ok_or_else(|| {
            last_error.unwrap_or_else(|| StbError::Placement {
                release: release.name.clone(),
                reason: "no archive devices configured".to_string(),
            })
        })
    }

    /// Run the move sequence for a planned placement.
    pub fn execute(&self, release: &Release, plan: &PlacementPlan) -> Result<()> {
        let dest_release = plan.dest_release_path(release);
        if self.ctx.dry_run {
            tracing::info!(
                dry_run = true,
                source = %release.path.display(),
                dest = %dest_release.display(),
                "would move release"
            );
            return Ok(());
        }

        let sync = &self.ctx.sync;
        sync.wipe(&plan.dest.path, &release.name)?;
        sync.copy(&release.section_path, &release.name, &plan.dest.path)?;
        if !sync.counts_match(&release.path, &dest_release)? {
            return Err(StbError::Integrity {
                source_path: release.path.clone(),
                dest_path: dest_release,
            });
        }
        sync.restore_timestamp(&dest_release, release.modified_unix_secs())?;
        sync.wipe(&release.section_path, &release.name)?;
        tracing::debug!(
            source = %release.path.display(),
            dest = %dest_release.display(),
            "release moved"
        );
        Ok(())
    }
}

fn log_failure(release: &Release, err: &StbError) {
    match err {
        StbError::Integrity { .. } => tracing::error!(
            release = %release.path.display(),
            code = err.code(),
            error = %err,
            "copy verification failed; source kept"
        ),
        _ => tracing::warn!(
            release = %release.path.display(),
            code = err.code(),
            retryable = err.is_retryable(),
            error = %err,
            "placement failed; release stays in place"
        ),
    }
}
