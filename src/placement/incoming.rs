//! Incoming-tier relief: when a section's device runs low, act on the oldest
//! release anywhere in the incoming tier.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::errors::Result;
use crate::core::topology::{ArchiveTier, DiskSection};
use crate::logger::announce::AnnounceEvent;
use crate::placement::PlacementContext;
use crate::placement::archive::ArchiveSectionManager;
use crate::scanner::release::{DatedPolicy, Release};

/// What one `manage` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageOutcome {
    /// The section's device already meets the race threshold.
    AboveThreshold,
    /// Nothing in the incoming tier is eligible.
    NoCandidate,
    /// A release was deleted or migrated; `satisfied` is the re-probe verdict.
    Acted { satisfied: bool },
}

impl ManageOutcome {
    #[must_use]
    pub const fn acted(self) -> bool {
        matches!(self, Self::Acted { .. })
    }

    /// Another pass on the same section could still help.
    #[must_use]
    pub const fn wants_another_pass(self) -> bool {
        matches!(self, Self::Acted { satisfied: false })
    }
}

/// Relieves incoming sections one release at a time.
#[derive(Debug, Clone)]
pub struct IncomingSectionManager {
    ctx: Arc<PlacementContext>,
    archive: ArchiveSectionManager,
}

impl IncomingSectionManager {
    #[must_use]
    pub const fn new(ctx: Arc<PlacementContext>, archive: ArchiveSectionManager) -> Self {
        Self { ctx, archive }
    }

    /// True when a release was deleted or migrated. Failures are logged and
    /// reported as no action; the release is rediscovered next round.
    pub fn manage(&self, section: &DiskSection) -> bool {
        match self.try_manage(section) {
            Ok(outcome) => outcome.acted(),
            Err(err) => {
                tracing::warn!(
                    section = %section.path.display(),
                    code = err.code(),
                    error = %err,
                    "incoming section pass abandoned"
                );
                false
            }
        }
    }

    /// One decision for `section`. `section` only picks which device is
    /// checked; the release acted on is the oldest across the whole tier.
    pub fn try_manage(&self, section: &DiskSection) -> Result<ManageOutcome> {
        let limit = self.ctx.limits.race_gb;
        let free = self.ctx.free_gb(&section.device)?;
        if free >= limit {
            tracing::debug!(section = %section.path.display(), free_gb = free, limit_gb = limit, "incoming section healthy");
            return Ok(ManageOutcome::AboveThreshold);
        }

        let Some(release) = self
            .ctx
            .scanner
            .find_oldest(self.ctx.topology.incoming(), DatedPolicy::Ignore)
        else {
            tracing::info!(
                section = %section.path.display(),
                free_gb = free,
                "below threshold but no incoming release to act on"
            );
            return Ok(ManageOutcome::NoCandidate);
        };

        if release.is_empty_dir()? {
            self.ctx.remover.remove(&release.path)?;
            tracing::info!(release = %release.path.display(), dry_run = self.ctx.dry_run, "removed empty release");
            return Ok(self.recheck(section));
        }

        match self.ctx.topology.archive_tier(&release.owner_label)? {
            ArchiveTier::Targets(_) => self.migrate(section, free, &release)?,
            ArchiveTier::DeleteOnly => self.delete(free, &release)?,
        }
        Ok(self.recheck(section))
    }

    fn migrate(&self, section: &DiskSection, free: u64, release: &Release) -> Result<()> {
        let plan = self.archive.plan_placement(release)?;
        let source_free_gb = if plan.source.device == section.device {
            free
        } else {
            self.ctx.free_gb(&plan.source.device)?
        };
        self.ctx.announce(&AnnounceEvent::Migrate {
            name: release.name.clone(),
            size_mb: release.size_mb(),
            source_free_gb,
            dest_path: plan.dest.path.clone(),
            dest_free_gb: plan.dest_free_gb,
            label: release.owner_label.clone(),
        });
        self.archive.execute(release, &plan)?;
        tracing::info!(
            release = %release.name,
            from = %release.section_path.display(),
            to = %plan.dest.path.display(),
            size_bytes = release.size_bytes,
            dry_run = self.ctx.dry_run,
            "migrated release"
        );
        Ok(())
    }

    fn delete(&self, free: u64, release: &Release) -> Result<()> {
        self.ctx.announce(&AnnounceEvent::DeleteIncoming {
            name: release.name.clone(),
            size_mb: release.size_mb(),
            label: release.owner_label.clone(),
            free_gb: free,
        });
        self.ctx.remover.remove(&release.path)?;
        tracing::info!(
            release = %release.path.display(),
            size_bytes = release.size_bytes,
            dry_run = self.ctx.dry_run,
            "deleted release without archive tier"
        );
        Ok(())
    }

    /// Re-probe after acting. A failed probe counts as still below threshold.
    fn recheck(&self, section: &DiskSection) -> ManageOutcome {
        let satisfied = match self.ctx.free_gb(&section.device) {
            Ok(free) => free >= self.ctx.limits.race_gb,
            Err(err) => {
                tracing::warn!(device = %section.device, error = %err, "re-probe failed after action");
                false
            }
        };
        ManageOutcome::Acted { satisfied }
    }
}
