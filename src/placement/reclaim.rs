//! Archive eviction: bring every archive device back above its threshold by
//! deleting the oldest archived releases on that device.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::topology::DeviceGroup;
use crate::logger::announce::AnnounceEvent;
use crate::placement::PlacementContext;
use crate::scanner::release::DatedPolicy;

/// Per-device eviction loop.
#[derive(Debug, Clone)]
pub struct ArchiveCapacityReclaimer {
    ctx: Arc<PlacementContext>,
}

impl ArchiveCapacityReclaimer {
    #[must_use]
    pub const fn new(ctx: Arc<PlacementContext>) -> Self {
        Self { ctx }
    }

    /// Visit every archive device; true when at least one release was evicted.
    pub fn reclaim_all(&self) -> bool {
        let mut performed = false;
        for group in self.ctx.topology.archive_devices() {
            performed |= self.reclaim_device(group) > 0;
        }
        performed
    }

    /// Evict from one device until it meets the archive threshold. Returns the
    /// number of releases removed (or that would be, when running dry).
    fn reclaim_device(&self, group: &DeviceGroup) -> usize {
        let limit = self.ctx.limits.archive_gb;
        let mut free = match self.ctx.free_gb(&group.device) {
            Ok(free) => free,
            Err(err) => {
                tracing::warn!(device = %group.device, error = %err, "skipping archive device");
                return 0;
            }
        };
        if free >= limit {
            tracing::debug!(device = %group.device, free_gb = free, limit_gb = limit, "archive device healthy");
            return 0;
        }

        let sections = self.ctx.topology.group_sections(group);
        let mut evicted = 0;
        // Each iteration removes one release or stops, so the loop is bounded
        // by the number of releases on the device.
        loop {
            let Some(release) = self
                .ctx
                .scanner
                .find_oldest(sections.iter().copied(), DatedPolicy::Respect)
            else {
                tracing::info!(
                    device = %group.device,
                    free_gb = free,
                    limit_gb = limit,
                    "no evictable releases left; device stays below threshold"
                );
                break;
            };

            self.ctx.announce(&AnnounceEvent::EvictArchive {
                name: release.name.clone(),
                size_mb: release.size_mb(),
                label: release.owner_label.clone(),
            });
            if let Err(err) = self.ctx.remover.remove(&release.path) {
                tracing::error!(
                    release = %release.path.display(),
                    code = err.code(),
                    error = %err,
                    "archive eviction failed"
                );
                break;
            }
            evicted += 1;
            tracing::info!(
                device = %group.device,
                release = %release.path.display(),
                size_bytes = release.size_bytes,
                dry_run = self.ctx.dry_run,
                "evicted archived release"
            );

            if self.ctx.dry_run {
                break;
            }
            if release.exists() {
                tracing::error!(release = %release.path.display(), "release survived eviction; giving up on device");
                break;
            }

            free = match self.ctx.free_gb(&group.device) {
                Ok(free) => free,
                Err(err) => {
                    tracing::warn!(device = %group.device, error = %err, "re-probe failed after eviction");
                    break;
                }
            };
            if free >= limit {
                tracing::info!(device = %group.device, free_gb = free, evicted, "archive device back above threshold");
                break;
            }
        }
        evicted
    }
}
