//! Round loop: every round visits each incoming section, then the archive
//! tier, then sleeps for the configured interval.
//!
//! A panic anywhere inside a round is caught, logged, and followed by a fixed
//! retry delay; the process only stops on SIGTERM/SIGINT. SIGUSR1 cuts the
//! current wait short.

#![allow(missing_docs)]

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::signals::{SignalHandler, WaitOutcome};
use crate::logger::announce::AnnounceLog;
use crate::placement::PlacementContext;
use crate::placement::archive::ArchiveSectionManager;
use crate::placement::incoming::IncomingSectionManager;
use crate::platform::probe::{CommandDiskProbe, DiskSpaceProbe};
use crate::platform::sync::{SyncExecutor, executor_from_config};

/// Wait after a round that blew up, before starting a fresh one.
pub const ERROR_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Outcome of one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub sections_visited: usize,
    pub actions_taken: usize,
    pub probe_failures: usize,
    pub section_errors: usize,
    pub archive_cleanup: bool,
    pub dry_run: bool,
    pub duration_ms: u64,
}

/// Drives the managers round after round.
#[derive(Debug)]
pub struct Orchestrator {
    ctx: Arc<PlacementContext>,
    incoming: IncomingSectionManager,
    archive: ArchiveSectionManager,
    wait_time: Duration,
    max_passes: usize,
}

impl Orchestrator {
    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let probe: Arc<dyn DiskSpaceProbe> = Arc::new(CommandDiskProbe::new(&config.probe));
        let sync = executor_from_config(&config.sync, config.scanner.max_depth);
        let announcer = Arc::new(AnnounceLog::open(&config.paths.announce_log));
        Self::with_collaborators(config, dry_run, probe, sync, announcer)
    }

    /// Same as [`Self::from_config`] with explicit collaborators.
    pub fn with_collaborators(
        config: &Config,
        dry_run: bool,
        probe: Arc<dyn DiskSpaceProbe>,
        sync: Arc<dyn SyncExecutor>,
        announcer: Arc<AnnounceLog>,
    ) -> Result<Self> {
        let ctx = Arc::new(PlacementContext::from_config(
            config, dry_run, probe, sync, announcer,
        )?);
        let archive = ArchiveSectionManager::new(Arc::clone(&ctx));
        let incoming = IncomingSectionManager::new(Arc::clone(&ctx), archive.clone());
        Ok(Self {
            ctx,
            incoming,
            archive,
            wait_time: Duration::from_secs(config.wait_time_minutes.saturating_mul(60)),
            max_passes: config.scanner.max_passes_per_section.max(1),
        })
    }

    #[must_use]
    pub fn context(&self) -> &PlacementContext {
        &self.ctx
    }

    #[must_use]
    pub const fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// One pass over all incoming sections, then archive upkeep.
    pub fn run_round(&self) -> RoundReport {
        let start = Instant::now();
        let dry_run = self.ctx.dry_run;
        let passes = if dry_run { 1 } else { self.max_passes };
        let mut report = RoundReport {
            dry_run,
            ..RoundReport::default()
        };

        for section in self.ctx.topology.incoming() {
            report.sections_visited += 1;
            for _ in 0..passes {
                match self.incoming.try_manage(section) {
                    Ok(outcome) => {
                        if outcome.acted() {
                            report.actions_taken += 1;
                        }
                        if !outcome.wants_another_pass() {
                            break;
                        }
                    }
                    Err(err) => {
                        if err.is_section_local() {
                            report.probe_failures += 1;
                        } else {
                            report.section_errors += 1;
                        }
                        tracing::warn!(
                            section = %section.path.display(),
                            code = err.code(),
                            retryable = err.is_retryable(),
                            error = %err,
                            "incoming section abandoned for this round"
                        );
                        break;
                    }
                }
            }
        }

        report.archive_cleanup = self.archive.reclaim();
        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            sections = report.sections_visited,
            actions = report.actions_taken,
            probe_failures = report.probe_failures,
            section_errors = report.section_errors,
            archive_cleanup = report.archive_cleanup,
            dry_run = report.dry_run,
            duration_ms = report.duration_ms,
            "round complete"
        );
        report
    }

    /// [`Self::run_round`] with panics contained. `None` means the round died.
    pub fn guarded_round(&self) -> Option<RoundReport> {
        match catch_unwind(AssertUnwindSafe(|| self.run_round())) {
            Ok(report) => Some(report),
            Err(payload) => {
                tracing::error!(
                    panic = %panic_message(payload.as_ref()),
                    retry_in_secs = ERROR_RETRY_DELAY.as_secs(),
                    "round aborted by unexpected failure"
                );
                None
            }
        }
    }

    /// Run rounds until shutdown is requested.
    pub fn run(&self, signals: &SignalHandler) {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            incoming_sections = self.ctx.topology.incoming().len(),
            archive_sections = self.ctx.topology.archive().len(),
            wait_secs = self.wait_time.as_secs(),
            dry_run = self.ctx.dry_run,
            "daemon started"
        );

        loop {
            if signals.should_shutdown() {
                break;
            }
            let delay = match self.guarded_round() {
                Some(_) => self.wait_time,
                None => ERROR_RETRY_DELAY,
            };
            match signals.wait(delay) {
                WaitOutcome::Shutdown => break,
                WaitOutcome::RoundRequested => {
                    tracing::info!("round requested by signal");
                }
                WaitOutcome::Elapsed => {}
            }
        }
        tracing::info!("shutdown requested; daemon stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::DeviceId;
    use crate::platform::probe::{FreeSpaceReading, ScriptedDiskProbe};
    use crate::platform::sync::NativeSyncExecutor;
    use filetime::FileTime;
    use std::fs;
    use std::path::Path;
    use std::thread;
    use tempfile::TempDir;

    fn config(root: &Path) -> Config {
        Config::from_toml_str(&format!(
            r#"
free_space_limit_gb_race = 100
free_space_limit_gb_archive = 50
archive_buffer_gb = 1
wait_time_minutes = 1

[[incoming_disks_sections]]
path = "{root}/race/movies"
device = "/dev/race"
section = "movies"

[[archive_disks_sections]]
path = "{root}/arch/movies"
device = "/dev/arch"
section = "movies"
"#,
            root = root.display()
        ))
        .unwrap()
    }

    fn orchestrator(tmp: &TempDir, probe: Arc<dyn DiskSpaceProbe>, dry_run: bool) -> Orchestrator {
        Orchestrator::with_collaborators(
            &config(tmp.path()),
            dry_run,
            probe,
            Arc::new(NativeSyncExecutor::new(16)),
            Arc::new(AnnounceLog::open(&tmp.path().join("announce.log"))),
        )
        .unwrap()
    }

    fn release(dir: &Path, unix_secs: i64) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("a.bin"), b"abc").unwrap();
        filetime::set_file_mtime(dir, FileTime::from_unix_time(unix_secs, 0)).unwrap();
    }

    #[test]
    fn round_repeats_until_section_is_satisfied() {
        let tmp = TempDir::new().unwrap();
        release(&tmp.path().join("race/movies/One"), 10);
        release(&tmp.path().join("race/movies/Two"), 20);
        release(&tmp.path().join("race/movies/Three"), 30);
        let probe = ScriptedDiskProbe::new()
            .with("/dev/race", &[10, 50, 50, 120])
            .with("/dev/arch", &[500]);

        let report = orchestrator(&tmp, Arc::new(probe), false).run_round();
        assert_eq!(report.sections_visited, 1);
        assert_eq!(report.actions_taken, 2);
        assert!(!report.archive_cleanup);
        assert!(tmp.path().join("arch/movies/One").exists());
        assert!(tmp.path().join("arch/movies/Two").exists());
        assert!(tmp.path().join("race/movies/Three").exists());
    }

    #[test]
    fn dry_run_round_makes_one_pass() {
        let tmp = TempDir::new().unwrap();
        release(&tmp.path().join("race/movies/One"), 10);
        let probe = ScriptedDiskProbe::new()
            .with("/dev/race", &[10])
            .with("/dev/arch", &[500]);
        let report = orchestrator(&tmp, Arc::new(probe), true).run_round();
        assert!(report.dry_run);
        assert_eq!(report.actions_taken, 1);
        assert!(tmp.path().join("race/movies/One").exists());
    }

    #[test]
    fn probe_failures_are_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let probe = ScriptedDiskProbe::new().with("/dev/arch", &[500]);
        let report = orchestrator(&tmp, Arc::new(probe), false).run_round();
        assert_eq!(report.probe_failures, 1);
        assert_eq!(report.actions_taken, 0);
    }

    struct PanickingProbe;

    impl DiskSpaceProbe for PanickingProbe {
        fn free_space(&self, _device: &DeviceId) -> Result<FreeSpaceReading> {
            panic!("probe exploded");
        }
    }

    #[test]
    fn panics_inside_a_round_are_contained() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Arc::new(PanickingProbe), false);
        assert!(orch.guarded_round().is_none());
    }

    #[test]
    fn run_exits_on_shutdown_request() {
        let tmp = TempDir::new().unwrap();
        let probe = ScriptedDiskProbe::new()
            .with("/dev/race", &[500])
            .with("/dev/arch", &[500]);
        let orch = orchestrator(&tmp, Arc::new(probe), false);
        let signals = SignalHandler::detached();
        let remote = signals.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.request_shutdown();
        });
        let start = Instant::now();
        orch.run(&signals);
        stopper.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }
}
