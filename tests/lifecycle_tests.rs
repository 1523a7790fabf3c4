//! Library-level lifecycle scenarios: scanning, placement, eviction and full
//! rounds against temp-dir trees, with scripted free space and the in-process
//! copier.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use storage_tier_balancer::core::config::Config;
use storage_tier_balancer::core::errors::{Result, StbError};
use storage_tier_balancer::core::topology::DiskSection;
use storage_tier_balancer::daemon::loop_main::Orchestrator;
use storage_tier_balancer::logger::announce::AnnounceLog;
use storage_tier_balancer::placement::PlacementContext;
use storage_tier_balancer::placement::archive::ArchiveSectionManager;
use storage_tier_balancer::placement::incoming::IncomingSectionManager;
use storage_tier_balancer::placement::reclaim::ArchiveCapacityReclaimer;
use storage_tier_balancer::platform::probe::{
    DiskSpaceProbe, ScriptedDiskProbe, parse_df_free_gb,
};
use storage_tier_balancer::platform::sync::{NativeSyncExecutor, SyncExecutor};
use storage_tier_balancer::scanner::release::{DatedPolicy, Release};

use common::{make_release, mtime_secs, toml_path};

const MIB: usize = 1024 * 1024;

/// Two incoming sections on separate devices, two archive devices, and a
/// dated news section. Podcasts have no archive tier.
fn config(root: &Path) -> Config {
    let raw = format!(
        r#"
free_space_limit_gb_race = 100
free_space_limit_gb_archive = 25
archive_buffer_gb = 10
wait_time_minutes = 1

[scanner]
parallelism = 2
dated_min_age_hours = 24

[[incoming_disks_sections]]
path = "{root}/race1/movies"
device = "/dev/race1"
section = "movies"

[[incoming_disks_sections]]
path = "{root}/race2/podcasts"
device = "/dev/race2"
section = "podcasts"

[[archive_disks_sections]]
path = "{root}/arch1/movies"
device = "/dev/arch1"
section = "movies"

[[archive_disks_sections]]
path = "{root}/arch1/news"
device = "/dev/arch1"
section = "news"
dated = true

[[archive_disks_sections]]
path = "{root}/arch2/movies"
device = "/dev/arch2"
section = "movies"
"#,
        root = toml_path(root)
    );
    Config::from_toml_str(&raw).expect("valid config")
}

struct World {
    tmp: TempDir,
    probe: Arc<ScriptedDiskProbe>,
    ctx: Arc<PlacementContext>,
}

impl World {
    fn new() -> Self {
        Self::with_sync(Arc::new(NativeSyncExecutor::new(32)), false)
    }

    fn with_sync(sync: Arc<dyn SyncExecutor>, dry_run: bool) -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let probe = Arc::new(ScriptedDiskProbe::new());
        let ctx = Arc::new(
            PlacementContext::from_config(
                &config(tmp.path()),
                dry_run,
                Arc::clone(&probe) as Arc<dyn DiskSpaceProbe>,
                sync,
                Arc::new(AnnounceLog::open(&tmp.path().join("announce.log"))),
            )
            .expect("context"),
        );
        Self { tmp, probe, ctx }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.tmp.path().join(rel)
    }

    fn archive(&self) -> ArchiveSectionManager {
        ArchiveSectionManager::new(Arc::clone(&self.ctx))
    }

    fn incoming(&self) -> IncomingSectionManager {
        IncomingSectionManager::new(Arc::clone(&self.ctx), self.archive())
    }

    fn incoming_section(&self, idx: usize) -> DiskSection {
        self.ctx.topology.incoming()[idx].clone()
    }

    fn oldest_incoming(&self) -> Release {
        self.ctx
            .scanner
            .find_oldest(self.ctx.topology.incoming(), DatedPolicy::Ignore)
            .expect("an incoming release")
    }

    fn announced(&self) -> Vec<String> {
        fs::read_to_string(self.path("announce.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

// ──────────────────── probe contract ────────────────────

#[test]
fn malformed_probe_output_is_an_error_not_a_default() {
    for bad in [
        "",
        "Filesystem 1G-blocks Used Available\n",
        "Filesystem 1G-blocks Used Available\n/dev/sda1 100G 20G\n",
        "Filesystem 1G-blocks Used Available\n/dev/sda1 100G 20G G\n",
        "Filesystem 1G-blocks Used Available\n/dev/sda1 100G 20G -5G\n",
        "Filesystem 1G-blocks Used Available\n/dev/sda1 100G 20G lotsG\n",
    ] {
        assert!(parse_df_free_gb(bad).is_err(), "accepted {bad:?}");
    }
    assert_eq!(
        parse_df_free_gb("Filesystem 1G-blocks Used Available\n/dev/sda1 100G 20G 80G\n"),
        Ok(80)
    );
}

// ──────────────────── scanning ────────────────────

#[test]
fn global_scan_picks_oldest_across_sections() {
    let world = World::new();
    make_release(&world.path("race1/movies/S1.Release"), 10, MIB);
    make_release(&world.path("race2/podcasts/S2.Release"), 5, MIB);

    let oldest = world.oldest_incoming();
    assert_eq!(oldest.name, "S2.Release");
    assert_eq!(oldest.owner_label.as_str(), "podcasts");
    assert_eq!(oldest.modified_unix_secs(), 5);
}

#[test]
fn dated_releases_need_a_day_of_age() {
    let world = World::new();
    let now = SystemTime::now();
    let hours_ago = |h: u64| {
        now.checked_sub(Duration::from_secs(h * 3600))
            .expect("time in range")
    };
    let news: Vec<&DiskSection> = world
        .ctx
        .topology
        .archive()
        .iter()
        .filter(|s| s.dated)
        .collect();

    let young = world.path("arch1/news/20261016");
    make_release(&young, 0, MIB);
    filetime::set_file_mtime(&young, filetime::FileTime::from_system_time(hours_ago(23)))
        .expect("set mtime");
    assert!(
        world
            .ctx
            .scanner
            .find_oldest_at(news.iter().copied(), DatedPolicy::Respect, now)
            .is_none()
    );

    let old = world.path("arch1/news/20261015");
    make_release(&old, 0, MIB);
    filetime::set_file_mtime(&old, filetime::FileTime::from_system_time(hours_ago(25)))
        .expect("set mtime");
    let found = world
        .ctx
        .scanner
        .find_oldest_at(news.iter().copied(), DatedPolicy::Respect, now)
        .expect("25h old dated release is eligible");
    assert_eq!(found.name, "20261015");
}

// ──────────────────── incoming relief ────────────────────

#[test]
fn empty_release_is_deleted_without_migration() {
    let world = World::new();
    world.probe.script("/dev/race1", &[10, 10]);
    world.probe.script("/dev/arch1", &[900]);
    let empty = make_release(&world.path("race1/movies/Empty"), 10, 0);

    assert!(world.incoming().manage(&world.incoming_section(0)));
    assert!(!empty.exists());
    assert_eq!(world.probe.calls("/dev/arch1"), 0);
    assert!(world.announced().is_empty());
}

// ──────────────────── placement ────────────────────

#[test]
fn insufficient_archive_room_leaves_source_in_place() {
    let world = World::new();
    world.probe.script("/dev/arch1", &[10]);
    world.probe.script("/dev/arch2", &[8]);
    let source = make_release(&world.path("race1/movies/Film"), 100, MIB);

    let release = world.oldest_incoming();
    assert!(!world.archive().place(&release));
    assert!(source.join("payload.bin").exists());
    assert!(!world.path("arch1/movies/Film").exists());

    // A second attempt behaves the same way.
    assert!(!world.archive().place(&release));
    assert!(source.join("payload.bin").exists());
}

struct DroppingSync(NativeSyncExecutor);

impl SyncExecutor for DroppingSync {
    fn copy(&self, source_section: &Path, name: &str, dest_section: &Path) -> Result<()> {
        self.0.copy(source_section, name, dest_section)?;
        let dest = dest_section.join(name).join("extra.nfo");
        fs::remove_file(&dest).map_err(|e| StbError::io(&dest, e))
    }

    fn wipe(&self, section: &Path, name: &str) -> Result<()> {
        self.0.wipe(section, name)
    }
}

#[test]
fn count_mismatch_fails_placement_without_data_loss() {
    let world = World::with_sync(Arc::new(DroppingSync(NativeSyncExecutor::new(32))), false);
    world.probe.script("/dev/arch1", &[900]);
    world.probe.script("/dev/arch2", &[100]);
    let source = make_release(&world.path("race1/movies/Film"), 1_234, MIB);
    fs::write(source.join("extra.nfo"), b"info").expect("write nfo");
    common::set_mtime(&source, 1_234);

    let release = world.oldest_incoming();
    assert!(!world.archive().place(&release));
    assert!(source.join("payload.bin").exists());
    assert!(source.join("extra.nfo").exists());
    let dest = world.path("arch1/movies/Film");
    assert!(dest.exists());
    assert_ne!(mtime_secs(&dest), 1_234);
}

#[test]
fn successful_placement_moves_release_and_keeps_mtime() {
    let world = World::new();
    world.probe.script("/dev/arch1", &[50]);
    world.probe.script("/dev/arch2", &[400]);
    let source = make_release(&world.path("race1/movies/Film"), 1_600_000_000, MIB);
    fs::create_dir_all(source.join("Subs")).expect("subs dir");
    fs::write(source.join("Subs/en.srt"), b"1\n").expect("subs file");
    common::set_mtime(&source, 1_600_000_000);

    let release = world.oldest_incoming();
    let plan = world.archive().try_place(&release).expect("placement");

    let dest = world.path("arch2/movies/Film");
    assert_eq!(plan.dest_release_path(&release), dest);
    assert!(!source.exists());
    assert!(dest.join("payload.bin").exists());
    assert!(dest.join("Subs/en.srt").exists());
    assert_eq!(mtime_secs(&dest), 1_600_000_000);
}

// ──────────────────── archive eviction ────────────────────

#[test]
fn reclaim_stops_after_reaching_threshold() {
    let world = World::new();
    world.probe.script("/dev/arch1", &[10, 20, 30]);
    world.probe.script("/dev/arch2", &[500]);
    world.probe.script("/dev/sentinel", &[0]);
    let first = make_release(&world.path("arch1/movies/First"), 100, MIB);
    let second = make_release(&world.path("arch1/news/20200101"), 200, MIB);
    let third = make_release(&world.path("arch1/movies/Third"), 300, MIB);

    let reclaimer = ArchiveCapacityReclaimer::new(Arc::clone(&world.ctx));
    assert!(reclaimer.reclaim_all());
    assert!(!first.exists());
    assert!(!second.exists());
    assert!(third.exists());
    assert_eq!(world.probe.calls("/dev/arch1"), 3);
    assert_eq!(world.probe.calls("/dev/sentinel"), 0);
    assert_eq!(
        world.announced(),
        vec![
            r#"TDELA "First" 1 "movies""#.to_string(),
            r#"TDELA "20200101" 1 "news""#.to_string(),
        ]
    );
}

// ──────────────────── full rounds ────────────────────

fn orchestrator(world: &World, dry_run: bool) -> Orchestrator {
    Orchestrator::with_collaborators(
        &config(world.tmp.path()),
        dry_run,
        Arc::clone(&world.probe) as Arc<dyn DiskSpaceProbe>,
        Arc::new(NativeSyncExecutor::new(32)),
        Arc::new(AnnounceLog::open(&world.path("announce.log"))),
    )
    .expect("orchestrator")
}

#[test]
fn round_relieves_incoming_then_evicts_archive() {
    let world = World::new();
    // race1: low, then recovered after one migration.
    world.probe.script("/dev/race1", &[40, 40, 150]);
    world.probe.script("/dev/race2", &[500]);
    // arch1 takes the migration, then reads below its threshold once.
    world.probe.script("/dev/arch1", &[300, 20, 30]);
    world.probe.script("/dev/arch2", &[100]);

    make_release(&world.path("race1/movies/Film"), 1_000, MIB);
    make_release(&world.path("race1/movies/Newer"), 5_000, MIB);
    let stale = make_release(&world.path("arch1/movies/Stale"), 10, MIB);

    let report = orchestrator(&world, false).run_round();
    assert_eq!(report.sections_visited, 2);
    assert_eq!(report.actions_taken, 1);
    assert!(report.archive_cleanup);

    assert!(world.path("arch1/movies/Film/payload.bin").exists());
    assert!(world.path("race1/movies/Newer").exists());
    assert!(!stale.exists());

    let announced = world.announced();
    assert_eq!(announced.len(), 2);
    assert!(announced[0].starts_with(r#"TSM "Film" 1 40 "#));
    assert_eq!(announced[1], r#"TDELA "Stale" 1 "movies""#);
}

#[test]
fn dry_run_round_touches_nothing() {
    let world = World::new();
    world.probe.script("/dev/race1", &[40]);
    world.probe.script("/dev/race2", &[40]);
    world.probe.script("/dev/arch1", &[20]);
    world.probe.script("/dev/arch2", &[20]);
    let film = make_release(&world.path("race1/movies/Film"), 1_000, MIB);
    let pod = make_release(&world.path("race2/podcasts/Pod.E01"), 900, MIB);
    let stale = make_release(&world.path("arch2/movies/Stale"), 10, MIB);

    let report = orchestrator(&world, true).run_round();
    assert!(report.dry_run);
    assert!(film.join("payload.bin").exists());
    assert!(pod.join("payload.bin").exists());
    assert!(stale.join("payload.bin").exists());
    assert!(world.announced().is_empty());
}
