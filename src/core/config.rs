//! Configuration system: TOML file + env var overrides + validation.
//!
//! The loaded [`Config`] is immutable for the life of the process. Components
//! never read it ambiently: the daemon builds a [`crate::core::topology::Topology`]
//! and plain threshold values from it once and hands them to each constructor.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StbError};
use crate::core::paths::normalize_section_path;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Incoming devices are rebalanced while below this many free GB.
    pub free_space_limit_gb_race: u64,
    /// Archive devices are evicted while below this many free GB.
    pub free_space_limit_gb_archive: u64,
    /// Headroom that must remain on the archive device after a placement.
    pub archive_buffer_gb: u64,
    /// Sleep between rounds.
    pub wait_time_minutes: u64,
    /// Log every mutating action without executing it.
    pub debug: bool,
    pub scanner: ScannerConfig,
    pub probe: ProbeConfig,
    pub sync: SyncConfig,
    pub paths: PathsConfig,
    /// Staging volumes new releases land on.
    pub incoming_disks_sections: Vec<SectionConfig>,
    /// Long-term volumes releases are migrated to.
    pub archive_disks_sections: Vec<SectionConfig>,
}

/// One configured storage location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionConfig {
    pub path: PathBuf,
    pub device: String,
    /// Content label (e.g. "movies"); matched between tiers.
    pub section: String,
    #[serde(default)]
    pub dated: bool,
}

/// Release scanning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Worker threads used to size one release tree.
    pub parallelism: usize,
    /// Directories deeper than this below a release are not descended.
    pub max_depth: usize,
    /// Dated releases younger than this are never selected.
    pub dated_min_age_hours: u64,
    /// Upper bound on consecutive actions per incoming section in one round.
    pub max_passes_per_section: usize,
}

/// External free-space query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    pub program: String,
    pub args: Vec<String>,
}

/// How release trees are copied between sections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Shell out to `sync.program`.
    #[default]
    Command,
    /// Copy in-process.
    Native,
}

/// External copy tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub mode: SyncMode,
    pub program: String,
    pub args: Vec<String>,
}

/// Filesystem paths used by stb itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    #[serde(skip)]
    pub config_file: PathBuf,
    pub log_file: Option<PathBuf>,
    pub announce_log: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            free_space_limit_gb_race: 100,
            free_space_limit_gb_archive: 200,
            archive_buffer_gb: 10,
            wait_time_minutes: 5,
            debug: false,
            scanner: ScannerConfig::default(),
            probe: ProbeConfig::default(),
            sync: SyncConfig::default(),
            paths: PathsConfig::default(),
            incoming_disks_sections: Vec::new(),
            archive_disks_sections: Vec::new(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            max_depth: 64,
            dated_min_age_hours: 24,
            max_passes_per_section: 64,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: "df".to_string(),
            args: vec!["-BG".to_string()],
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Command,
            program: "rsync".to_string(),
            args: vec!["-a".to_string()],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        let data = home_dir.join(".local").join("share").join("stb");
        Self {
            config_file: home_dir.join(".config").join("stb").join("config.toml"),
            log_file: Some(data.join("stb.log")),
            announce_log: data.join("announce.log"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Sections have no sensible defaults, so a missing file is always an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        if !path_buf.exists() {
            return Err(StbError::MissingConfig { path: path_buf });
        }
        let raw = fs::read_to_string(&path_buf).map_err(|source| StbError::Io {
            path: path_buf.clone(),
            source,
        })?;
        let mut cfg: Self = toml::from_str(&raw)?;
        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut cfg: Self = toml::from_str(raw)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the effective config back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON, stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        set_u64(
            &mut lookup,
            "STB_FREE_SPACE_LIMIT_GB_RACE",
            &mut self.free_space_limit_gb_race,
        )?;
        set_u64(
            &mut lookup,
            "STB_FREE_SPACE_LIMIT_GB_ARCHIVE",
            &mut self.free_space_limit_gb_archive,
        )?;
        set_u64(
            &mut lookup,
            "STB_ARCHIVE_BUFFER_GB",
            &mut self.archive_buffer_gb,
        )?;
        set_u64(
            &mut lookup,
            "STB_WAIT_TIME_MINUTES",
            &mut self.wait_time_minutes,
        )?;
        if let Some(raw) = lookup("STB_DEBUG") {
            self.debug = parse_env_bool("STB_DEBUG", &raw)?;
        }
        set_usize(
            &mut lookup,
            "STB_SCANNER_PARALLELISM",
            &mut self.scanner.parallelism,
        )?;
        set_usize(
            &mut lookup,
            "STB_SCANNER_MAX_DEPTH",
            &mut self.scanner.max_depth,
        )?;
        if let Some(raw) = lookup("STB_LOG_FILE") {
            self.paths.log_file = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("STB_ANNOUNCE_LOG") {
            self.paths.announce_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn normalize_paths(&mut self) {
        for section in self
            .incoming_disks_sections
            .iter_mut()
            .chain(self.archive_disks_sections.iter_mut())
        {
            section.path = normalize_section_path(&section.path);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.incoming_disks_sections.is_empty() {
            return Err(StbError::InvalidConfig {
                details: "incoming_disks_sections must list at least one section".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (tier, sections) in [
            ("incoming_disks_sections", &self.incoming_disks_sections),
            ("archive_disks_sections", &self.archive_disks_sections),
        ] {
            for (idx, section) in sections.iter().enumerate() {
                if section.path.as_os_str().is_empty() {
                    return Err(StbError::InvalidConfig {
                        details: format!("{tier}[{idx}].path must not be empty"),
                    });
                }
                if section.device.trim().is_empty() {
                    return Err(StbError::InvalidConfig {
                        details: format!("{tier}[{idx}].device must not be empty"),
                    });
                }
                if section.section.trim().is_empty() {
                    return Err(StbError::InvalidConfig {
                        details: format!("{tier}[{idx}].section must not be empty"),
                    });
                }
                if !seen.insert(section.path.clone()) {
                    return Err(StbError::InvalidConfig {
                        details: format!(
                            "{tier}[{idx}].path {} is configured more than once",
                            section.path.display()
                        ),
                    });
                }
            }
        }

        if self.wait_time_minutes == 0 {
            return Err(StbError::InvalidConfig {
                details: "wait_time_minutes must be >= 1".to_string(),
            });
        }
        if self.scanner.parallelism == 0 {
            return Err(StbError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.scanner.max_depth == 0 {
            return Err(StbError::InvalidConfig {
                details: "scanner.max_depth must be >= 1".to_string(),
            });
        }
        if self.scanner.max_passes_per_section == 0 {
            return Err(StbError::InvalidConfig {
                details: "scanner.max_passes_per_section must be >= 1".to_string(),
            });
        }
        if self.probe.program.trim().is_empty() {
            return Err(StbError::InvalidConfig {
                details: "probe.program must not be empty".to_string(),
            });
        }
        if self.sync.mode == SyncMode::Command && self.sync.program.trim().is_empty() {
            return Err(StbError::InvalidConfig {
                details: "sync.program must not be empty in command mode".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<u64>().map_err(|error| StbError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<usize>()
            .map_err(|error| StbError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| StbError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, StbError, SyncMode};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    const SAMPLE: &str = r#"
free_space_limit_gb_race = 150
free_space_limit_gb_archive = 300
archive_buffer_gb = 20
wait_time_minutes = 10

[[incoming_disks_sections]]
path = "/mnt/race1/movies/"
device = "/dev/sdb1"
section = "movies"

[[incoming_disks_sections]]
path = "/mnt/race1/tv"
device = "/dev/sdb1"
section = "tv"

[[archive_disks_sections]]
path = "/mnt/archive1/movies"
device = "/dev/sdc1"
section = "movies"
dated = true

[sync]
mode = "native"
"#;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn minimal() -> Config {
        Config::from_toml_str(
            r#"
[[incoming_disks_sections]]
path = "/in"
device = "/dev/a"
section = "movies"
"#,
        )
        .expect("minimal config should parse")
    }

    #[test]
    fn sample_config_parses_and_normalizes() {
        let cfg = Config::from_toml_str(SAMPLE).expect("sample should parse");
        assert_eq!(cfg.free_space_limit_gb_race, 150);
        assert_eq!(cfg.free_space_limit_gb_archive, 300);
        assert_eq!(cfg.archive_buffer_gb, 20);
        assert_eq!(cfg.incoming_disks_sections.len(), 2);
        assert_eq!(
            cfg.incoming_disks_sections[0].path,
            PathBuf::from("/mnt/race1/movies")
        );
        assert!(!cfg.incoming_disks_sections[0].dated);
        assert!(cfg.archive_disks_sections[0].dated);
        assert_eq!(cfg.sync.mode, SyncMode::Native);
        assert_eq!(cfg.probe.program, "df");
    }

    #[test]
    fn no_incoming_sections_rejected() {
        let err = Config::from_toml_str("wait_time_minutes = 5").unwrap_err();
        match err {
            StbError::InvalidConfig { details } => {
                assert!(details.contains("incoming_disks_sections"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_section_path_rejected() {
        let raw = r#"
[[incoming_disks_sections]]
path = "/data/x"
device = "/dev/a"
section = "movies"

[[archive_disks_sections]]
path = "/data/x/"
device = "/dev/b"
section = "movies"
"#;
        let err = Config::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn empty_label_rejected() {
        let raw = r#"
[[incoming_disks_sections]]
path = "/data/x"
device = "/dev/a"
section = "  "
"#;
        let err = Config::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("section must not be empty"));
    }

    #[test]
    fn zero_wait_time_rejected() {
        let mut cfg = minimal();
        cfg.wait_time_minutes = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("wait_time_minutes"));
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = minimal();
        cfg.scanner.parallelism = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn unknown_sync_mode_is_parse_error() {
        let raw = r#"
[[incoming_disks_sections]]
path = "/in"
device = "/dev/a"
section = "movies"

[sync]
mode = "teleport"
"#;
        let err = Config::from_toml_str(raw).unwrap_err();
        assert_eq!(err.code(), "STB-1003");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = minimal();
        let overrides = vars(&[
            ("STB_FREE_SPACE_LIMIT_GB_RACE", "42"),
            ("STB_ARCHIVE_BUFFER_GB", " 7 "),
            ("STB_DEBUG", "true"),
            ("STB_ANNOUNCE_LOG", "/tmp/stb/announce.log"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");
        assert_eq!(cfg.free_space_limit_gb_race, 42);
        assert_eq!(cfg.archive_buffer_gb, 7);
        assert!(cfg.debug);
        assert_eq!(
            cfg.paths.announce_log,
            PathBuf::from("/tmp/stb/announce.log")
        );
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = minimal();
        let overrides = vars(&[("STB_WAIT_TIME_MINUTES", "soon")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            StbError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("STB_WAIT_TIME_MINUTES"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/stb/config.toml"))).unwrap_err();
        assert!(matches!(err, StbError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_file_and_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = Config::load(Some(&path)).expect("load should succeed");
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = minimal();
        let mut modified = cfg.clone();
        modified.archive_buffer_gb += 1;
        assert_eq!(cfg.stable_hash().unwrap(), cfg.stable_hash().unwrap());
        assert_ne!(cfg.stable_hash().unwrap(), modified.stable_hash().unwrap());
    }

    #[test]
    fn effective_config_round_trips_through_toml() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        let rendered = cfg.to_toml_string().unwrap();
        let reparsed = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed.incoming_disks_sections, cfg.incoming_disks_sections);
        assert_eq!(reparsed.sync, cfg.sync);
    }
}
