//! Typed view of the configured sections, built once at startup.
//!
//! The label mapping between tiers is resolved here rather than by string
//! comparison at use time: every incoming label is known to be either
//! migratable (it has archive targets) or delete-only.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::config::{Config, SectionConfig};
use crate::core::errors::{Result, StbError};

/// Logical content category shared between tiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Block-device identifier used for free-space queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incoming label -> indices into the archive section list with the same label.
pub type LabelMap = BTreeMap<Label, Vec<usize>>;

/// Which tier a section belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Incoming,
    Archive,
}

/// A configured storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSection {
    pub path: PathBuf,
    pub device: DeviceId,
    pub label: Label,
    pub role: Role,
    pub dated: bool,
}

impl DiskSection {
    fn from_config(cfg: &SectionConfig, role: Role) -> Self {
        Self {
            path: cfg.path.clone(),
            device: DeviceId::new(cfg.device.trim()),
            label: Label::new(cfg.section.trim()),
            role,
            dated: cfg.dated,
        }
    }
}

/// Archive handling available for an incoming label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTier<'a> {
    /// Releases with this label can be migrated; the listed sections share it.
    Targets(Vec<&'a DiskSection>),
    /// No archive section carries this label; releases are deleted in place.
    DeleteOnly,
}

/// Archive sections sharing one physical device, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub device: DeviceId,
    pub sections: Vec<usize>,
}

/// Immutable section layout shared by every component.
#[derive(Debug, Clone)]
pub struct Topology {
    incoming: Vec<DiskSection>,
    archive: Vec<DiskSection>,
    labels: LabelMap,
    archive_devices: Vec<DeviceGroup>,
}

impl Topology {
    /// Build the typed layout from a validated config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let incoming: Vec<DiskSection> = config
            .incoming_disks_sections
            .iter()
            .map(|s| DiskSection::from_config(s, Role::Incoming))
            .collect();
        let archive: Vec<DiskSection> = config
            .archive_disks_sections
            .iter()
            .map(|s| DiskSection::from_config(s, Role::Archive))
            .collect();

        if incoming.is_empty() {
            return Err(StbError::InvalidConfig {
                details: "topology needs at least one incoming section".to_string(),
            });
        }

        let mut labels = LabelMap::new();
        for section in &incoming {
            labels.entry(section.label.clone()).or_default();
        }
        for (idx, section) in archive.iter().enumerate() {
            match labels.get_mut(&section.label) {
                Some(targets) => targets.push(idx),
                None => tracing::warn!(
                    label = %section.label,
                    path = %section.path.display(),
                    "archive section has no incoming counterpart; it is only ever evicted"
                ),
            }
        }
        for (label, targets) in &labels {
            if targets.is_empty() {
                tracing::info!(
                    label = %label,
                    "no archive tier for label; its releases are deleted instead of migrated"
                );
            }
        }

        let mut archive_devices: Vec<DeviceGroup> = Vec::new();
        for (idx, section) in archive.iter().enumerate() {
            match archive_devices
                .iter_mut()
                .find(|group| group.device == section.device)
            {
                Some(group) => group.sections.push(idx),
                None => archive_devices.push(DeviceGroup {
                    device: section.device.clone(),
                    sections: vec![idx],
                }),
            }
        }

        Ok(Self {
            incoming,
            archive,
            labels,
            archive_devices,
        })
    }

    #[must_use]
    pub fn incoming(&self) -> &[DiskSection] {
        &self.incoming
    }

    #[must_use]
    pub fn archive(&self) -> &[DiskSection] {
        &self.archive
    }

    /// Archive device groups in first-seen order.
    #[must_use]
    pub fn archive_devices(&self) -> &[DeviceGroup] {
        &self.archive_devices
    }

    /// Archive sections belonging to one device group.
    #[must_use]
    pub fn group_sections(&self, group: &DeviceGroup) -> Vec<&DiskSection> {
        group
            .sections
            .iter()
            .filter_map(|&idx| self.archive.get(idx))
            .collect()
    }

    /// Every distinct device, incoming first, in first-seen order.
    #[must_use]
    pub fn all_devices(&self) -> Vec<(&DeviceId, Role)> {
        let mut out: Vec<(&DeviceId, Role)> = Vec::new();
        for section in self.incoming.iter().chain(self.archive.iter()) {
            if !out.iter().any(|(device, _)| *device == &section.device) {
                out.push((&section.device, section.role));
            }
        }
        out
    }

    /// The incoming section whose path equals `path` exactly.
    #[must_use]
    pub fn incoming_by_path(&self, path: &Path) -> Option<&DiskSection> {
        self.incoming.iter().find(|section| section.path == path)
    }

    /// Resolve the archive tier for an incoming label.
    ///
    /// Labels no incoming section declares are rejected.
    pub fn archive_tier(&self, label: &Label) -> Result<ArchiveTier<'_>> {
        let targets = self.labels.get(label).ok_or_else(|| StbError::Placement {
            release: String::new(),
            reason: format!("label {label} is not declared by any incoming section"),
        })?;
        if targets.is_empty() {
            return Ok(ArchiveTier::DeleteOnly);
        }
        Ok(ArchiveTier::Targets(
            targets
                .iter()
                .filter_map(|&idx| self.archive.get(idx))
                .collect(),
        ))
    }
}
