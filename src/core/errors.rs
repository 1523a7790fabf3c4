//! STB-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, StbError>;

/// Top-level error type for the storage tier balancer.
#[derive(Debug, Error)]
pub enum StbError {
    #[error("[STB-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[STB-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[STB-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[STB-2001] free-space probe failed for device {device}: {details}")]
    Probe { device: String, details: String },

    #[error("[STB-2002] unparseable free-space output for device {device}: {details}")]
    ProbeParse { device: String, details: String },

    #[error("[STB-2101] tree under {path} exceeds max depth {max_depth}")]
    TreeTooDeep { path: PathBuf, max_depth: usize },

    #[error(
        "[STB-2201] no archive device can hold {release}: needs {required_gb} GB, best has {best_free_gb} GB"
    )]
    Capacity {
        release: String,
        required_gb: u64,
        best_free_gb: u64,
    },

    #[error("[STB-2202] file count mismatch after copy: {source_path} vs {dest_path}")]
    Integrity {
        source_path: PathBuf,
        dest_path: PathBuf,
    },

    #[error("[STB-2203] placement refused for {release}: {reason}")]
    Placement { release: String, reason: String },

    #[error("[STB-2301] sync command `{program}` failed: {details}")]
    Sync { program: String, details: String },

    #[error("[STB-2401] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[STB-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[STB-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl StbError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "STB-1001",
            Self::MissingConfig { .. } => "STB-1002",
            Self::ConfigParse { .. } => "STB-1003",
            Self::Probe { .. } => "STB-2001",
            Self::ProbeParse { .. } => "STB-2002",
            Self::TreeTooDeep { .. } => "STB-2101",
            Self::Capacity { .. } => "STB-2201",
            Self::Integrity { .. } => "STB-2202",
            Self::Placement { .. } => "STB-2203",
            Self::Sync { .. } => "STB-2301",
            Self::Serialization { .. } => "STB-2401",
            Self::Io { .. } => "STB-3002",
            Self::Runtime { .. } => "STB-3900",
        }
    }

    /// Whether a later round might succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Probe { .. }
                | Self::ProbeParse { .. }
                | Self::Capacity { .. }
                | Self::Integrity { .. }
                | Self::Sync { .. }
                | Self::Runtime { .. }
        )
    }

    /// Failures that abandon the current section only; the round carries on.
    #[must_use]
    pub const fn is_section_local(&self) -> bool {
        matches!(self, Self::Probe { .. } | Self::ProbeParse { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for StbError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for StbError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for StbError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
