//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use storage_tier_balancer::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, StbError};
pub use crate::core::topology::{DeviceId, DiskSection, Label, Role, Topology};

// Platform
pub use crate::platform::probe::{
    CommandDiskProbe, DiskSpaceProbe, FreeSpaceReading, ScriptedDiskProbe,
};
pub use crate::platform::sync::{CommandSyncExecutor, NativeSyncExecutor, SyncExecutor};

// Scanner
pub use crate::scanner::release::{DatedPolicy, Release};
pub use crate::scanner::release_scanner::ReleaseScanner;

// Placement
pub use crate::placement::archive::ArchiveSectionManager;
pub use crate::placement::incoming::{IncomingSectionManager, ManageOutcome};
pub use crate::placement::reclaim::ArchiveCapacityReclaimer;
pub use crate::placement::{Limits, PlacementContext};

// Logging
pub use crate::logger::announce::{AnnounceEvent, AnnounceLog};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{Orchestrator, RoundReport};
