#![forbid(unsafe_code)]

//! Storage Tier Balancer (stb): keeps a fleet of "incoming" staging volumes
//! and "archive" long-term volumes above their free-space thresholds.
//!
//! Each round:
//! 1. **Incoming relief**: for every incoming section whose device is low,
//!    the globally oldest incoming release is migrated to the archive device
//!    with the most free space, or deleted when its label has no archive tier
//! 2. **Archive eviction**: every archive device below its threshold loses
//!    its oldest releases until it recovers or runs out of candidates
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use storage_tier_balancer::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use storage_tier_balancer::core::config::Config;
//! use storage_tier_balancer::scanner::release_scanner::ReleaseScanner;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod placement;
pub mod platform;
pub mod scanner;
