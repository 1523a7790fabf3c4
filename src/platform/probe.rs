//! Free-space probing: the `DiskSpaceProbe` seam, a df-style command
//! implementation, and a scripted fake for deterministic tests.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::process::Command;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;

use crate::core::config::ProbeConfig;
use crate::core::errors::{Result, StbError};
use crate::core::topology::DeviceId;

/// One free-space observation. Never reused beyond the decision it was taken for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeSpaceReading {
    pub device: DeviceId,
    pub free_gb: u64,
    pub observed_at: DateTime<Utc>,
}

impl FreeSpaceReading {
    #[must_use]
    pub fn new(device: DeviceId, free_gb: u64) -> Self {
        Self {
            device,
            free_gb,
            observed_at: Utc::now(),
        }
    }

    /// Whether the device satisfies `limit_gb`.
    #[must_use]
    pub const fn meets(&self, limit_gb: u64) -> bool {
        self.free_gb >= limit_gb
    }
}

/// Reports whole gigabytes free for a device.
pub trait DiskSpaceProbe: Send + Sync {
    fn free_space(&self, device: &DeviceId) -> Result<FreeSpaceReading>;
}

/// Probe that runs `<program> <args...> <device>` and parses df-style output.
#[derive(Debug, Clone)]
pub struct CommandDiskProbe {
    program: String,
    args: Vec<String>,
}

impl CommandDiskProbe {
    #[must_use]
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl DiskSpaceProbe for CommandDiskProbe {
    fn free_space(&self, device: &DeviceId) -> Result<FreeSpaceReading> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(device.as_str())
            .output()
            .map_err(|e| StbError::Probe {
                device: device.to_string(),
                details: format!("failed to run {}: {e}", self.program),
            })?;
        if !output.status.success() {
            return Err(StbError::Probe {
                device: device.to_string(),
                details: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let free_gb = parse_df_free_gb(&stdout).map_err(|details| StbError::ProbeParse {
            device: device.to_string(),
            details,
        })?;
        tracing::debug!(device = %device, free_gb, "probed free space");
        Ok(FreeSpaceReading::new(device.clone(), free_gb))
    }
}

/// Free-space amount once the unit letter is gone: digits, optionally with
/// a decimal fraction. No sign, exponent or whitespace.
const DF_AMOUNT_PATTERN: &str = r"^[0-9]+(\.[0-9]+)?$";

fn df_amount_pattern() -> std::result::Result<&'static Regex, String> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(DF_AMOUNT_PATTERN))
        .as_ref()
        .map_err(|e| format!("amount pattern failed to compile: {e}"))
}

/// Parse the free-space column of df-style output.
///
/// The second line's fourth whitespace-separated column holds the value with
/// at most one trailing unit letter (`123G`). Decimal values are truncated.
pub fn parse_df_free_gb(output: &str) -> std::result::Result<u64, String> {
    let mut lines = output.lines().filter(|line| !line.trim().is_empty());
    if lines.next().is_none() {
        return Err("empty output".to_string());
    }
    let Some(row) = lines.next() else {
        return Err("fewer than two lines of output".to_string());
    };
    let Some(column) = row.split_whitespace().nth(3) else {
        return Err(format!("no fourth column in {row:?}"));
    };
    let number = column
        .strip_suffix(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(column);
    if number.is_empty() {
        return Err(format!("no numeric value in {column:?}"));
    }
    if !df_amount_pattern()?.is_match(number) {
        return Err(format!("{column:?} is not a plain non-negative amount"));
    }
    if let Ok(whole) = number.parse::<u64>() {
        return Ok(whole);
    }
    let value = number
        .parse::<f64>()
        .map_err(|e| format!("{column:?} is not a number: {e}"))?;
    #[allow(clippy::cast_precision_loss)]
    let ceiling = u64::MAX as f64;
    if !value.is_finite() || value >= ceiling {
        return Err(format!("{column:?} is out of range"));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value.trunc() as u64)
}

/// In-memory probe with a scripted reading queue per device.
///
/// Each query pops the next reading; the final reading repeats forever.
/// Unknown devices fail like a broken probe would.
#[derive(Debug, Default)]
pub struct ScriptedDiskProbe {
    script: Mutex<HashMap<DeviceId, VecDeque<u64>>>,
    calls: Mutex<HashMap<DeviceId, usize>>,
}

impl ScriptedDiskProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Self::script`].
    #[must_use]
    pub fn with(self, device: &str, readings: &[u64]) -> Self {
        self.script(device, readings);
        self
    }

    /// Replace the reading queue for `device`.
    pub fn script(&self, device: &str, readings: &[u64]) {
        self.script
            .lock()
            .insert(DeviceId::new(device), readings.iter().copied().collect());
    }

    /// Number of queries made for `device` so far.
    #[must_use]
    pub fn calls(&self, device: &str) -> usize {
        self.calls
            .lock()
            .get(&DeviceId::new(device))
            .copied()
            .unwrap_or(0)
    }
}

impl DiskSpaceProbe for ScriptedDiskProbe {
    fn free_space(&self, device: &DeviceId) -> Result<FreeSpaceReading> {
        *self.calls.lock().entry(device.clone()).or_insert(0) += 1;
        let mut script = self.script.lock();
        let queue = script.get_mut(device).ok_or_else(|| StbError::Probe {
            device: device.to_string(),
            details: "device not scripted".to_string(),
        })?;
        let free_gb = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        }
        .ok_or_else(|| StbError::Probe {
            device: device.to_string(),
            details: "empty script".to_string(),
        })?;
        drop(script);
        Ok(FreeSpaceReading::new(device.clone(), free_gb))
    }
}
