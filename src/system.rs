//! System-wide metrics collection from /proc filesystem.
//!
//! This module provides functions to read system-wide data such as
//! load average, total RAM, the aggregate CPU counters and the physical
//! core count from the /proc filesystem. Every reader has a pure parser
//! so the formats can be tested without a live /proc.

use ahash::AHashSet as HashSet;
use std::fs;

use crate::cpu::{CpuCategory, CpuSnapshot};
use crate::error::SourceError;

/// Root of the proc filesystem.
pub const PROC_ROOT: &str = "/proc";
pub const PROC_LOADAVG: &str = "/proc/loadavg";
pub const PROC_MEMINFO: &str = "/proc/meminfo";
pub const PROC_STAT: &str = "/proc/stat";
pub const PROC_CPUINFO: &str = "/proc/cpuinfo";

/// System load averages for 1, 5, and 15 minute intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one_min: f64,
    pub five_min: f64,
    pub fifteen_min: f64,
}

impl LoadAverage {
    /// Windows paired with their `range` label value.
    pub fn windows(&self) -> [(&'static str, f64); 3] {
        [
            ("1", self.one_min),
            ("5", self.five_min),
            ("15", self.fifteen_min),
        ]
    }
}

/// Reads load average from /proc/loadavg.
pub fn read_load_average() -> Result<LoadAverage, SourceError> {
    let content =
        fs::read_to_string(PROC_LOADAVG).map_err(|e| SourceError::io(PROC_LOADAVG, e))?;
    parse_load_average(&content)
}

/// Parses the 1, 5, and 15 minute load averages.
/// Format: "0.00 0.01 0.05 1/234 5678"
pub fn parse_load_average(content: &str) -> Result<LoadAverage, SourceError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(SourceError::Malformed {
            source_name: "loadavg",
            reason: format!("expected at least 3 fields, got {}", parts.len()),
        });
    }

    let field = |idx: usize, window: &str| {
        parts[idx]
            .parse::<f64>()
            .map_err(|e| SourceError::Malformed {
                source_name: "loadavg",
                reason: format!("failed to parse {window} load average: {e}"),
            })
    };

    Ok(LoadAverage {
        one_min: field(0, "1min")?,
        five_min: field(1, "5min")?,
        fifteen_min: field(2, "15min")?,
    })
}

/// Reads total RAM in bytes from /proc/meminfo.
pub fn read_total_memory() -> Result<u64, SourceError> {
    let content =
        fs::read_to_string(PROC_MEMINFO).map_err(|e| SourceError::io(PROC_MEMINFO, e))?;
    parse_total_memory(&content)
}

/// Looks for the "MemTotal:" line and converts it to bytes.
pub fn parse_total_memory(content: &str) -> Result<u64, SourceError> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            // Format: "MemTotal:       16384000 kB"
            if let Some(kb) = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
            {
                return Ok(kb * 1024);
            }
        }
    }

    Err(SourceError::Malformed {
        source_name: "meminfo",
        reason: "MemTotal not found".into(),
    })
}

/// Reads the aggregate `cpu` line of /proc/stat.
pub fn read_cpu_counters() -> Result<CpuSnapshot, SourceError> {
    let content = fs::read_to_string(PROC_STAT).map_err(|e| SourceError::io(PROC_STAT, e))?;
    parse_cpu_counters(&content)
}

/// Parses the aggregate `cpu` line into the tracked categories.
///
/// Kernels older than 2.6.24 lack the trailing columns; those count as zero.
pub fn parse_cpu_counters(content: &str) -> Result<CpuSnapshot, SourceError> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| SourceError::Malformed {
            source_name: "stat",
            reason: "aggregate cpu line not found".into(),
        })?;

    let fields: Vec<&str> = line.split_whitespace().skip(1).collect();
    if fields.len() < 4 {
        return Err(SourceError::Malformed {
            source_name: "stat",
            reason: format!("expected at least 4 counters, got {}", fields.len()),
        });
    }

    let mut counters = [0u64; CpuCategory::ALL.len()];
    for (slot, raw) in counters.iter_mut().zip(fields.iter()) {
        *slot = raw.parse::<u64>().map_err(|e| SourceError::Malformed {
            source_name: "stat",
            reason: format!("invalid counter '{raw}': {e}"),
        })?;
    }

    Ok(CpuSnapshot::new(counters))
}

/// Gets the number of physical CPU cores.
pub fn physical_core_count() -> Result<usize, SourceError> {
    let content =
        fs::read_to_string(PROC_CPUINFO).map_err(|e| SourceError::io(PROC_CPUINFO, e))?;
    parse_physical_core_count(&content)
}

/// Counts unique ("physical id", "core id") pairs in /proc/cpuinfo.
///
/// Virtual machines and some ARM kernels omit the topology fields; there the
/// number of "processor" entries is used instead.
pub fn parse_physical_core_count(content: &str) -> Result<usize, SourceError> {
    let mut cores: HashSet<(String, String)> = HashSet::new();
    let mut processors = 0usize;
    let mut physical_id: Option<String> = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => {
                processors += 1;
                physical_id = None;
            }
            "physical id" => physical_id = Some(value.trim().to_string()),
            "core id" => {
                let package = physical_id.clone().unwrap_or_default();
                cores.insert((package, value.trim().to_string()));
            }
            _ => {}
        }
    }

    match (cores.len(), processors) {
        (0, 0) => Err(SourceError::Malformed {
            source_name: "cpuinfo",
            reason: "no processors found".into(),
        }),
        (0, n) => Ok(n),
        (n, _) => Ok(n),
    }
}
