//! Process and host readings for metrics snapshots and batch sizing.
//!
//! Linux reads `/proc`; elsewhere the readings are absent.

use std::path::Path;

/// Resident memory of this process in bytes.
#[must_use]
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

/// One-minute load average divided by available cores, clamped to `[0, 1]`.
///
/// Returns 0.0 where the platform does not expose a load average.
#[must_use]
pub fn load_ratio() -> f64 {
    let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    read_loadavg(Path::new("/proc/loadavg")).map_or(0.0, |avg| normalize_load(avg, cores))
}

fn read_loadavg(path: &Path) -> Option<f64> {
    let raw = std::fs::read_to_string(path).ok()?;
    raw.split_whitespace().next()?.parse().ok()
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

#[allow(clippy::cast_precision_loss)]
fn normalize_load(load_avg: f64, cores: usize) -> f64 {
    (load_avg / cores.max(1) as f64).clamp(0.0, 1.0)
}
