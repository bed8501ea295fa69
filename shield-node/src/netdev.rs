use crate::error::{Result, ShieldError};
use std::collections::HashMap;

/// Provider of cumulative received-byte counters, keyed by interface name.
///
/// A failed read is transient: the caller logs it and retries on the next
/// poll tick. Counters are cumulative since boot and may reset if the link
/// restarts (see the radar's delta handling).
pub trait SampleSource: Send + Sync {
    fn sample(&self) -> Result<HashMap<String, u64>>;
}

/// Sample source backed by the kernel's per-interface counters
/// (`/proc/net/dev`).
#[derive(Debug, Default)]
pub struct ProcNetDev;

impl ProcNetDev {
    pub fn new() -> Self {
        Self
    }
}

impl SampleSource for ProcNetDev {
    fn sample(&self) -> Result<HashMap<String, u64>> {
        let status = procfs::net::dev_status()
            .map_err(|e| ShieldError::Sample(format!("failed to read /proc/net/dev: {e}")))?;

        Ok(status
            .into_iter()
            .map(|(name, dev)| (name, dev.recv_bytes))
            .collect())
    }
}

/// Pick the first non-loopback interface the kernel reports.
///
/// Used when no interface is configured; ordering is made deterministic by
/// sorting the names.
pub fn detect_default_interface(source: &dyn SampleSource) -> Result<String> {
    let totals = source.sample()?;
    let mut names: Vec<String> = totals.into_keys().collect();
    names.sort();

    names
        .into_iter()
        .find(|name| name != "lo")
        .ok_or_else(|| ShieldError::Sample("no non-loopback network interface found".to_string()))
}
