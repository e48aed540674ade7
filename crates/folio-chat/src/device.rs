//! Best-effort device capability guess used to pick the first tier.
//!
//! Nothing here is allowed to fail: every probe has a fallback and the
//! result is always some valid tier.

use std::hint::black_box;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, info};

use crate::tier::{ModelTier, TierCatalog};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory assumed when no probe works.
pub const DEFAULT_MEMORY_GB: f64 = 4.0;

/// Cores assumed when the platform does not report them.
pub const DEFAULT_CORES: usize = 2;

/// Fraction of a tier's memory requirement the device must have.
pub const MEMORY_HEADROOM: f64 = 0.8;

/// Iterations of the benchmark workload.
const BENCHMARK_ITERATIONS: u32 = 2_000_000;

/// Where the memory estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySource {
    Hint,
    Platform,
    Benchmark,
    Default,
}

/// Caller-supplied capability hints, e.g. from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceHints {
    pub memory_gb: Option<f64>,
    pub cores: Option<usize>,
    /// Skip the platform memory probe.
    pub skip_platform_probe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    pub memory_gb: f64,
    pub cores: usize,
    pub source: MemorySource,
}

/// Estimate memory and cores.
pub fn detect(hints: &DeviceHints) -> DeviceProfile {
    let cores = hints
        .cores
        .filter(|c| *c > 0)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(DEFAULT_CORES);

    let (memory_gb, source) = if let Some(memory) = hints.memory_gb.filter(|m| valid_memory(*m)) {
        (memory, MemorySource::Hint)
    } else if let Some(memory) = (!hints.skip_platform_probe)
        .then(platform_memory_gb)
        .flatten()
    {
        (memory, MemorySource::Platform)
    } else if let Some(memory) = benchmark_memory_gb() {
        (memory, MemorySource::Benchmark)
    } else {
        (DEFAULT_MEMORY_GB, MemorySource::Default)
    };

    let profile = DeviceProfile {
        memory_gb,
        cores,
        source,
    };
    debug!("Detected device profile: {:?}", profile);
    profile
}

/// The largest tier the device can run, or the smallest if none fits.
pub fn select_tier(profile: &DeviceProfile, catalog: &TierCatalog) -> ModelTier {
    let tier = ModelTier::ALL
        .into_iter()
        .rev()
        .find(|tier| {
            let spec = catalog.spec(*tier);
            profile.memory_gb >= spec.memory_gb * MEMORY_HEADROOM && profile.cores >= spec.min_cores
        })
        .unwrap_or_else(ModelTier::smallest);

    info!(
        "Selected {} tier for {:.1}GB / {} cores ({:?})",
        tier, profile.memory_gb, profile.cores, profile.source
    );
    tier
}

fn valid_memory(memory_gb: f64) -> bool {
    memory_gb.is_finite() && memory_gb > 0.0
}

fn platform_memory_gb() -> Option<f64> {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return None;
    }
    Some(total as f64 / BYTES_PER_GB)
}

/// Time a fixed arithmetic workload and map it to a device class.
fn benchmark_memory_gb() -> Option<f64> {
    let start = Instant::now();
    let mut acc = 0.0f64;
    for i in 0..BENCHMARK_ITERATIONS {
        acc = black_box(acc + (i as f64).sqrt() * 1.000_001);
    }
    black_box(acc);
    let elapsed = start.elapsed();
    debug!("CPU benchmark took {:?}", elapsed);

    if elapsed.is_zero() {
        return None;
    }
    Some(memory_for_benchmark(elapsed))
}

/// Faster machines tend to ship with more memory.
fn memory_for_benchmark(elapsed: Duration) -> f64 {
    if elapsed < Duration::from_millis(15) {
        8.0
    } else if elapsed < Duration::from_millis(60) {
        4.0
    } else {
        2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(memory_gb: f64, cores: usize) -> DeviceProfile {
        DeviceProfile {
            memory_gb,
            cores,
            source: MemorySource::Hint,
        }
    }

    #[test]
    fn test_tier_thresholds() {
        let catalog = TierCatalog::default();
        assert_eq!(select_tier(&profile(16.0, 8), &catalog), ModelTier::Large);
        assert_eq!(select_tier(&profile(3.2, 4), &catalog), ModelTier::Large);
        assert_eq!(select_tier(&profile(3.1, 4), &catalog), ModelTier::Medium);
        assert_eq!(select_tier(&profile(16.0, 2), &catalog), ModelTier::Medium);
        assert_eq!(select_tier(&profile(0.5, 8), &catalog), ModelTier::Small);
        assert_eq!(select_tier(&profile(0.1, 1), &catalog), ModelTier::Small);
    }

    #[test]
    fn test_hints_take_precedence() {
        let detected = detect(&DeviceHints {
            memory_gb: Some(6.0),
            cores: Some(3),
            skip_platform_probe: false,
        });
        assert_eq!(detected.memory_gb, 6.0);
        assert_eq!(detected.cores, 3);
        assert_eq!(detected.source, MemorySource::Hint);
    }

    #[test]
    fn test_invalid_hint_is_ignored() {
        let detected = detect(&DeviceHints {
            memory_gb: Some(f64::NAN),
            cores: Some(0),
            skip_platform_probe: true,
        });
        assert_ne!(detected.source, MemorySource::Hint);
        assert_ne!(detected.source, MemorySource::Platform);
        assert!(detected.memory_gb > 0.0);
        assert!(detected.cores > 0);
    }

    #[test]
    fn test_benchmark_classes() {
        assert_eq!(memory_for_benchmark(Duration::from_millis(5)), 8.0);
        assert_eq!(memory_for_benchmark(Duration::from_millis(30)), 4.0);
        assert_eq!(memory_for_benchmark(Duration::from_millis(200)), 2.0);
    }
}
