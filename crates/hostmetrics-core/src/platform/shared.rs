//! Startup optimizations shared by several scrapers.
//!
//! Boot time never changes while the host is up, yet the cpu, process and
//! system scrapers all need it every cycle. Once enabled, the first read of
//! `btime` is cached for the lifetime of the receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, trace};

use crate::platform::procfs::parser::parse_global_stat;
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::traits::FileSystem;
use crate::scraper::ScrapeError;

/// Switches shared by all scrapers of one receiver.
#[derive(Debug, Default)]
pub struct SharedOptimizations {
    enabled: AtomicBool,
    boot_time: Mutex<Option<u64>>,
}

impl SharedOptimizations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables boot-time caching. Returns `true` only for the call that
    /// actually flipped the switch.
    pub fn enable(&self) -> bool {
        let newly = !self.enabled.swap(true, Ordering::SeqCst);
        if newly {
            debug!("boot time cache enabled");
        }
        newly
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Host boot time in seconds since the epoch, from `/proc/stat` `btime`.
    pub fn boot_time(&self, fs: &dyn FileSystem, paths: &HostPaths) -> Result<u64, ScrapeError> {
        if !self.is_enabled() {
            return read_boot_time(fs, paths);
        }

        let mut cached = self
            .boot_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = *cached {
            return Ok(value);
        }
        let value = read_boot_time(fs, paths)?;
        *cached = Some(value);
        Ok(value)
    }

    /// Boot time as a start timestamp for cumulative metrics, if readable.
    pub fn boot_datetime(&self, fs: &dyn FileSystem, paths: &HostPaths) -> Option<DateTime<Utc>> {
        match self.boot_time(fs, paths) {
            Ok(secs) => Utc.timestamp_opt(i64::try_from(secs).ok()?, 0).single(),
            Err(e) => {
                trace!(error = %e, "boot time unavailable");
                None
            }
        }
    }
}

fn read_boot_time(fs: &dyn FileSystem, paths: &HostPaths) -> Result<u64, ScrapeError> {
    let content = read_proc(fs, paths, "stat")?;
    let stat = parse_global_stat(&content)?;
    if stat.btime == 0 {
        return Err(ScrapeError::Unavailable("btime missing from /proc/stat".into()));
    }
    Ok(stat.btime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockFs, SCENARIO_BOOT_TIME};

    #[test]
    fn test_enable_is_idempotent() {
        let shared = SharedOptimizations::new();
        assert!(!shared.is_enabled());
        assert!(shared.enable());
        assert!(!shared.enable());
        assert!(shared.is_enabled());
    }

    #[test]
    fn test_boot_time_uncached_follows_host() {
        let fs = MockFs::typical_system();
        let paths = HostPaths::default();
        let shared = SharedOptimizations::new();

        assert_eq!(shared.boot_time(&fs, &paths).unwrap(), SCENARIO_BOOT_TIME);
        fs.add_file("/proc/stat", "cpu 1 1 1 1\nbtime 1800000000\n");
        assert_eq!(shared.boot_time(&fs, &paths).unwrap(), 1_800_000_000);
    }

    #[test]
    fn test_boot_time_cached_after_enable() {
        let fs = MockFs::typical_system();
        let paths = HostPaths::default();
        let shared = SharedOptimizations::new();
        shared.enable();

        assert_eq!(shared.boot_time(&fs, &paths).unwrap(), SCENARIO_BOOT_TIME);
        fs.remove("/proc/stat");
        assert_eq!(shared.boot_time(&fs, &paths).unwrap(), SCENARIO_BOOT_TIME);
    }

    #[test]
    fn test_boot_datetime() {
        let fs = MockFs::typical_system();
        let shared = SharedOptimizations::new();
        let boot = shared.boot_datetime(&fs, &HostPaths::default()).unwrap();
        assert_eq!(boot.timestamp(), SCENARIO_BOOT_TIME as i64);
        assert!(shared.boot_datetime(&MockFs::new(), &HostPaths::default()).is_none());
    }

    #[test]
    fn test_boot_time_missing_btime() {
        let fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu 1 1 1 1\n");
        let err = SharedOptimizations::new()
            .boot_time(&fs, &HostPaths::default())
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Unavailable(_)));
    }
}
