//! Memory usage by state, from `/proc/meminfo`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::{MemInfo, parse_meminfo};
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::traits::FileSystem;

const MEMORY_USAGE: MetricDef =
    MetricDef::sum("system.memory.usage", "Bytes of memory in use.", "By", false);
const MEMORY_UTILIZATION: MetricDef = MetricDef::gauge(
    "system.memory.utilization",
    "Percentage of memory bytes in use.",
    "1",
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {}

impl DomainConfig for MemoryConfig {
    const KEY: &'static str = "memory";
}

pub struct MemoryScraper {
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
}

impl MemoryScraper {
    pub fn new(_config: MemoryConfig, settings: &ScraperSettings) -> Self {
        Self {
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
        }
    }
}

/// Memory split into the states reported on Linux, in bytes.
fn memory_states(info: &MemInfo) -> [(&'static str, u64); 6] {
    let kb = |v: u64| v * 1024;
    let used = info
        .mem_total
        .saturating_sub(info.mem_free)
        .saturating_sub(info.buffers)
        .saturating_sub(info.cached)
        .saturating_sub(info.s_reclaimable);
    [
        ("used", kb(used)),
        ("free", kb(info.mem_free)),
        ("buffered", kb(info.buffers)),
        ("cached", kb(info.cached)),
        ("slab_reclaimable", kb(info.s_reclaimable)),
        ("slab_unreclaimable", kb(info.s_unreclaim)),
    ]
}

impl Scraper for MemoryScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        read_proc(self.fs.as_ref(), &self.paths, "meminfo").map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let info = parse_meminfo(&read_proc(self.fs.as_ref(), &self.paths, "meminfo")?)?;
        ctx.check()?;

        let mut mb = MetricsBuilder::new(Utc::now());
        let total = info.mem_total * 1024;
        for (state, bytes) in memory_states(&info) {
            mb.record(&MEMORY_USAGE, &[("state", state)], bytes);
            if total > 0 {
                mb.record(
                    &MEMORY_UTILIZATION,
                    &[("state", state)],
                    bytes as f64 / total as f64,
                );
            }
        }
        Ok(ScrapeOutput::new(mb.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdata::NumberValue;
    use crate::platform::mock::MockFs;
    use crate::scraper::test_support::settings;

    #[test]
    fn test_memory_usage_states() {
        let fs = MockFs::typical_system();
        let mut scraper = MemoryScraper::new(MemoryConfig::default(), &settings(&fs));
        let ctx = ScrapeContext::background();
        scraper.start(&ctx).unwrap();
        let output = scraper.scrape(&ctx).unwrap();

        let usage = &output.metrics[0];
        assert_eq!(usage.name, "system.memory.usage");
        // 16384000 - 8192000 - 512000 - 2048000 - 256000 kB
        let used = usage.point(&[("state", "used")]).unwrap();
        assert_eq!(used.value, NumberValue::Int(5_376_000 * 1024));
        let free = usage.point(&[("state", "free")]).unwrap();
        assert_eq!(free.value, NumberValue::Int(8_192_000 * 1024));

        let util = &output.metrics[1];
        let free = util.point(&[("state", "free")]).unwrap();
        assert_eq!(free.value, NumberValue::Double(0.5));
    }

    #[test]
    fn test_memory_pressure_reports_less_free() {
        let fs = MockFs::memory_pressure();
        let mut scraper = MemoryScraper::new(MemoryConfig::default(), &settings(&fs));
        let output = scraper.scrape(&ScrapeContext::background()).unwrap();
        let util = &output.metrics[1];
        let free = util.point(&[("state", "free")]).unwrap().value.as_f64();
        assert!(free < 0.05);
    }

    #[test]
    fn test_broken_meminfo_is_fatal() {
        let fs = MockFs::typical_system();
        fs.add_file("/proc/meminfo", "garbage\n");
        let mut scraper = MemoryScraper::new(MemoryConfig::default(), &settings(&fs));
        assert!(matches!(
            scraper.scrape(&ScrapeContext::background()),
            Err(ScrapeError::Parse(_))
        ));
    }
}
