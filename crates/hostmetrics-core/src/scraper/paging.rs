//! Swap usage and paging activity, from `/proc/meminfo` and `/proc/vmstat`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::{parse_meminfo, parse_vmstat};
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::traits::FileSystem;

const PAGING_USAGE: MetricDef =
    MetricDef::sum("system.paging.usage", "Swap (unix) or pagefile (windows) usage.", "By", false);
const PAGING_OPERATIONS: MetricDef = MetricDef::sum(
    "system.paging.operations",
    "The number of paging operations.",
    "{operations}",
    true,
);
const PAGING_FAULTS: MetricDef =
    MetricDef::sum("system.paging.faults", "The number of page faults.", "{faults}", true);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagingConfig {}

impl DomainConfig for PagingConfig {
    const KEY: &'static str = "paging";
}

pub struct PagingScraper {
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
}

impl PagingScraper {
    pub fn new(_config: PagingConfig, settings: &ScraperSettings) -> Self {
        Self {
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
        }
    }

    fn record_usage(&self, mb: &mut MetricsBuilder) -> Result<(), ScrapeError> {
        let info = parse_meminfo(&read_proc(self.fs.as_ref(), &self.paths, "meminfo")?)?;
        let used = info
            .swap_total
            .saturating_sub(info.swap_free)
            .saturating_sub(info.swap_cached);
        mb.record(&PAGING_USAGE, &[("state", "used")], used * 1024);
        mb.record(&PAGING_USAGE, &[("state", "free")], info.swap_free * 1024);
        mb.record(&PAGING_USAGE, &[("state", "cached")], info.swap_cached * 1024);
        Ok(())
    }

    fn record_activity(&self, mb: &mut MetricsBuilder) -> Result<(), ScrapeError> {
        let vm = parse_vmstat(&read_proc(self.fs.as_ref(), &self.paths, "vmstat")?)?;
        mb.record(
            &PAGING_OPERATIONS,
            &[("direction", "page_in"), ("type", "major")],
            vm.pswpin,
        );
        mb.record(
            &PAGING_OPERATIONS,
            &[("direction", "page_out"), ("type", "major")],
            vm.pswpout,
        );
        mb.record(
            &PAGING_OPERATIONS,
            &[("direction", "page_in"), ("type", "minor")],
            vm.pgpgin,
        );
        mb.record(
            &PAGING_OPERATIONS,
            &[("direction", "page_out"), ("type", "minor")],
            vm.pgpgout,
        );
        mb.record(&PAGING_FAULTS, &[("type", "major")], vm.pgmajfault);
        mb.record(
            &PAGING_FAULTS,
            &[("type", "minor")],
            vm.pgfault.saturating_sub(vm.pgmajfault),
        );
        Ok(())
    }
}

impl Scraper for PagingScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        read_proc(self.fs.as_ref(), &self.paths, "vmstat").map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let mut mb = MetricsBuilder::new(Utc::now());
        let mut output = ScrapeOutput::default();

        let usage = self.record_usage(&mut mb);
        ctx.check()?;
        let activity = self.record_activity(&mut mb);

        match (usage, activity) {
            (Err(e), Err(_)) => return Err(e),
            (Err(e), Ok(())) => output.push_failure("usage", e),
            (Ok(()), Err(e)) => output.push_failure("activity", e),
            (Ok(()), Ok(())) => {}
        }
        output.metrics = mb.finish();
        Ok(output)
    }
}
