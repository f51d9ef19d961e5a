//! Load averages, from `/proc/loadavg`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::{parse_global_stat, parse_loadavg};
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::traits::FileSystem;

const LOAD_1M: MetricDef =
    MetricDef::gauge("system.cpu.load_average.1m", "Average CPU Load over 1 minute.", "{thread}");
const LOAD_5M: MetricDef =
    MetricDef::gauge("system.cpu.load_average.5m", "Average CPU Load over 5 minutes.", "{thread}");
const LOAD_15M: MetricDef = MetricDef::gauge(
    "system.cpu.load_average.15m",
    "Average CPU Load over 15 minutes.",
    "{thread}",
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    /// Divide each average by the number of logical CPUs.
    pub cpu_average: bool,
}

impl DomainConfig for LoadConfig {
    const KEY: &'static str = "load";
}

pub struct LoadScraper {
    config: LoadConfig,
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
}

impl LoadScraper {
    pub fn new(config: LoadConfig, settings: &ScraperSettings) -> Self {
        Self {
            config,
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
        }
    }

    fn logical_cpus(&self) -> Result<usize, ScrapeError> {
        let stat = parse_global_stat(&read_proc(self.fs.as_ref(), &self.paths, "stat")?)?;
        Ok(stat.per_cpu().count().max(1))
    }
}

impl Scraper for LoadScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        read_proc(self.fs.as_ref(), &self.paths, "loadavg").map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let load = parse_loadavg(&read_proc(self.fs.as_ref(), &self.paths, "loadavg")?)?;
        ctx.check()?;

        let divisor = if self.config.cpu_average {
            self.logical_cpus()? as f64
        } else {
            1.0
        };

        let mut mb = MetricsBuilder::new(Utc::now());
        mb.record(&LOAD_1M, &[], load.load1 / divisor);
        mb.record(&LOAD_5M, &[], load.load5 / divisor);
        mb.record(&LOAD_15M, &[], load.load15 / divisor);
        Ok(ScrapeOutput::new(mb.finish()))
    }
}
