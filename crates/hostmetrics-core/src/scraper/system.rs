//! Host uptime, from `/proc/uptime`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::parse_uptime;
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::shared::SharedOptimizations;
use crate::platform::traits::FileSystem;

const SYSTEM_UPTIME: MetricDef =
    MetricDef::gauge("system.uptime", "The time the system has been running.", "s");

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {}

impl DomainConfig for SystemConfig {
    const KEY: &'static str = "system";
}

pub struct SystemScraper {
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
    shared: Arc<SharedOptimizations>,
}

impl SystemScraper {
    pub fn new(_config: SystemConfig, settings: &ScraperSettings) -> Self {
        Self {
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
            shared: Arc::clone(&settings.shared),
        }
    }
}

impl Scraper for SystemScraper {
    /// Warms the boot-time cache so every later scrape reads it for free.
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        self.shared
            .boot_time(self.fs.as_ref(), &self.paths)
            .map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let uptime = parse_uptime(&read_proc(self.fs.as_ref(), &self.paths, "uptime")?)?;
        ctx.check()?;

        let mut mb = MetricsBuilder::new(Utc::now());
        mb.set_start_time(self.shared.boot_datetime(self.fs.as_ref(), &self.paths));
        mb.record(&SYSTEM_UPTIME, &[], uptime);
        Ok(ScrapeOutput::new(mb.finish()))
    }
}
