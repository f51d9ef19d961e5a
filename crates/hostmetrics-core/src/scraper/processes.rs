//! Process counts by status and processes created since boot.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::parse_global_stat;
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::shared::SharedOptimizations;
use crate::platform::traits::FileSystem;

const PROCESSES_COUNT: MetricDef = MetricDef::sum(
    "system.processes.count",
    "Total number of processes in each state.",
    "{processes}",
    false,
);
const PROCESSES_CREATED: MetricDef = MetricDef::sum(
    "system.processes.created",
    "Total number of created processes.",
    "{processes}",
    true,
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessesConfig {}

impl DomainConfig for ProcessesConfig {
    const KEY: &'static str = "processes";
}

pub struct ProcessesScraper {
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
    shared: Arc<SharedOptimizations>,
}

impl ProcessesScraper {
    pub fn new(_config: ProcessesConfig, settings: &ScraperSettings) -> Self {
        Self {
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
            shared: Arc::clone(&settings.shared),
        }
    }
}

impl Scraper for ProcessesScraper {
    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let stat = parse_global_stat(&read_proc(self.fs.as_ref(), &self.paths, "stat")?)?;
        ctx.check()?;

        let mut mb = MetricsBuilder::new(Utc::now());
        mb.record(&PROCESSES_COUNT, &[("status", "running")], stat.procs_running);
        mb.record(&PROCESSES_COUNT, &[("status", "blocked")], stat.procs_blocked);
        mb.set_start_time(self.shared.boot_datetime(self.fs.as_ref(), &self.paths));
        mb.record(&PROCESSES_CREATED, &[], stat.processes);
        Ok(ScrapeOutput::new(mb.finish()))
    }
}
