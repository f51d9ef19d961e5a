//! CPU time per logical CPU and state, from `/proc/stat`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::{CpuStat, parse_global_stat};
use crate::platform::procfs::{CLK_TCK, HostPaths, read_proc};
use crate::platform::shared::SharedOptimizations;
use crate::platform::traits::FileSystem;

const CPU_TIME: MetricDef = MetricDef::sum(
    "system.cpu.time",
    "Seconds each logical CPU spent on each mode.",
    "s",
    true,
);
const CPU_UTILIZATION: MetricDef = MetricDef::gauge(
    "system.cpu.utilization",
    "Difference in system.cpu.time since the last measurement, divided by the elapsed time.",
    "1",
);
const CPU_LOGICAL_COUNT: MetricDef = MetricDef::sum(
    "system.cpu.logical.count",
    "Number of available logical CPUs.",
    "{cpu}",
    false,
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CpuConfig {
    /// Also report `system.cpu.utilization` between consecutive scrapes.
    pub utilization: bool,
}

impl DomainConfig for CpuConfig {
    const KEY: &'static str = "cpu";
}

pub struct CpuScraper {
    config: CpuConfig,
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
    shared: Arc<SharedOptimizations>,
    previous: HashMap<u32, CpuStat>,
}

impl CpuScraper {
    pub fn new(config: CpuConfig, settings: &ScraperSettings) -> Self {
        Self {
            config,
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
            shared: Arc::clone(&settings.shared),
            previous: HashMap::new(),
        }
    }

    fn read_per_cpu(&self) -> Result<Vec<CpuStat>, ScrapeError> {
        let content = read_proc(self.fs.as_ref(), &self.paths, "stat")?;
        let stat = parse_global_stat(&content)?;
        Ok(stat.per_cpu().cloned().collect())
    }
}

fn states(cpu: &CpuStat) -> [(&'static str, u64); 8] {
    [
        ("user", cpu.user),
        ("nice", cpu.nice),
        ("system", cpu.system),
        ("idle", cpu.idle),
        ("wait", cpu.iowait),
        ("interrupt", cpu.irq),
        ("softirq", cpu.softirq),
        ("steal", cpu.steal),
    ]
}

impl Scraper for CpuScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        let cpus = self.read_per_cpu()?;
        self.previous = cpus
            .into_iter()
            .filter_map(|c| c.cpu_id.map(|id| (id, c)))
            .collect();
        Ok(())
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let cpus = self.read_per_cpu()?;
        ctx.check()?;

        let mut mb = MetricsBuilder::new(Utc::now());
        mb.set_start_time(self.shared.boot_datetime(self.fs.as_ref(), &self.paths));

        let mut output = ScrapeOutput::default();
        if cpus.is_empty() {
            output.push_failure("per-cpu", "no per-cpu lines in /proc/stat");
        }

        for cpu in &cpus {
            let Some(id) = cpu.cpu_id else { continue };
            let name = format!("cpu{}", id);
            for (state, jiffies) in states(cpu) {
                mb.record(
                    &CPU_TIME,
                    &[("cpu", name.as_str()), ("state", state)],
                    jiffies as f64 / CLK_TCK as f64,
                );
            }

            if self.config.utilization
                && let Some(prev) = self.previous.get(&id)
            {
                let elapsed = cpu.total().saturating_sub(prev.total());
                if elapsed > 0 {
                    for ((state, now), (_, before)) in states(cpu).into_iter().zip(states(prev)) {
                        let delta = now.saturating_sub(before);
                        mb.record(
                            &CPU_UTILIZATION,
                            &[("cpu", name.as_str()), ("state", state)],
                            delta as f64 / elapsed as f64,
                        );
                    }
                }
            }
        }

        mb.set_start_time(None);
        mb.record(&CPU_LOGICAL_COUNT, &[], cpus.len() as u64);

        self.previous = cpus
            .into_iter()
            .filter_map(|c| c.cpu_id.map(|id| (id, c)))
            .collect();
        output.metrics = mb.finish();
        Ok(output)
    }
}
