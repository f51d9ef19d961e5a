//! Block device I/O counters, from `/proc/diskstats`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{
    DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings,
    check_names, name_allowed,
};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::parse_diskstats;
use crate::platform::procfs::{HostPaths, SECTOR_SIZE, read_proc};
use crate::platform::traits::FileSystem;

const DISK_IO: MetricDef = MetricDef::sum("system.disk.io", "Disk bytes transferred.", "By", true);
const DISK_OPERATIONS: MetricDef =
    MetricDef::sum("system.disk.operations", "Disk operations count.", "{operations}", true);
const DISK_IO_TIME: MetricDef = MetricDef::sum(
    "system.disk.io_time",
    "Time disk spent activated.",
    "s",
    true,
);
const DISK_OPERATION_TIME: MetricDef = MetricDef::sum(
    "system.disk.operation_time",
    "Time spent in disk operations.",
    "s",
    true,
);
const DISK_MERGED: MetricDef = MetricDef::sum(
    "system.disk.merged",
    "The number of disk reads/writes merged into single physical disk access operations.",
    "{operations}",
    true,
);
const DISK_PENDING: MetricDef = MetricDef::sum(
    "system.disk.pending_operations",
    "The queue size of pending I/O operations.",
    "{operations}",
    false,
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskConfig {
    pub include_devices: Vec<String>,
    pub exclude_devices: Vec<String>,
}

impl DomainConfig for DiskConfig {
    const KEY: &'static str = "disk";

    fn validate(&self) -> Result<(), String> {
        check_names("include_devices", &self.include_devices)?;
        check_names("exclude_devices", &self.exclude_devices)
    }
}

pub struct DiskScraper {
    config: DiskConfig,
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
}

impl DiskScraper {
    pub fn new(config: DiskConfig, settings: &ScraperSettings) -> Self {
        Self {
            config,
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
        }
    }
}

impl Scraper for DiskScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        read_proc(self.fs.as_ref(), &self.paths, "diskstats").map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let disks = parse_diskstats(&read_proc(self.fs.as_ref(), &self.paths, "diskstats")?)?;
        ctx.check()?;

        let mut mb = MetricsBuilder::new(Utc::now());
        for disk in disks.iter().filter(|d| {
            name_allowed(
                &d.device,
                &self.config.include_devices,
                &self.config.exclude_devices,
            )
        }) {
            let device = disk.device.as_str();
            let read = [("device", device), ("direction", "read")];
            let write = [("device", device), ("direction", "write")];

            mb.record(&DISK_IO, &read, disk.read_sectors * SECTOR_SIZE);
            mb.record(&DISK_IO, &write, disk.write_sectors * SECTOR_SIZE);
            mb.record(&DISK_OPERATIONS, &read, disk.reads);
            mb.record(&DISK_OPERATIONS, &write, disk.writes);
            mb.record(&DISK_IO_TIME, &[("device", device)], disk.io_time as f64 / 1000.0);
            mb.record(&DISK_OPERATION_TIME, &read, disk.read_time as f64 / 1000.0);
            mb.record(&DISK_OPERATION_TIME, &write, disk.write_time as f64 / 1000.0);
            mb.record(&DISK_MERGED, &read, disk.r_merged);
            mb.record(&DISK_MERGED, &write, disk.w_merged);
            mb.record(&DISK_PENDING, &[("device", device)], disk.io_in_progress);
        }
        Ok(ScrapeOutput::new(mb.finish()))
    }
}
