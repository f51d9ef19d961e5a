//! Filesystem space and inode usage per mount point.
//!
//! Mounts come from `/proc/self/mounts`; sizes from `statvfs` on each mount
//! point, resolved under the host root. A mount that cannot be stat'ed is a
//! sub-failure, the rest are still reported.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::trace;

use super::{DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::{MountEntry, parse_mounts};
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::traits::FileSystem;

const FS_USAGE: MetricDef = MetricDef::sum(
    "system.filesystem.usage",
    "Filesystem bytes used.",
    "By",
    false,
);
const FS_INODES_USAGE: MetricDef = MetricDef::sum(
    "system.filesystem.inodes.usage",
    "FileSystem inodes used.",
    "{inodes}",
    false,
);
const FS_UTILIZATION: MetricDef = MetricDef::gauge(
    "system.filesystem.utilization",
    "Fraction of filesystem bytes used.",
    "1",
);

/// Pseudo and in-memory filesystems skipped unless explicitly included.
const VIRTUAL_FS_TYPES: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "proc",
    "pstore",
    "rpc_pipefs",
    "securityfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesystemConfig {
    pub include_virtual_filesystems: bool,
    pub exclude_fs_types: Vec<String>,
    pub exclude_mount_points: Vec<String>,
}

impl DomainConfig for FilesystemConfig {
    const KEY: &'static str = "filesystem";

    fn validate(&self) -> Result<(), String> {
        if let Some(bad) = self
            .exclude_mount_points
            .iter()
            .find(|m| !m.starts_with('/'))
        {
            return Err(format!("exclude_mount_points entry '{}' is not absolute", bad));
        }
        super::check_names("exclude_fs_types", &self.exclude_fs_types)
    }
}

pub struct FilesystemScraper {
    config: FilesystemConfig,
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
}

impl FilesystemScraper {
    pub fn new(config: FilesystemConfig, settings: &ScraperSettings) -> Self {
        Self {
            config,
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
        }
    }

    fn wanted(&self, mount: &MountEntry) -> bool {
        if !self.config.include_virtual_filesystems
            && VIRTUAL_FS_TYPES.contains(&mount.fs_type.as_str())
        {
            return false;
        }
        !self.config.exclude_fs_types.contains(&mount.fs_type)
            && !self.config.exclude_mount_points.contains(&mount.mount_point)
    }
}

impl Scraper for FilesystemScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        read_proc(self.fs.as_ref(), &self.paths, "self/mounts").map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let mounts = parse_mounts(&read_proc(self.fs.as_ref(), &self.paths, "self/mounts")?);

        let mut output = ScrapeOutput::default();
        let mut mb = MetricsBuilder::new(Utc::now());
        for mount in mounts.iter().filter(|m| self.wanted(m)) {
            ctx.check()?;

            let stat = match self.fs.statvfs(&self.paths.host_file(&mount.mount_point)) {
                Ok(stat) => stat,
                Err(e) => {
                    trace!(mountpoint = %mount.mount_point, error = %e, "statvfs failed");
                    output.push_failure(mount.mount_point.clone(), e);
                    continue;
                }
            };
            if stat.blocks == 0 {
                continue;
            }

            let mode = if mount.read_only || stat.read_only { "ro" } else { "rw" };
            let attrs = |state: &'static str| {
                [
                    ("device", mount.device.as_str()),
                    ("mountpoint", mount.mount_point.as_str()),
                    ("type", mount.fs_type.as_str()),
                    ("mode", mode),
                    ("state", state),
                ]
            };

            mb.record(&FS_USAGE, &attrs("used"), stat.used_bytes());
            mb.record(&FS_USAGE, &attrs("free"), stat.free_bytes());
            mb.record(&FS_USAGE, &attrs("reserved"), stat.reserved_bytes());
            mb.record(
                &FS_INODES_USAGE,
                &attrs("used"),
                stat.files.saturating_sub(stat.files_free),
            );
            mb.record(&FS_INODES_USAGE, &attrs("free"), stat.files_free);

            let usable = stat.used_bytes() + stat.free_bytes();
            if usable > 0 {
                let [device, mountpoint, fs_type, mode, _] = attrs("used");
                mb.record(
                    &FS_UTILIZATION,
                    &[device, mountpoint, fs_type, mode],
                    stat.used_bytes() as f64 / usable as f64,
                );
            }
        }

        output.metrics = mb.finish();
        Ok(output)
    }
}
