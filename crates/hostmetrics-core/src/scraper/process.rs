//! Per-process resource usage, from `/proc/[pid]/`.
//!
//! Processes exit while they are being read; a process whose `stat` is gone
//! is skipped silently. Files that exist but cannot be read or parsed are
//! reported as sub-failures.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::trace;

use super::handlecount::{HandleCountError, HandleCountManager, ProcFdHandleCounts};
use super::{
    DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings,
    check_names, name_allowed,
};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::{parse_proc_io, parse_proc_stat, parse_proc_status};
use crate::platform::procfs::{CLK_TCK, HostPaths, PAGE_SIZE};
use crate::platform::shared::SharedOptimizations;
use crate::platform::traits::FileSystem;

const PROCESS_CPU_TIME: MetricDef = MetricDef::sum(
    "process.cpu.time",
    "Total CPU seconds broken down by different states.",
    "s",
    true,
);
const PROCESS_MEMORY_USAGE: MetricDef = MetricDef::sum(
    "process.memory.usage",
    "The amount of physical memory in use.",
    "By",
    false,
);
const PROCESS_MEMORY_VIRTUAL: MetricDef = MetricDef::sum(
    "process.memory.virtual",
    "Virtual memory size.",
    "By",
    false,
);
const PROCESS_DISK_IO: MetricDef =
    MetricDef::sum("process.disk.io", "Disk bytes transferred.", "By", true);
const PROCESS_THREADS: MetricDef =
    MetricDef::sum("process.threads", "Process threads count.", "{threads}", false);
const PROCESS_PAGING_FAULTS: MetricDef = MetricDef::sum(
    "process.paging.faults",
    "Number of page faults the process has made.",
    "{faults}",
    true,
);
const PROCESS_CONTEXT_SWITCHES: MetricDef = MetricDef::sum(
    "process.context_switches",
    "Number of times the process has been context switched.",
    "{count}",
    true,
);
const PROCESS_OPEN_FDS: MetricDef = MetricDef::sum(
    "process.open_file_descriptors",
    "Number of file descriptors in use by the process.",
    "{count}",
    false,
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    /// Only processes whose name is listed. Empty means all.
    pub include_names: Vec<String>,
    /// Do not report unreadable `/proc/[pid]/io` (needs privileges for
    /// other users' processes).
    pub mute_process_io_error: bool,
    /// Report `process.open_file_descriptors`.
    pub handle_count: bool,
}

impl DomainConfig for ProcessConfig {
    const KEY: &'static str = "process";

    fn validate(&self) -> Result<(), String> {
        check_names("include_names", &self.include_names)
    }
}

pub struct ProcessScraper {
    config: ProcessConfig,
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
    shared: Arc<SharedOptimizations>,
    handles: Option<Box<dyn HandleCountManager>>,
}

impl ProcessScraper {
    pub fn new(config: ProcessConfig, settings: &ScraperSettings) -> Self {
        let handles = config.handle_count.then(|| {
            Box::new(ProcFdHandleCounts::new(
                Arc::clone(&settings.fs),
                settings.paths.clone(),
            )) as Box<dyn HandleCountManager>
        });
        Self {
            config,
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
            shared: Arc::clone(&settings.shared),
            handles,
        }
    }

    /// Replaces the handle-count source.
    pub fn with_handle_manager(mut self, manager: Box<dyn HandleCountManager>) -> Self {
        self.handles = Some(manager);
        self
    }

    fn list_pids(&self) -> Result<Vec<u32>, ScrapeError> {
        let entries = self
            .fs
            .read_dir(&self.paths.proc)
            .map_err(|e| ScrapeError::Read {
                path: self.paths.proc.clone(),
                source: e,
            })?;
        let mut pids: Vec<u32> = entries
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn read_pid_file(&self, pid: u32, name: &str) -> std::io::Result<String> {
        self.fs
            .read_to_string(&self.paths.proc.join(pid.to_string()).join(name))
    }

    fn process_start(&self, boot: Option<DateTime<Utc>>, starttime: u64) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(starttime.saturating_mul(1000) / CLK_TCK).ok()?;
        boot.map(|b| b + Duration::milliseconds(millis))
    }
}

impl Scraper for ProcessScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        self.list_pids().map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let mut output = ScrapeOutput::default();

        // One refresh per cycle, before any lookup.
        let mut handles_ready = false;
        if let Some(handles) = self.handles.as_mut() {
            match handles.refresh() {
                Ok(()) => handles_ready = true,
                Err(e) => output.push_failure("handles", e),
            }
        }

        let pids = self.list_pids()?;
        let boot = self.shared.boot_datetime(self.fs.as_ref(), &self.paths);
        let mut mb = MetricsBuilder::new(Utc::now());

        for pid in pids {
            ctx.check()?;

            let stat = match self.read_pid_file(pid, "stat") {
                Ok(content) => match parse_proc_stat(&content) {
                    Ok(stat) => stat,
                    Err(e) => {
                        output.push_failure(format!("pid {}", pid), e);
                        continue;
                    }
                },
                Err(e) => {
                    trace!(pid, error = %e, "process vanished");
                    continue;
                }
            };
            if !name_allowed(&stat.comm, &self.config.include_names, &[]) {
                continue;
            }

            let pid_str = pid.to_string();
            let id = [
                ("process.pid", pid_str.as_str()),
                ("process.executable.name", stat.comm.as_str()),
            ];
            let with = |key: &'static str, value: &'static str| [id[0], id[1], (key, value)];

            mb.set_start_time(self.process_start(boot, stat.starttime));
            mb.record(
                &PROCESS_CPU_TIME,
                &with("state", "user"),
                stat.utime as f64 / CLK_TCK as f64,
            );
            mb.record(
                &PROCESS_CPU_TIME,
                &with("state", "system"),
                stat.stime as f64 / CLK_TCK as f64,
            );
            mb.record(&PROCESS_MEMORY_USAGE, &id, stat.rss.saturating_mul(PAGE_SIZE));
            mb.record(&PROCESS_MEMORY_VIRTUAL, &id, stat.vsize);
            mb.record(&PROCESS_THREADS, &id, stat.num_threads);
            mb.record(&PROCESS_PAGING_FAULTS, &with("type", "major"), stat.majflt);
            mb.record(&PROCESS_PAGING_FAULTS, &with("type", "minor"), stat.minflt);

            match self
                .read_pid_file(pid, "status")
                .map_err(ScrapeError::from)
                .and_then(|c| parse_proc_status(&c).map_err(ScrapeError::from))
            {
                Ok(status) => {
                    mb.record(
                        &PROCESS_CONTEXT_SWITCHES,
                        &with("type", "voluntary"),
                        status.voluntary_ctxt_switches,
                    );
                    mb.record(
                        &PROCESS_CONTEXT_SWITCHES,
                        &with("type", "involuntary"),
                        status.nonvoluntary_ctxt_switches,
                    );
                }
                Err(e) => output.push_failure(format!("pid {} status", pid), e),
            }

            match self
                .read_pid_file(pid, "io")
                .map_err(ScrapeError::from)
                .and_then(|c| parse_proc_io(&c).map_err(ScrapeError::from))
            {
                Ok(io) => {
                    mb.record(&PROCESS_DISK_IO, &with("direction", "read"), io.read_bytes);
                    mb.record(&PROCESS_DISK_IO, &with("direction", "write"), io.write_bytes);
                }
                Err(e) if !self.config.mute_process_io_error => {
                    output.push_failure(format!("pid {} io", pid), e)
                }
                Err(_) => {}
            }

            if handles_ready && let Some(handles) = self.handles.as_ref() {
                match handles.process_handle_count(pid) {
                    Ok(count) => mb.record(&PROCESS_OPEN_FDS, &id, count),
                    Err(HandleCountError::NotFound(_)) => {
                        trace!(pid, "process started after handle refresh")
                    }
                    Err(e) => output.push_failure(format!("pid {} handles", pid), e),
                }
            }
        }

        output.metrics = mb.finish();
        Ok(output)
    }

    fn shutdown(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        self.handles = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdata::{Metric, NumberValue};
    use crate::platform::mock::MockFs;
    use crate::scraper::test_support::settings;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn scrape(fs: &MockFs, config: ProcessConfig) -> ScrapeOutput {
        let mut scraper = ProcessScraper::new(config, &settings(fs));
        let ctx = ScrapeContext::background();
        scraper.start(&ctx).unwrap();
        scraper.scrape(&ctx).unwrap()
    }

    fn metric<'a>(output: &'a ScrapeOutput, name: &str) -> &'a Metric {
        output.metrics.iter().find(|m| m.name == name).unwrap()
    }

    #[test]
    fn test_process_resource_usage() {
        let fs = MockFs::typical_system();
        let output = scrape(&fs, ProcessConfig::default());
        assert!(!output.is_partial());

        let cpu = metric(&output, "process.cpu.time");
        let systemd_user = cpu.point(&[("process.pid", "1"), ("state", "user")]).unwrap();
        assert_eq!(systemd_user.value, NumberValue::Double(10.0));
        assert_eq!(systemd_user.attribute("process.executable.name"), Some("systemd"));

        let rss = metric(&output, "process.memory.usage");
        let bash = rss.point(&[("process.pid", "1000")]).unwrap();
        assert_eq!(bash.value, NumberValue::Int(2000 * 4096));

        let faults = metric(&output, "process.paging.faults");
        let major = faults.point(&[("process.pid", "1"), ("type", "major")]).unwrap();
        assert_eq!(major.value, NumberValue::Int(100));

        let switches = metric(&output, "process.context_switches");
        let cat = switches
            .point(&[("process.pid", "1001"), ("type", "voluntary")])
            .unwrap();
        assert_eq!(cat.value, NumberValue::Int(10));

        assert!(output.metrics.iter().all(|m| m.name != "process.open_file_descriptors"));
    }

    #[test]
    fn test_start_time_from_boot_time() {
        let fs = MockFs::typical_system();
        let output = scrape(&fs, ProcessConfig::default());
        let threads = metric(&output, "process.threads");
        let bash = threads.point(&[("process.pid", "1000")]).unwrap();
        // starttime 100000 jiffies after boot
        let expected = crate::platform::mock::SCENARIO_BOOT_TIME as i64 + 1000;
        assert_eq!(bash.start_time.unwrap().timestamp(), expected);
    }

    #[test]
    fn test_include_names() {
        let fs = MockFs::typical_system();
        let output = scrape(
            &fs,
            ProcessConfig {
                include_names: vec!["bash".into()],
                ..Default::default()
            },
        );
        let threads = metric(&output, "process.threads");
        assert_eq!(threads.data_points.len(), 1);
        assert_eq!(threads.data_points[0].attribute("process.pid"), Some("1000"));
    }

    #[test]
    fn test_unreadable_io() {
        let fs = MockFs::typical_system();
        fs.remove("/proc/1/io");

        let output = scrape(&fs, ProcessConfig::default());
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].component, "pid 1 io");

        let output = scrape(
            &fs,
            ProcessConfig {
                mute_process_io_error: true,
                ..Default::default()
            },
        );
        assert!(!output.is_partial());
        let io = metric(&output, "process.disk.io");
        assert!(io.point(&[("process.pid", "1")]).is_none());
    }

    #[test]
    fn test_vanished_process_skipped() {
        let fs = MockFs::typical_system();
        fs.remove("/proc/1001/stat");
        let output = scrape(&fs, ProcessConfig::default());
        assert!(!output.is_partial());
        let threads = metric(&output, "process.threads");
        assert_eq!(threads.data_points.len(), 2);
    }

    #[test]
    fn test_open_file_descriptors() {
        let fs = MockFs::typical_system();
        let output = scrape(
            &fs,
            ProcessConfig {
                handle_count: true,
                ..Default::default()
            },
        );
        let fds = metric(&output, "process.open_file_descriptors");
        assert_eq!(
            fds.point(&[("process.pid", "1")]).unwrap().value,
            NumberValue::Int(64)
        );
        assert_eq!(
            fds.point(&[("process.pid", "1001")]).unwrap().value,
            NumberValue::Int(3)
        );
    }

    #[derive(Clone, Default)]
    struct RecordingHandles {
        calls: Arc<Mutex<Vec<String>>>,
        counts: HashMap<u32, u32>,
    }

    impl HandleCountManager for RecordingHandles {
        fn refresh(&mut self) -> Result<(), HandleCountError> {
            self.calls.lock().unwrap().push("refresh".into());
            self.counts = HashMap::from([(1, 7), (1000, 8)]);
            Ok(())
        }

        fn process_handle_count(&self, pid: u32) -> Result<u32, HandleCountError> {
            self.calls.lock().unwrap().push(format!("lookup {}", pid));
            self.counts
                .get(&pid)
                .copied()
                .ok_or(HandleCountError::NotFound(pid))
        }
    }

    #[test]
    fn test_refresh_once_before_lookups() {
        let fs = MockFs::typical_system();
        let handles = RecordingHandles::default();
        let calls = Arc::clone(&handles.calls);
        let mut scraper = ProcessScraper::new(ProcessConfig::default(), &settings(&fs))
            .with_handle_manager(Box::new(handles));
        let ctx = ScrapeContext::background();
        scraper.start(&ctx).unwrap();

        let output = scraper.scrape(&ctx).unwrap();
        // pid 1001 was not in the snapshot: skipped, not a failure
        assert!(!output.is_partial());
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["refresh", "lookup 1", "lookup 1000", "lookup 1001"]
        );

        scraper.scrape(&ctx).unwrap();
        let refreshes = calls.lock().unwrap().iter().filter(|c| *c == "refresh").count();
        assert_eq!(refreshes, 2);
    }

    #[test]
    fn test_cancelled_mid_scan() {
        let fs = MockFs::typical_system();
        let mut scraper = ProcessScraper::new(ProcessConfig::default(), &settings(&fs));
        let token = crate::scraper::CancelToken::new();
        token.cancel();
        assert!(matches!(
            scraper.scrape(&ScrapeContext::new(token)),
            Err(ScrapeError::Cancelled)
        ));
    }
}
