//! Parsers for `/proc` (and a couple of `/etc`) files.
//!
//! These are pure functions over file contents. Missing optional keys parse
//! as zero; structurally broken input is a `ParseError`.

use std::collections::HashMap;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

fn field_u64(parts: &[&str], idx: usize) -> u64 {
    parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0)
}

// ============ /proc/[pid]/stat ============

/// The subset of `/proc/[pid]/stat` the process scraper reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub minflt: u64,
    pub majflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: u64,
    /// Start time in clock ticks after boot.
    pub starttime: u64,
    pub vsize: u64,
    /// Resident set size in pages.
    pub rss: u64,
}

/// Parses `/proc/[pid]/stat` content.
///
/// `comm` may contain spaces and parentheses, so fields are located relative
/// to the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    // fields[0] is field 3 (state) of proc(5).
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 22+, got {}",
            fields.len()
        )));
    }

    let rss: i64 = fields[21]
        .parse()
        .map_err(|_| ParseError::new("invalid rss"))?;

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: field_u64(&fields, 1) as u32,
        minflt: field_u64(&fields, 7),
        majflt: field_u64(&fields, 9),
        utime: field_u64(&fields, 11),
        stime: field_u64(&fields, 12),
        num_threads: field_u64(&fields, 17),
        starttime: field_u64(&fields, 19),
        vsize: field_u64(&fields, 20),
        rss: rss.max(0) as u64,
    })
}

// ============ /proc/[pid]/status ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStatus {
    pub name: String,
    pub uid: u32,
    pub voluntary_ctxt_switches: u64,
    pub nonvoluntary_ctxt_switches: u64,
}

/// Parses `/proc/[pid]/status` content.
pub fn parse_proc_status(content: &str) -> Result<ProcStatus, ParseError> {
    let mut status = ProcStatus::default();
    let mut saw_name = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => {
                status.name = value.to_string();
                saw_name = true;
            }
            "Uid" => {
                status.uid = value
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
            }
            "voluntary_ctxt_switches" => {
                status.voluntary_ctxt_switches = value.parse().unwrap_or(0);
            }
            "nonvoluntary_ctxt_switches" => {
                status.nonvoluntary_ctxt_switches = value.parse().unwrap_or(0);
            }
            _ => {}
        }
    }

    if !saw_name {
        return Err(ParseError::new("missing Name in status"));
    }
    Ok(status)
}

// ============ /proc/[pid]/io ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcIo {
    pub rchar: u64,
    pub wchar: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Parses `/proc/[pid]/io` content.
pub fn parse_proc_io(content: &str) -> Result<ProcIo, ParseError> {
    let mut io = ProcIo::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value: u64 = value.trim().parse().unwrap_or(0);
        match key {
            "rchar" => io.rchar = value,
            "wchar" => io.wchar = value,
            "read_bytes" => io.read_bytes = value,
            "write_bytes" => io.write_bytes = value,
            _ => {}
        }
    }

    Ok(io)
}

// ============ /proc/meminfo ============

/// Parsed `/proc/meminfo`; all values in kB as the kernel reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
    pub swap_cached: u64,
    pub s_reclaimable: u64,
    pub s_unreclaim: u64,
}

/// Parses `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let mut saw_total = false;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let value = field_u64(&parts, 1);
        match parts[0] {
            "MemTotal:" => {
                info.mem_total = value;
                saw_total = true;
            }
            "MemFree:" => info.mem_free = value,
            "MemAvailable:" => info.mem_available = value,
            "Buffers:" => info.buffers = value,
            "Cached:" => info.cached = value,
            "SwapTotal:" => info.swap_total = value,
            "SwapFree:" => info.swap_free = value,
            "SwapCached:" => info.swap_cached = value,
            "SReclaimable:" => info.s_reclaimable = value,
            "SUnreclaim:" => info.s_unreclaim = value,
            _ => {}
        }
    }

    if !saw_total {
        return Err(ParseError::new("missing MemTotal in meminfo"));
    }
    Ok(info)
}

// ============ /proc/stat ============

/// Jiffy counters of one `cpu` line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStat {
    /// `None` for the aggregate `cpu` line.
    pub cpu_id: Option<u32>,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStat {
    pub cpus: Vec<CpuStat>,
    pub ctxt: u64,
    pub btime: u64,
    pub processes: u64,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

impl GlobalStat {
    /// Per-CPU lines, without the aggregate.
    pub fn per_cpu(&self) -> impl Iterator<Item = &CpuStat> {
        self.cpus.iter().filter(|c| c.cpu_id.is_some())
    }
}

/// Parses `/proc/stat` content.
pub fn parse_global_stat(content: &str) -> Result<GlobalStat, ParseError> {
    let mut stat = GlobalStat::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&key) = parts.first() else {
            continue;
        };

        if let Some(suffix) = key.strip_prefix("cpu") {
            let cpu_id = if suffix.is_empty() {
                None
            } else {
                Some(
                    suffix
                        .parse()
                        .map_err(|_| ParseError::new(format!("invalid cpu line '{}'", key)))?,
                )
            };
            stat.cpus.push(CpuStat {
                cpu_id,
                user: field_u64(&parts, 1),
                nice: field_u64(&parts, 2),
                system: field_u64(&parts, 3),
                idle: field_u64(&parts, 4),
                iowait: field_u64(&parts, 5),
                irq: field_u64(&parts, 6),
                softirq: field_u64(&parts, 7),
                steal: field_u64(&parts, 8),
            });
            continue;
        }

        let value = field_u64(&parts, 1);
        match key {
            "ctxt" => stat.ctxt = value,
            "btime" => stat.btime = value,
            "processes" => stat.processes = value,
            "procs_running" => stat.procs_running = value,
            "procs_blocked" => stat.procs_blocked = value,
            _ => {}
        }
    }

    if stat.cpus.is_empty() {
        return Err(ParseError::new("no cpu lines in stat"));
    }
    Ok(stat)
}

// ============ /proc/loadavg ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub running: u32,
    pub total: u32,
}

/// Parses `/proc/loadavg` content.
pub fn parse_loadavg(content: &str) -> Result<LoadAvg, ParseError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ParseError::new("invalid loadavg format"));
    }

    let parse_load = |idx: usize, name: &str| -> Result<f64, ParseError> {
        parts[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    // Format: running/total
    let (running, total) = parts[3]
        .split_once('/')
        .map(|(r, t)| (r.parse().unwrap_or(0), t.parse().unwrap_or(0)))
        .unwrap_or((0, 0));

    Ok(LoadAvg {
        load1: parse_load(0, "load1")?,
        load5: parse_load(1, "load5")?,
        load15: parse_load(2, "load15")?,
        running,
        total,
    })
}

// ============ /proc/diskstats ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStats {
    pub major: u32,
    pub minor: u32,
    pub device: String,
    pub reads: u64,
    pub r_merged: u64,
    pub read_sectors: u64,
    /// Milliseconds spent reading.
    pub read_time: u64,
    pub writes: u64,
    pub w_merged: u64,
    pub write_sectors: u64,
    /// Milliseconds spent writing.
    pub write_time: u64,
    pub io_in_progress: u64,
    /// Milliseconds the device had I/O queued.
    pub io_time: u64,
}

/// Parses `/proc/diskstats` content. Malformed lines are skipped.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged w_sectors w_time io_pending io_time w_io_time [discards ...]
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskStats>, ParseError> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 {
            continue;
        }

        disks.push(DiskStats {
            major: field_u64(&parts, 0) as u32,
            minor: field_u64(&parts, 1) as u32,
            device: parts[2].to_string(),
            reads: field_u64(&parts, 3),
            r_merged: field_u64(&parts, 4),
            read_sectors: field_u64(&parts, 5),
            read_time: field_u64(&parts, 6),
            writes: field_u64(&parts, 7),
            w_merged: field_u64(&parts, 8),
            write_sectors: field_u64(&parts, 9),
            write_time: field_u64(&parts, 10),
            io_in_progress: field_u64(&parts, 11),
            io_time: field_u64(&parts, 12),
        });
    }

    Ok(disks)
}

// ============ /proc/net/dev ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetDevStats {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errs: u64,
    pub rx_drop: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errs: u64,
    pub tx_drop: u64,
}

/// Parses `/proc/net/dev` content.
///
/// Format:
/// Inter-|   Receive                                                |  Transmit
///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
///    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
pub fn parse_net_dev(content: &str) -> Result<Vec<NetDevStats>, ParseError> {
    let mut devices = Vec::new();

    for line in content.lines() {
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }

        let Some((interface, counters)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<&str> = counters.split_whitespace().collect();
        if values.len() < 16 {
            continue;
        }

        devices.push(NetDevStats {
            interface: interface.trim().to_string(),
            rx_bytes: field_u64(&values, 0),
            rx_packets: field_u64(&values, 1),
            rx_errs: field_u64(&values, 2),
            rx_drop: field_u64(&values, 3),
            tx_bytes: field_u64(&values, 8),
            tx_packets: field_u64(&values, 9),
            tx_errs: field_u64(&values, 10),
            tx_drop: field_u64(&values, 11),
        });
    }

    Ok(devices)
}

// ============ /proc/vmstat ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmstatInfo {
    pub pgpgin: u64,
    pub pgpgout: u64,
    pub pswpin: u64,
    pub pswpout: u64,
    pub pgfault: u64,
    pub pgmajfault: u64,
}

/// Parses `/proc/vmstat` content.
///
/// Format: key value (one per line)
pub fn parse_vmstat(content: &str) -> Result<VmstatInfo, ParseError> {
    let mut info = VmstatInfo::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let value = field_u64(&parts, 1);
        match parts[0] {
            "pgpgin" => info.pgpgin = value,
            "pgpgout" => info.pgpgout = value,
            "pswpin" => info.pswpin = value,
            "pswpout" => info.pswpout = value,
            "pgfault" => info.pgfault = value,
            "pgmajfault" => info.pgmajfault = value,
            _ => {}
        }
    }

    Ok(info)
}

// ============ /proc/uptime ============

/// Parses `/proc/uptime` and returns seconds since boot.
pub fn parse_uptime(content: &str) -> Result<f64, ParseError> {
    content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty uptime"))?
        .parse()
        .map_err(|_| ParseError::new("invalid uptime"))
}

// ============ /proc/self/mounts ============

#[derive(Debug, Clone, PartialEq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub read_only: bool,
}

/// Parses `/proc/self/mounts` (fstab format). Octal escapes such as `\040`
/// in mount points are decoded.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mount_point = parts.next()?;
            let fs_type = parts.next()?;
            let options = parts.next().unwrap_or("");
            Some(MountEntry {
                device: unescape_octal(device),
                mount_point: unescape_octal(mount_point),
                fs_type: fs_type.to_string(),
                read_only: options.split(',').any(|o| o == "ro"),
            })
        })
        .collect()
}

fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(digits) = bytes.get(i + 1..i + 4)
            && digits.iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = digits
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ============ /etc/os-release ============

/// Parses `/etc/os-release` into a key/value map with quotes stripped.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}
