//! Pre-built mock hosts for testing.
//!
//! Each scenario lays out a realistic `/proc` plus the few `/etc` files
//! the host-identity code reads.

use super::filesystem::MockFs;
use crate::platform::traits::FsStat;

/// Boot time (`btime`) shared by every scenario.
pub const SCENARIO_BOOT_TIME: u64 = 1_700_000_000;

const SYSTEMD_STAT: &str = "1 (systemd) S 0 1 1 0 -1 4194560 50000 1000000 100 500 1000 500 2000 1000 20 0 1 0 1 170000000 3000 18446744073709551615 0 0 0 0 0 0 0 0 1073745152 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
const SYSTEMD_STATUS: &str = "\
Name:\tsystemd
Pid:\t1
PPid:\t0
Uid:\t0\t0\t0\t0
Gid:\t0\t0\t0\t0
VmSize:\t  170000 kB
VmRSS:\t    12000 kB
voluntary_ctxt_switches:\t1000
nonvoluntary_ctxt_switches:\t100
";

const BASH_STAT: &str = "1000 (bash) S 999 1000 1000 34816 1001 4194304 5000 50000 0 0 100 50 200 100 20 0 1 0 100000 25000000 2000 18446744073709551615 0 0 0 0 0 0 65536 3670020 1266777851 0 0 0 17 2 0 0 0 0 0 0 0 0 0 0 0 0 0";
const BASH_STATUS: &str = "\
Name:\tbash
Pid:\t1000
PPid:\t999
Uid:\t1000\t1000\t1000\t1000
Gid:\t1000\t1000\t1000\t1000
VmSize:\t   25000 kB
VmRSS:\t    8000 kB
voluntary_ctxt_switches:\t500
nonvoluntary_ctxt_switches:\t50
";

const CAT_STAT: &str = "1001 (cat) R 1000 1000 1000 34816 1001 4194304 100 0 0 0 5 2 0 0 20 0 1 0 100100 5000000 500 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0 0 0 0 0 0 0 0 0";
const CAT_STATUS: &str = "\
Name:\tcat
Pid:\t1001
PPid:\t1000
Uid:\t1000\t1000\t1000\t1000
Gid:\t1000\t1000\t1000\t1000
VmSize:\t    5000 kB
VmRSS:\t    2000 kB
voluntary_ctxt_switches:\t10
nonvoluntary_ctxt_switches:\t2
";

fn io_content(rchar: u64, wchar: u64, read_bytes: u64, write_bytes: u64) -> String {
    format!(
        "rchar: {rchar}\nwchar: {wchar}\nsyscr: 0\nsyscw: 0\nread_bytes: {read_bytes}\nwrite_bytes: {write_bytes}\ncancelled_write_bytes: 0\n"
    )
}

impl MockFs {
    /// A quiet four-core host with three processes, two block devices
    /// with a partition, two network interfaces and two real mounts.
    pub fn typical_system() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/sys/kernel/hostname", "testhost\n");
        fs.add_file("/etc/machine-id", "0123456789abcdef0123456789abcdef\n");
        fs.add_file(
            "/etc/os-release",
            "\
NAME=\"Debian GNU/Linux\"
VERSION_ID=\"12\"
PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"
ID=debian
",
        );

        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
Slab:             512000 kB
SReclaimable:     256000 kB
SUnreclaim:       256000 kB
",
        );
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/diskstats",
            "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
",
        );
        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 12345678     9876    0    0    0     0          0         0 12345678     9876    0    0    0     0       0          0
  eth0: 987654321   654321    5   10    0     0          0       100 123456789   456789    2    5    0     0       0          0
",
        );
        fs.add_file(
            "/proc/vmstat",
            "\
pgpgin 123456
pgpgout 654321
pswpin 100
pswpout 200
pgfault 999999
pgmajfault 1234
oom_kill 0
",
        );
        fs.add_file(
            "/proc/self/mounts",
            "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /run tmpfs rw,nosuid,nodev,size=1638400k 0 0
/dev/nvme0n1 /data xfs ro,relatime 0 0
",
        );
        fs.add_mount(
            "/",
            FsStat {
                block_size: 4096,
                blocks: 25_000_000,
                blocks_free: 10_000_000,
                blocks_available: 9_000_000,
                files: 6_000_000,
                files_free: 5_000_000,
                read_only: false,
            },
        );
        fs.add_mount(
            "/data",
            FsStat {
                block_size: 4096,
                blocks: 100_000_000,
                blocks_free: 60_000_000,
                blocks_available: 60_000_000,
                files: 50_000_000,
                files_free: 49_000_000,
                read_only: true,
            },
        );
        fs.add_mount(
            "/run",
            FsStat {
                block_size: 4096,
                blocks: 409_600,
                blocks_free: 409_000,
                blocks_available: 409_000,
                files: 100_000,
                files_free: 99_000,
                read_only: false,
            },
        );

        fs.add_process(
            1,
            SYSTEMD_STAT,
            SYSTEMD_STATUS,
            &io_content(100_000_000, 50_000_000, 10_000_000, 5_000_000),
            64,
        );
        fs.add_process(
            1000,
            BASH_STAT,
            BASH_STATUS,
            &io_content(1_000_000, 500_000, 100_000, 50_000),
            4,
        );
        fs.add_process(
            1001,
            CAT_STAT,
            CAT_STATUS,
            &io_content(10_000, 10_000, 4096, 4096),
            3,
        );

        fs
    }

    /// The typical host with all four CPUs busy and a high load average.
    pub fn high_cpu_load() -> Self {
        let fs = Self::typical_system();

        fs.add_file(
            "/proc/stat",
            "\
cpu  80000 1000 15000 5000 500 1000 500 0 0 0
cpu0 20000 250 3750 1250 125 250 125 0 0 0
cpu1 20000 250 3750 1250 125 250 125 0 0 0
cpu2 20000 250 3750 1250 125 250 125 0 0 0
cpu3 20000 250 3750 1250 125 250 125 0 0 0
ctxt 2000000
btime 1700000000
processes 50000
procs_running 8
procs_blocked 2
",
        );
        fs.add_file("/proc/loadavg", "4.50 3.20 2.10 8/200 5000\n");

        fs
    }

    /// The typical host with little free memory and swap in use.
    pub fn memory_pressure() -> Self {
        let fs = Self::typical_system();

        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:          256000 kB
MemAvailable:     512000 kB
Buffers:           64000 kB
Cached:           256000 kB
SwapCached:       128000 kB
SwapTotal:       4096000 kB
SwapFree:        1024000 kB
Slab:             128000 kB
SReclaimable:      64000 kB
SUnreclaim:        64000 kB
",
        );
        fs.add_file(
            "/proc/vmstat",
            "\
pgpgin 5000000
pgpgout 8000000
pswpin 400000
pswpout 900000
pgfault 99999999
pgmajfault 250000
oom_kill 3
",
        );

        fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::traits::FileSystem;
    use std::path::Path;

    #[test]
    fn test_typical_system_layout() {
        let fs = MockFs::typical_system();
        assert!(fs.exists(Path::new("/proc/1/stat")));
        assert!(fs.exists(Path::new("/proc/1000/io")));
        assert_eq!(fs.read_dir(Path::new("/proc/1/fd")).unwrap().len(), 64);
        assert!(fs.statvfs(Path::new("/data")).unwrap().read_only);
    }

    #[test]
    fn test_scenarios_override_typical_files() {
        let fs = MockFs::memory_pressure();
        let meminfo = fs.read_to_string(Path::new("/proc/meminfo")).unwrap();
        assert!(meminfo.contains("SwapFree:        1024000 kB"));

        let fs = MockFs::high_cpu_load();
        let loadavg = fs.read_to_string(Path::new("/proc/loadavg")).unwrap();
        assert!(loadavg.starts_with("4.50"));
    }
}
