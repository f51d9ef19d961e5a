//! Readers for the Linux `/proc` filesystem.
//!
//! `parser` holds the pure parsers; `HostPaths` decides where `/proc`,
//! `/sys` and `/etc` live for this receiver (they move when the receiver
//! watches a host from inside a container).

pub mod parser;

use std::path::{Path, PathBuf};

use crate::platform::traits::{Environment, FileSystem};
use crate::scraper::ScrapeError;

/// Clock ticks per second (USER_HZ). Standard value for Linux.
pub const CLK_TCK: u64 = 100;

/// Size of a `/proc/diskstats` sector in bytes, regardless of the device.
pub const SECTOR_SIZE: u64 = 512;

/// Resident set sizes in `/proc/[pid]/stat` are in pages.
pub const PAGE_SIZE: u64 = 4096;

const ENV_HOST_PROC: &str = "HOST_PROC";
const ENV_HOST_SYS: &str = "HOST_SYS";
const ENV_HOST_ETC: &str = "HOST_ETC";

/// Error for a `root_path` that contradicts an environment override.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictingRootPath {
    pub variable: &'static str,
    pub configured: PathBuf,
    pub environment: String,
}

impl std::fmt::Display for ConflictingRootPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "root_path resolves {} to {} but the environment sets {}",
            self.variable,
            self.configured.display(),
            self.environment
        )
    }
}

impl std::error::Error for ConflictingRootPath {}

/// Locations of the pseudo filesystems scrapers read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Host root that mount points are resolved under.
    pub root: PathBuf,
    pub proc: PathBuf,
    pub sys: PathBuf,
    pub etc: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            proc: PathBuf::from("/proc"),
            sys: PathBuf::from("/sys"),
            etc: PathBuf::from("/etc"),
        }
    }
}

impl HostPaths {
    /// Resolves paths from an optional `root_path` and the `HOST_*`
    /// environment overrides.
    ///
    /// With a root path, every location is nested under it and an
    /// environment override pointing elsewhere is an error. Without one,
    /// overrides win over the defaults.
    pub fn resolve(
        root_path: Option<&Path>,
        env: &dyn Environment,
    ) -> Result<Self, ConflictingRootPath> {
        let defaults = Self::default();
        let resolve_one = |variable: &'static str, default: &Path| match root_path {
            Some(root) => {
                let configured = root.join(default.strip_prefix("/").unwrap_or(default));
                match env.lookup(variable) {
                    Some(value) if Path::new(&value) != configured => Err(ConflictingRootPath {
                        variable,
                        configured,
                        environment: value,
                    }),
                    _ => Ok(configured),
                }
            }
            None => Ok(env
                .lookup(variable)
                .map(PathBuf::from)
                .unwrap_or_else(|| default.to_path_buf())),
        };

        Ok(Self {
            root: root_path.map_or(defaults.root.clone(), Path::to_path_buf),
            proc: resolve_one(ENV_HOST_PROC, defaults.proc.as_path())?,
            sys: resolve_one(ENV_HOST_SYS, defaults.sys.as_path())?,
            etc: resolve_one(ENV_HOST_ETC, defaults.etc.as_path())?,
        })
    }

    pub fn proc_file(&self, relative: &str) -> PathBuf {
        self.proc.join(relative)
    }

    pub fn etc_file(&self, relative: &str) -> PathBuf {
        self.etc.join(relative)
    }

    /// Maps an absolute host path (a mount point) under the root.
    pub fn host_file(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }
}

/// Reads a `/proc` file relative to the configured proc root.
pub fn read_proc(
    fs: &dyn FileSystem,
    paths: &HostPaths,
    relative: &str,
) -> Result<String, ScrapeError> {
    let path = paths.proc_file(relative);
    fs.read_to_string(&path)
        .map_err(|e| ScrapeError::Read { path, source: e })
}
