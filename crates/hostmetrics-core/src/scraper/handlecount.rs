//! Open-handle counts per process, refreshed once per process-scraper cycle.
//!
//! On Linux a process's handles are the entries of `/proc/[pid]/fd`. The
//! whole table is counted in one pass on `refresh`; lookups afterwards read
//! that snapshot, so counts stay consistent for the rest of the cycle even
//! if processes come and go.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::platform::procfs::HostPaths;
use crate::platform::traits::FileSystem;

#[derive(Debug)]
pub enum HandleCountError {
    /// Lookup before the first refresh.
    NotRefreshed,
    /// The process was not present at the last refresh.
    NotFound(u32),
    Io(std::io::Error),
}

impl std::fmt::Display for HandleCountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleCountError::NotRefreshed => write!(f, "handle counts not refreshed yet"),
            HandleCountError::NotFound(pid) => write!(f, "no handle count for process {}", pid),
            HandleCountError::Io(e) => write!(f, "failed to list processes: {}", e),
        }
    }
}

impl std::error::Error for HandleCountError {}

impl From<std::io::Error> for HandleCountError {
    fn from(e: std::io::Error) -> Self {
        HandleCountError::Io(e)
    }
}

pub trait HandleCountManager: Send {
    /// Re-reads the handle table of every process.
    fn refresh(&mut self) -> Result<(), HandleCountError>;

    /// Handle count of `pid` as of the last refresh.
    fn process_handle_count(&self, pid: u32) -> Result<u32, HandleCountError>;
}

/// Counts `/proc/[pid]/fd` entries.
pub struct ProcFdHandleCounts {
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
    counts: Option<HashMap<u32, u32>>,
}

impl ProcFdHandleCounts {
    pub fn new(fs: Arc<dyn FileSystem>, paths: HostPaths) -> Self {
        Self {
            fs,
            paths,
            counts: None,
        }
    }

    /// Number of processes in the current snapshot.
    pub fn len(&self) -> usize {
        self.counts.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HandleCountManager for ProcFdHandleCounts {
    fn refresh(&mut self) -> Result<(), HandleCountError> {
        let mut counts = HashMap::new();
        for entry in self.fs.read_dir(&self.paths.proc)? {
            let Some(pid) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes that exit mid-refresh or deny access are left out.
            match self.fs.read_dir(&entry.join("fd")) {
                Ok(fds) => {
                    counts.insert(pid, u32::try_from(fds.len()).unwrap_or(u32::MAX));
                }
                Err(e) => trace!(pid, error = %e, "skipping fd table"),
            }
        }
        self.counts = Some(counts);
        Ok(())
    }

    fn process_handle_count(&self, pid: u32) -> Result<u32, HandleCountError> {
        let counts = self.counts.as_ref().ok_or(HandleCountError::NotRefreshed)?;
        counts
            .get(&pid)
            .copied()
            .ok_or(HandleCountError::NotFound(pid))
    }
}
