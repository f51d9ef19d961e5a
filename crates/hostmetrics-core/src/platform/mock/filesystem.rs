//! In-memory mock filesystem for testing scrapers without a real `/proc`.
//!
//! Clones of a `MockFs` share one tree, so a test can hand a clone to a
//! scraper and keep mutating the host underneath it (processes exiting,
//! devices disappearing) between scrapes.

use crate::platform::traits::{FileSystem, FsStat};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Tree {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    mounts: HashMap<PathBuf, FsStat>,
}

impl Tree {
    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<RwLock<Tree>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file. Parent directories are created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.add_parents(&path);
        tree.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.add_parents(&path);
        tree.directories.insert(path);
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.directories.retain(|p| !p.starts_with(path));
    }

    /// Registers `statvfs` results for a mount point.
    pub fn add_mount(&self, mount_point: impl AsRef<Path>, stat: FsStat) {
        let path = mount_point.as_ref().to_path_buf();
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.add_parents(&path);
        tree.directories.insert(path.clone());
        tree.mounts.insert(path, stat);
    }

    /// Adds a process with its `/proc/[pid]/` files and `open_fds` entries
    /// under `/proc/[pid]/fd`.
    ///
    /// `io` may be empty to simulate an unreadable `/proc/[pid]/io`.
    pub fn add_process(&self, pid: u32, stat: &str, status: &str, io: &str, open_fds: u32) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
        if !io.is_empty() {
            self.add_file(base.join("io"), io);
        }
        let fd_dir = base.join("fd");
        self.add_dir(&fd_dir);
        for fd in 0..open_fds {
            self.add_file(fd_dir.join(fd.to_string()), "");
        }
    }

    /// Removes a process directory, as if the process exited.
    pub fn remove_process(&self, pid: u32) {
        self.remove(format!("/proc/{}", pid));
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        tree.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        tree.files.contains_key(path) || tree.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        if !tree.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries: Vec<PathBuf> = tree
            .files
            .keys()
            .chain(tree.directories.iter())
            .filter(|p| p.parent().is_some_and(|parent| parent == path) && p.as_path() != path)
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn statvfs(&self, path: &Path) -> io::Result<FsStat> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        tree.mounts.get(path).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("statvfs denied: {:?}", path),
            )
        })
    }
}
