//! Scrapers: one unit per metric domain.
//!
//! Every scraper implements [`Scraper`] and is driven through
//! [`ManagedScraper`], which enforces the start/scrape/shutdown lifecycle.
//! The closed set of domains is [`ScraperConfig`]; the registry selects a
//! variant by key and the variant builds its scraper.

mod context;
pub mod cpu;
pub mod disk;
pub mod filesystem;
pub mod handlecount;
mod lifecycle;
pub mod load;
pub mod memory;
pub mod network;
pub mod paging;
pub mod process;
pub mod processes;
pub mod system;

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::pdata::Metric;
use crate::platform::procfs::HostPaths;
use crate::platform::procfs::parser::ParseError;
use crate::platform::shared::SharedOptimizations;
use crate::platform::traits::FileSystem;

pub use context::{CancelToken, ScrapeContext};
pub use handlecount::{HandleCountError, HandleCountManager, ProcFdHandleCounts};
pub use lifecycle::{LifecycleState, ManagedScraper};

/// Error from a scraper operation. From `scrape` it voids that scraper's
/// contribution for the round; from `start` it keeps the scraper out.
#[derive(Debug)]
pub enum ScrapeError {
    /// A host file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Io(std::io::Error),
    Parse(ParseError),
    /// The platform interface this scraper needs is missing.
    Unavailable(String),
    Cancelled,
    DeadlineExceeded,
    /// A previous, abandoned scrape is still running.
    Busy,
    /// The scrape task panicked or was aborted.
    Aborted(String),
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ScrapeError::Io(e) => write!(f, "I/O error: {}", e),
            ScrapeError::Parse(e) => write!(f, "{}", e),
            ScrapeError::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            ScrapeError::Cancelled => write!(f, "cancelled"),
            ScrapeError::DeadlineExceeded => write!(f, "deadline exceeded"),
            ScrapeError::Busy => write!(f, "previous scrape still running"),
            ScrapeError::Aborted(msg) => write!(f, "scrape aborted: {}", msg),
            ScrapeError::InvalidState { operation, state } => {
                write!(f, "cannot {} a scraper in state {:?}", operation, state)
            }
        }
    }
}

impl std::error::Error for ScrapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScrapeError::Read { source, .. } => Some(source),
            ScrapeError::Io(e) => Some(e),
            ScrapeError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(e: std::io::Error) -> Self {
        ScrapeError::Io(e)
    }
}

impl From<ParseError> for ScrapeError {
    fn from(e: ParseError) -> Self {
        ScrapeError::Parse(e)
    }
}

/// A sub-reading that failed inside an otherwise successful scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct SubFailure {
    pub component: String,
    pub message: String,
}

/// Best-effort data from one scrape plus what could not be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeOutput {
    pub metrics: Vec<Metric>,
    pub failures: Vec<SubFailure>,
}

impl ScrapeOutput {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self {
            metrics,
            failures: Vec::new(),
        }
    }

    pub fn push_failure(&mut self, component: impl Into<String>, message: impl ToString) {
        self.failures.push(SubFailure {
            component: component.into(),
            message: message.to_string(),
        });
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// One metric domain's collection unit.
pub trait Scraper: Send {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        Ok(())
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError>;

    fn shutdown(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        Ok(())
    }
}

/// What a scraper needs from its receiver at construction.
#[derive(Clone)]
pub struct ScraperSettings {
    pub fs: Arc<dyn FileSystem>,
    pub paths: HostPaths,
    pub shared: Arc<SharedOptimizations>,
}

/// Per-domain configuration type, one per registry key.
pub trait DomainConfig: Default + DeserializeOwned + Into<ScraperConfig> + 'static {
    const KEY: &'static str;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

macro_rules! scraper_configs {
    ($($variant:ident($config:ty) => $scraper:ty,)*) => {
        /// Configuration of one scraper, tagged by domain.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ScraperConfig {
            $($variant($config),)*
        }

        impl ScraperConfig {
            pub fn key(&self) -> &'static str {
                match self {
                    $(ScraperConfig::$variant(_) => <$config as DomainConfig>::KEY,)*
                }
            }

            pub fn validate(&self) -> Result<(), String> {
                match self {
                    $(ScraperConfig::$variant(c) => c.validate(),)*
                }
            }

            pub fn create_scraper(&self, settings: &ScraperSettings) -> Box<dyn Scraper> {
                match self {
                    $(ScraperConfig::$variant(c) => Box::new(<$scraper>::new(c.clone(), settings)),)*
                }
            }
        }

        $(
            impl From<$config> for ScraperConfig {
                fn from(config: $config) -> Self {
                    ScraperConfig::$variant(config)
                }
            }
        )*

        pub(crate) fn builtin_factories() -> Vec<Box<dyn crate::registry::ScraperFactory>> {
            vec![$(Box::new(crate::registry::BuiltinFactory::<$config>::new()),)*]
        }
    };
}

scraper_configs! {
    Cpu(cpu::CpuConfig) => cpu::CpuScraper,
    Disk(disk::DiskConfig) => disk::DiskScraper,
    Filesystem(filesystem::FilesystemConfig) => filesystem::FilesystemScraper,
    Load(load::LoadConfig) => load::LoadScraper,
    Memory(memory::MemoryConfig) => memory::MemoryScraper,
    Network(network::NetworkConfig) => network::NetworkScraper,
    Paging(paging::PagingConfig) => paging::PagingScraper,
    Process(process::ProcessConfig) => process::ProcessScraper,
    Processes(processes::ProcessesConfig) => processes::ProcessesScraper,
    System(system::SystemConfig) => system::SystemScraper,
}

/// Exact-name include/exclude matching. An empty include list admits all.
pub(crate) fn name_allowed(name: &str, include: &[String], exclude: &[String]) -> bool {
    (include.is_empty() || include.iter().any(|n| n == name)) && !exclude.iter().any(|n| n == name)
}

pub(crate) fn check_names(field: &str, names: &[String]) -> Result<(), String> {
    if names.iter().any(|n| n.trim().is_empty()) {
        return Err(format!("{} must not contain empty names", field));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_filter() {
        let include = vec!["sda".to_string()];
        let exclude = vec!["loop0".to_string()];
        assert!(name_allowed("sda", &include, &[]));
        assert!(!name_allowed("sdb", &include, &[]));
        assert!(name_allowed("sdb", &[], &exclude));
        assert!(!name_allowed("loop0", &[], &exclude));
        assert!(!name_allowed("sda", &include, &include));
    }

    #[test]
    fn test_check_names() {
        assert!(check_names("include_devices", &["sda".into()]).is_ok());
        let err = check_names("include_devices", &["".into()]).unwrap_err();
        assert!(err.contains("include_devices"));
    }

    #[test]
    fn test_config_keys_are_distinct() {
        let keys: std::collections::BTreeSet<_> = builtin_factories()
            .iter()
            .map(|f| f.key())
            .collect();
        assert_eq!(keys.len(), 10);
        assert!(keys.contains("load"));
        assert!(keys.contains("process"));
        assert!(keys.contains("processes"));
    }

    #[test]
    fn test_scrape_output_partial() {
        let mut output = ScrapeOutput::default();
        assert!(!output.is_partial());
        output.push_failure("sda", "permission denied");
        assert!(output.is_partial());
        assert_eq!(output.failures[0].component, "sda");
    }

    #[test]
    fn test_error_display() {
        let err = ScrapeError::Read {
            path: PathBuf::from("/proc/loadavg"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/proc/loadavg"));
        assert_eq!(ScrapeError::Busy.to_string(), "previous scrape still running");
    }
}
