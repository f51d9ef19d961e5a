//! Host access for the scrapers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Scrapers                          │
//! │   cpu  memory  disk  network  filesystem  paging  ...    │
//! └──────────────┬───────────────────────────┬───────────────┘
//!                │                           │
//!        ┌───────▼────────┐         ┌────────▼─────────┐
//!        │ procfs parsers │         │ SharedOptimiz.   │
//!        │ + HostPaths    │         │ (boot time)      │
//!        └───────┬────────┘         └────────┬─────────┘
//!                └─────────────┬─────────────┘
//!                       ┌──────▼──────┐
//!                       │ FileSystem  │ (trait)
//!                       └──────┬──────┘
//!                   ┌──────────┴──────────┐
//!            ┌──────▼──────┐       ┌──────▼──────┐
//!            │   RealFs    │       │   MockFs    │
//!            └─────────────┘       └─────────────┘
//! ```

pub mod mock;
pub mod procfs;
pub mod shared;
pub mod traits;

pub use mock::MockFs;
pub use procfs::HostPaths;
pub use shared::SharedOptimizations;
pub use traits::{Environment, FileSystem, FsStat, MockEnv, OsEnv, RealFs};
