//! Hot-reload runtime for native modules
//!
//! Provides the host side of the module lifecycle:
//! - Staging of module binaries into a private directory
//! - Entry-point resolution by naming convention (`load_<name>` / `unload_<name>`)
//! - A registry owning one record per loaded module
//! - Versioned reloads with state capture/replay and a configurable failure policy
//! - Batched, deduplicated reload dispatch from file-change notifications

pub mod config;
pub mod coordinator;
pub mod error;
mod error_conversions;
pub mod events;
pub mod native;
pub mod registry;
pub mod staging;
pub mod symbols;
pub mod watcher;

pub use config::{FailurePolicy, HotReloadConfig};
pub use coordinator::{ChangeNotifier, DrainReport, ReloadCoordinator, WatchAction};
pub use error::{ErrorKind, ModuleError, ModuleResult};
pub use events::ReloadEvent;
pub use native::NativeLoader;
pub use registry::{
    FilenameIndex, LifecycleReport, ModuleInfo, ModuleRegistry, ReloadOutcome, ReloadReport,
};
pub use staging::{StagedBinary, StagingArea};
pub use symbols::{EntryPoints, is_valid_name, library_file_name};
pub use watcher::{SourceWatcher, WatchConfig};

pub use hotswap_kernel::{HostContext, ModuleLoader, NativeLibrary, StateChannel};
