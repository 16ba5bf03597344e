//! Loader seam
//!
//! The runtime talks to the operating system's dynamic loader only through
//! these two traits. A mapped binary is an owned [`NativeLibrary`]: dropping
//! it unmaps the binary, so a handle is released exactly once on every exit
//! path.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::abi::EntryPoint;

/// Loader error types
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoaderError {
    #[error("Failed to map {path:?}: {reason}")]
    Map { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A binary currently mapped into the process
pub trait NativeLibrary: Send {
    /// Resolve an exported entry point by name.
    ///
    /// The returned pointer is only valid while `self` is alive.
    fn entry_point(&self, symbol: &str) -> Option<EntryPoint>;

    /// Path the binary was mapped from
    fn path(&self) -> &Path;
}

/// Maps binaries and answers file timestamp queries
pub trait ModuleLoader: Send + Sync {
    /// Map the binary at `path`
    fn map(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, LoaderError>;

    /// Last modification time of `path`
    fn modified_time(&self, path: &Path) -> std::io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}
