//! Module lifecycle errors

use std::path::PathBuf;

use hotswap_kernel::LoaderError;

use crate::registry::ReloadOutcome;

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

/// Flat classification of a [`ModuleError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyLoaded,
    LoadFailure,
    SymbolMissing,
    IoFailure,
}

/// Module lifecycle error types
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// No record for the module, or its source binary is absent
    #[error("Module not found: {name}{}", path_suffix(.path))]
    NotFound {
        name: String,
        path: Option<PathBuf>,
    },

    /// The name cannot form entry-point symbols or a staged file name
    #[error("Invalid module name: {0:?}")]
    InvalidName(String),

    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    /// The loader rejected the staged binary
    #[error("Failed to load module {name} from {}: {source}", .path.display())]
    LoadFailure {
        name: String,
        path: PathBuf,
        #[source]
        source: LoaderError,
    },

    /// An entry point is absent; the lifecycle step was skipped
    #[error("Module {name} does not export {symbol}")]
    SymbolMissing { name: String, symbol: String },

    /// Copying or deleting a staged file failed
    #[error("IO error for module {name} at {}: {source}", .path.display())]
    IoFailure {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A reload aborted; `outcome` says where the module ended up
    #[error("Reload of {name} failed ({outcome}): {source}")]
    ReloadFailed {
        name: String,
        outcome: ReloadOutcome,
        #[source]
        source: Box<ModuleError>,
    },

    /// An operation failed and deleting its staged file failed as well
    #[error("{source} (cleanup failed: {cleanup})")]
    CleanupFailed {
        #[source]
        source: Box<ModuleError>,
        cleanup: Box<ModuleError>,
    },
}

impl ModuleError {
    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
            path: None,
        }
    }

    pub(crate) fn io(name: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            name: name.to_string(),
            path: path.into(),
            source,
        }
    }

    /// Attach a failed cleanup to this error
    pub(crate) fn with_cleanup(self, cleanup: Option<ModuleError>) -> Self {
        match cleanup {
            Some(cleanup) => Self::CleanupFailed {
                source: Box::new(self),
                cleanup: Box::new(cleanup),
            },
            None => self,
        }
    }

    /// The cleanup failure attached to this error or its cause
    pub fn cleanup_error(&self) -> Option<&ModuleError> {
        match self {
            Self::CleanupFailed { cleanup, .. } => Some(cleanup),
            Self::ReloadFailed { source, .. } => source.cleanup_error(),
            _ => None,
        }
    }

    /// Classification, looking through `ReloadFailed` to its cause
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::InvalidName(_) => ErrorKind::NotFound,
            Self::AlreadyLoaded(_) => ErrorKind::AlreadyLoaded,
            Self::LoadFailure { .. } => ErrorKind::LoadFailure,
            Self::SymbolMissing { .. } => ErrorKind::SymbolMissing,
            Self::IoFailure { .. } => ErrorKind::IoFailure,
            Self::ReloadFailed { source, .. } | Self::CleanupFailed { source, .. } => source.kind(),
        }
    }

    /// Where a failed reload left the module, if this is a reload failure
    pub fn reload_outcome(&self) -> Option<ReloadOutcome> {
        match self {
            Self::ReloadFailed { outcome, .. } => Some(*outcome),
            Self::CleanupFailed { source, .. } => source.reload_outcome(),
            _ => None,
        }
    }

    /// Name of the module the error is about
    pub fn module_name(&self) -> &str {
        match self {
            Self::NotFound { name, .. }
            | Self::LoadFailure { name, .. }
            | Self::SymbolMissing { name, .. }
            | Self::IoFailure { name, .. }
            | Self::ReloadFailed { name, .. } => name,
            Self::AlreadyLoaded(name) | Self::InvalidName(name) => name,
            Self::CleanupFailed { source, .. } => source.module_name(),
        }
    }
}

/// Result type for module lifecycle operations
pub type ModuleResult<T> = Result<T, ModuleError>;
