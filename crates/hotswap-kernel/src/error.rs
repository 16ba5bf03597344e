//! Crate-level error types for `hotswap-kernel`.
//!
//! Provides a unified [`KernelError`] that composes errors from the loader
//! seam, the config loader and I/O, together with [`error_stack::Report`]
//! for context-carrying propagation at the host boundary.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hotswap_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn read_manifest() -> KernelResult<String> {
//!     let text = std::fs::read_to_string("hotswap.toml")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("reading hotswap.toml")?;
//!     Ok(text)
//! }
//! ```

use thiserror::Error;

use crate::loader::LoaderError;

/// Crate-level error type for `hotswap-kernel`.
///
/// Runtime crates convert their own error enums into this one (see the
/// runtime's `error_conversions` module) so hosts can use a single type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// The dynamic loader rejected a binary.
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    /// A configuration-related error (requires the `config` feature).
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A module lifecycle error, flattened to its message.
    #[error("Module error: {0}")]
    Module(String),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<KernelError>>`.
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
