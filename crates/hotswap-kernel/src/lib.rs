//! Hotswap kernel
//!
//! Types shared between a hot-reloading host and the native modules it maps:
//! - the C ABI of module entry points ([`abi`])
//! - the loader seam the host runtime is written against ([`loader`])
//! - the [`declare_module!`] macro for module crates
//! - crate-level errors and the config loader

// abi module
pub mod abi;
pub use abi::{ChannelDirection, EntryPoint, HostContext, StateChannel, StateSink, StateSource};

// loader module
pub mod loader;
pub use loader::{LoaderError, ModuleLoader, NativeLibrary};

// error module
pub mod error;

// config module
#[cfg(feature = "config")]
pub mod config;

mod macros;

#[doc(hidden)]
pub mod __private {
    pub use paste;
}
