//! Native dynamic loader
//!
//! [`NativeLoader`] maps staged binaries with `libloading`. Each mapping is
//! a [`NativeHandle`]; dropping it closes the library.

use std::path::{Path, PathBuf};

use hotswap_kernel::{EntryPoint, LoaderError, ModuleLoader, NativeLibrary};
use libloading::{Library, Symbol};
use tracing::{debug, trace};

/// Loader backed by the platform's dynamic linker
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for NativeLoader {
    fn map(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, LoaderError> {
        debug!("Mapping native library {:?}", path);

        // Safety: initialisers of the library run here. Callers only hand us
        // binaries they staged themselves.
        let library = unsafe { Library::new(path) }.map_err(|e| LoaderError::Map {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(NativeHandle {
            path: path.to_path_buf(),
            library,
        }))
    }
}

/// A library mapped by [`NativeLoader`]
pub struct NativeHandle {
    path: PathBuf,
    library: Library,
}

impl NativeLibrary for NativeHandle {
    fn entry_point(&self, symbol: &str) -> Option<EntryPoint> {
        let entry: Result<Symbol<EntryPoint>, _> = unsafe { self.library.get(symbol.as_bytes()) };
        match entry {
            Ok(entry) => Some(*entry),
            Err(e) => {
                trace!("Symbol {} not found in {:?}: {}", symbol, self.path, e);
                None
            }
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        debug!("Unmapping native library {:?}", self.path);
    }
}
