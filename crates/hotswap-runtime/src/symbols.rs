//! Entry-point resolution
//!
//! A module named `physics` exports `load_physics` and `unload_physics`.
//! Either may be absent: the corresponding step is skipped and reported as
//! [`ModuleError::SymbolMissing`], which callers treat as a warning.

use std::marker::PhantomData;

use hotswap_kernel::{EntryPoint, HostContext, NativeLibrary, StateSink, StateSource};
use tracing::{debug, warn};

use crate::error::ModuleError;

/// Prefix of the entry point invoked after mapping
pub const LOAD_PREFIX: &str = "load_";
/// Prefix of the entry point invoked before unmapping
pub const UNLOAD_PREFIX: &str = "unload_";

/// Whether `name` can be a module name: non-empty ASCII letters, digits
/// and underscores, so it forms both a C symbol suffix and a plain file name
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// `load_<name>`
pub fn load_symbol(name: &str) -> String {
    format!("{}{}", LOAD_PREFIX, name)
}

/// `unload_<name>`
pub fn unload_symbol(name: &str) -> String {
    format!("{}{}", UNLOAD_PREFIX, name)
}

/// Platform file name of a module binary: `libphysics.so`,
/// `libphysics.dylib` or `physics.dll`
pub fn library_file_name(name: &str) -> String {
    format!(
        "{}{}.{}",
        std::env::consts::DLL_PREFIX,
        name,
        std::env::consts::DLL_EXTENSION
    )
}

/// Entry points resolved from one mapped binary.
///
/// Borrows the library so the function pointers cannot outlive the mapping.
pub struct EntryPoints<'lib> {
    name: String,
    load: Option<EntryPoint>,
    unload: Option<EntryPoint>,
    _library: PhantomData<&'lib dyn NativeLibrary>,
}

impl<'lib> EntryPoints<'lib> {
    /// Resolve both entry points of `name` in `library`
    pub fn resolve(library: &'lib dyn NativeLibrary, name: &str) -> Self {
        let load = library.entry_point(&load_symbol(name));
        let unload = library.entry_point(&unload_symbol(name));
        debug!(
            "Resolved entry points for {} in {:?}: load={}, unload={}",
            name,
            library.path(),
            load.is_some(),
            unload.is_some()
        );
        Self {
            name: name.to_string(),
            load,
            unload,
            _library: PhantomData,
        }
    }

    pub fn has_load(&self) -> bool {
        self.load.is_some()
    }

    pub fn has_unload(&self) -> bool {
        self.unload.is_some()
    }

    fn missing(&self, symbol: String) -> ModuleError {
        warn!("Module {} does not export {}; skipping", self.name, symbol);
        ModuleError::SymbolMissing {
            name: self.name.clone(),
            symbol,
        }
    }

    /// Invoke `load_<name>`, replaying `state` when given
    pub fn call_load(
        &self,
        context: HostContext,
        state: Option<&mut StateSource<'_>>,
    ) -> Result<(), ModuleError> {
        let Some(entry) = self.load else {
            return Err(self.missing(load_symbol(&self.name)));
        };
        let channel = state.map_or(std::ptr::null_mut(), |s| s.as_ptr());
        unsafe { entry(context.as_ptr(), channel) };
        Ok(())
    }

    /// Invoke `unload_<name>`, capturing into `state` when given
    pub fn call_unload(
        &self,
        context: HostContext,
        state: Option<&mut StateSink<'_>>,
    ) -> Result<(), ModuleError> {
        let Some(entry) = self.unload else {
            return Err(self.missing(unload_symbol(&self.name)));
        };
        let channel = state.map_or(std::ptr::null_mut(), |s| s.as_ptr());
        unsafe { entry(context.as_ptr(), channel) };
        Ok(())
    }
}
