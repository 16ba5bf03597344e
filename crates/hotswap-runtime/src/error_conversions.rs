//! Cross-crate error conversions for hotswap-runtime
//!
//! Implements `From<ModuleError> for KernelError` so hosts can funnel
//! runtime errors into the kernel's `error_stack` reports with `?`.

use hotswap_kernel::error::KernelError;

use crate::error::ModuleError;

impl From<ModuleError> for KernelError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::LoadFailure { source, .. } => KernelError::Loader(source),
            other => KernelError::Module(other.to_string()),
        }
    }
}
