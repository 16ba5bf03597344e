//! Host configuration: file, then `HOTSWAP_*` environment, then flags

use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use hotswap_kernel::config::load_with_env;
use hotswap_kernel::error::{KernelError, KernelResult};
use hotswap_runtime::HotReloadConfig;

use crate::cli::RunArgs;

/// Prefix of environment overrides, e.g. `HOTSWAP_FAILURE_POLICY=rollback`
pub const ENV_PREFIX: &str = "HOTSWAP";

/// Read a configuration file with environment overrides applied
pub fn load_file(path: &Path) -> KernelResult<HotReloadConfig> {
    let path_str = path.to_str().ok_or_else(|| {
        Report::new(KernelError::Internal(format!(
            "config path is not valid UTF-8: {}",
            path.display()
        )))
    })?;

    load_with_env(path_str, ENV_PREFIX)
        .map_err(|e| Report::new(KernelError::from(e)))
        .attach(format!("while reading host config {}", path.display()))
}

/// Resolve the effective configuration for `hotswap run`
pub fn resolve(args: &RunArgs) -> KernelResult<HotReloadConfig> {
    let mut config = match &args.config {
        Some(path) => load_file(path)?,
        None => HotReloadConfig::default(),
    };

    if let Some(dir) = &args.source_dir {
        config = config.with_source_dir(dir);
    }
    if let Some(dir) = &args.staging_dir {
        config = config.with_staging_dir(dir);
    }
    if let Some(ms) = args.interval_ms {
        config = config.with_drain_interval(Duration::from_millis(ms));
    }
    if let Some(policy) = args.policy {
        config = config.with_failure_policy(policy);
    }
    if args.skip_unchanged {
        config = config.with_skip_unchanged(true);
    }
    for name in &args.modules {
        config = config.with_module(name);
    }

    Ok(config)
}
