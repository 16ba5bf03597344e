//! `hotswap run` command implementation

use std::sync::Arc;

use anyhow::Context;
use hotswap_runtime::{
    HostContext, HotReloadConfig, ModuleRegistry, NativeLoader, ReloadCoordinator, ReloadOutcome,
    SourceWatcher,
};
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::config;

/// Execute the `hotswap run` command
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = config::resolve(&args).map_err(|report| anyhow::anyhow!("{report:?}"))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(host(config, args.poll, args.once))
}

fn load_modules(
    registry: &mut ModuleRegistry,
    config: &HotReloadConfig,
    context: HostContext,
) -> anyhow::Result<()> {
    for name in &config.modules {
        let report = registry
            .load_by_name(name, context)
            .with_context(|| format!("failed to load module {}", name))?;
        for warning in &report.warnings {
            warn!("{}", warning);
        }
    }
    Ok(())
}

async fn host(config: HotReloadConfig, poll: bool, once: bool) -> anyhow::Result<()> {
    let context = HostContext::null();
    let mut registry = ModuleRegistry::from_config(Arc::new(NativeLoader::new()), &config)
        .context("failed to prepare staging directory")?;

    if let Err(e) = load_modules(&mut registry, &config, context) {
        registry.teardown(context);
        return Err(e);
    }
    info!(
        "Hosting {} module(s) from {:?} (policy: {})",
        registry.len(),
        config.source_dir,
        config.failure_policy
    );

    let coordinator = ReloadCoordinator::new(&registry).with_skip_unchanged(config.skip_unchanged);

    let watcher = if poll || once {
        None
    } else {
        match SourceWatcher::start(&config.source_dir, config.watch.clone(), coordinator.notifier())
        {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Cannot watch {:?}, polling instead: {}", config.source_dir, e);
                None
            }
        }
    };
    let polling = watcher.is_none();

    if once {
        coordinator.poll_stale(&registry);
        report_drain(&coordinator, &mut registry, context);
    } else {
        let mut ticker = tokio::time::interval(config.drain_interval());
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if polling {
                        coordinator.poll_stale(&registry);
                    }
                    report_drain(&coordinator, &mut registry, context);
                }
                result = &mut shutdown => {
                    if let Err(e) = result {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutting down");
                    break;
                }
            }
        }
    }

    let failures = registry.teardown(context);
    for (name, err) in &failures {
        error!("Teardown of {} failed: {}", name, err);
    }
    if !failures.is_empty() {
        anyhow::bail!("{} module(s) failed to tear down cleanly", failures.len());
    }
    Ok(())
}

fn report_drain(
    coordinator: &ReloadCoordinator,
    registry: &mut ModuleRegistry,
    context: HostContext,
) {
    let report = coordinator.drain(registry, context);
    for reload in &report.reloaded {
        for warning in &reload.warnings {
            warn!("{}", warning);
        }
    }
    for (name, err) in &report.failed {
        match err.reload_outcome() {
            Some(ReloadOutcome::Unloaded) => {
                error!("Module {} was unloaded: {}", name, err);
            }
            Some(ReloadOutcome::RolledBack { version }) => {
                warn!("Module {} kept v{}: {}", name, version, err);
            }
            _ => error!("Reload of {} failed: {}", name, err),
        }
    }
}
