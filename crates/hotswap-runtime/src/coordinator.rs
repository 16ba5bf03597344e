//! Reload coordination
//!
//! Watcher threads call [`ChangeNotifier::notify`] with raw directory
//! notifications; the host thread periodically calls
//! [`ReloadCoordinator::drain`], which reloads every pending module once.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::Path;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use hotswap_kernel::HostContext;

use crate::error::ModuleError;
use crate::registry::{FilenameIndex, ModuleRegistry, ReloadReport};

/// Kind of change reported for a file in the watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Added,
    Removed,
    Modified,
    /// The file was renamed away from this name
    RenamedOld,
    /// The file was renamed to this name
    RenamedNew,
}

impl WatchAction {
    /// Whether the action can make a new binary available
    pub fn triggers_reload(self) -> bool {
        matches!(
            self,
            WatchAction::Added | WatchAction::Modified | WatchAction::RenamedNew
        )
    }
}

/// Watcher-side handle that turns file notifications into pending reloads.
///
/// Cheap to clone and safe to call from any thread.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    index: FilenameIndex,
    tx: Sender<String>,
}

impl ChangeNotifier {
    /// Handle one directory notification. Returns whether a module was
    /// enqueued.
    pub fn notify(
        &self,
        directory: &Path,
        file_name: &OsStr,
        action: WatchAction,
        previous_file_name: Option<&OsStr>,
    ) -> bool {
        if !action.triggers_reload() {
            debug!(
                "Ignoring {:?} of {:?} in {:?}",
                action, file_name, directory
            );
            return false;
        }

        // A rename away from a module's binary is a removal for that module;
        // only the target name decides.
        let Some(name) = self.index.resolve(file_name) else {
            debug!(
                "No module for {:?} in {:?} (previously {:?})",
                file_name, directory, previous_file_name
            );
            return false;
        };

        debug!("Change to {:?} queues reload of {}", file_name, name);
        self.tx.send(name).is_ok()
    }
}

/// Per-name results of one drain pass
#[derive(Debug, Default)]
pub struct DrainReport {
    pub reloaded: Vec<ReloadReport>,
    /// Names skipped because they are no longer loaded or did not change
    pub skipped: Vec<String>,
    pub failed: Vec<(String, ModuleError)>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.reloaded.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }

    /// Number of modules the pass looked at
    pub fn total(&self) -> usize {
        self.reloaded.len() + self.skipped.len() + self.failed.len()
    }
}

/// Owns the pending set and drives batched reloads
pub struct ReloadCoordinator {
    tx: Sender<String>,
    rx: Receiver<String>,
    index: FilenameIndex,
    skip_unchanged: bool,
}

impl ReloadCoordinator {
    /// Create a coordinator resolving file names through `registry`'s index
    pub fn new(registry: &ModuleRegistry) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            index: registry.filename_index(),
            skip_unchanged: false,
        }
    }

    /// Skip modules whose source bytes are unchanged
    pub fn with_skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    /// Callback handle for watchers
    pub fn notifier(&self) -> ChangeNotifier {
        ChangeNotifier {
            index: self.index.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Queue a reload of `name` by hand
    pub fn enqueue(&self, name: &str) {
        // the receiver lives in `self`, so the send cannot fail
        let _ = self.tx.send(name.to_string());
    }

    /// Queued notifications, duplicates included
    pub fn pending_len(&self) -> usize {
        self.rx.len()
    }

    /// Enqueue every loaded module whose source was modified since it was
    /// (re)loaded. Returns how many were queued.
    pub fn poll_stale(&self, registry: &ModuleRegistry) -> usize {
        let mut queued = 0;
        for name in registry.names() {
            match registry.is_stale(&name) {
                Ok(true) => {
                    debug!("Module {} is stale", name);
                    self.enqueue(&name);
                    queued += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Cannot check module {} for changes: {}", name, e),
            }
        }
        queued
    }

    /// Reload every pending module once, in name order
    pub fn drain(&self, registry: &mut ModuleRegistry, context: HostContext) -> DrainReport {
        let pending: BTreeSet<String> = self.rx.try_iter().collect();
        let mut report = DrainReport::default();
        if pending.is_empty() {
            return report;
        }

        debug!("Draining {} pending reloads", pending.len());

        for name in pending {
            if !registry.is_loaded(&name) {
                debug!("Skipping reload of {}: not loaded", name);
                report.skipped.push(name);
                continue;
            }

            if self.skip_unchanged {
                match registry.has_changed(&name) {
                    Ok(false) => {
                        debug!("Skipping reload of {}: source unchanged", name);
                        report.skipped.push(name);
                        continue;
                    }
                    Ok(true) => {}
                    Err(e) => {
                        warn!("Cannot hash source of {}: {}", name, e);
                        report.failed.push((name, e));
                        continue;
                    }
                }
            }

            match registry.reload(&name, context) {
                Ok(reload) => report.reloaded.push(reload),
                Err(e) => {
                    warn!("Reload of {} failed: {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            "Drain finished: {} reloaded, {} skipped, {} failed",
            report.reloaded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }
}
