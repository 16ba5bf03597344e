//! Lifecycle events
//!
//! The registry broadcasts a [`ReloadEvent`] for every lifecycle transition.
//! Sending never blocks and is dropped silently when nobody subscribed.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::registry::ReloadOutcome;

/// Capacity of the event channel; slow subscribers observe `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Module lifecycle event
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ReloadEvent {
    /// Module mapped and its `load_<name>` invoked
    Loaded {
        name: String,
        version: u64,
        staged_path: PathBuf,
    },
    /// Module unmapped and its record erased
    Unloaded { name: String },
    /// Reload started from `version`
    ReloadStarted { name: String, version: u64 },
    /// Reload finished
    ReloadCompleted {
        name: String,
        version: u64,
        state_bytes: usize,
        duration: Duration,
    },
    /// Reload failed
    ReloadFailed {
        name: String,
        error: String,
        outcome: ReloadOutcome,
    },
    /// An entry point was absent and its step skipped
    SymbolMissing { name: String, symbol: String },
}

pub(crate) fn channel() -> broadcast::Sender<ReloadEvent> {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}
