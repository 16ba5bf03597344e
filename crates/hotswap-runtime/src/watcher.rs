//! File system watcher for module binaries
//!
//! Watches the source directory (non-recursively) and forwards every
//! relevant change to a [`ChangeNotifier`] as a
//! `(directory, filename, action, previous_filename)` notification.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{AccessKind, AccessMode, ModifyKind, RenameMode},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::coordinator::{ChangeNotifier, WatchAction};

/// Watch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// File extensions to watch
    pub extensions: Vec<String>,
    /// Ignore patterns (`*suffix`, `prefix*` or exact file names)
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["so".to_string(), "dylib".to_string(), "dll".to_string()],
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
        }
    }
}

impl WatchConfig {
    /// Create a new watch config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add file extension to watch
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.extensions.push(ext.trim_start_matches('.').to_string());
        self
    }

    /// Add ignore pattern
    pub fn with_ignore(mut self, pattern: &str) -> Self {
        self.ignore_patterns.push(pattern.to_string());
        self
    }

    /// Check if a path should be watched
    pub fn should_watch(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.extensions.is_empty() && !self.extensions.iter().any(|e| e == ext) {
            return false;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        !self.ignore_patterns.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                file_name.ends_with(suffix)
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                file_name.starts_with(prefix)
            } else {
                file_name == pattern
            }
        })
    }
}

/// Map a raw notify event kind onto a watch action
pub(crate) fn classify(kind: &EventKind) -> Option<WatchAction> {
    match kind {
        EventKind::Create(_) => Some(WatchAction::Added),
        EventKind::Remove(_) => Some(WatchAction::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(WatchAction::RenamedOld),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
            Some(WatchAction::RenamedNew)
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(WatchAction::Modified),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(WatchAction::Modified),
        _ => None,
    }
}

fn dispatch(event: Event, directory: &Path, config: &WatchConfig, notifier: &ChangeNotifier) {
    let Some(action) = classify(&event.kind) else {
        return;
    };

    // A two-path rename carries (from, to)
    let (previous, targets): (Option<&OsStr>, &[PathBuf]) =
        if matches!(event.kind, EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            && event.paths.len() == 2
        {
            (event.paths[0].file_name(), &event.paths[1..])
        } else {
            (None, &event.paths[..])
        };

    for path in targets {
        if !config.should_watch(path) {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        debug!("Watch event {:?} for {:?}", action, path);
        notifier.notify(directory, file_name, action, previous);
    }
}

/// Watches one source directory and feeds a [`ChangeNotifier`]
pub struct SourceWatcher {
    directory: PathBuf,
    _watcher: RecommendedWatcher,
}

impl SourceWatcher {
    /// Start a non-recursive watch on `directory`
    pub fn start<P: AsRef<Path>>(
        directory: P,
        config: WatchConfig,
        notifier: ChangeNotifier,
    ) -> Result<Self, notify::Error> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            warn!("Watch path is not a directory: {:?}", directory);
        }

        info!("Watching module directory {:?}", directory);

        let handler_dir = directory.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => dispatch(event, &handler_dir, &config, &notifier),
                Err(e) => error!("Watch error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        Ok(Self {
            directory,
            _watcher: watcher,
        })
    }

    /// Directory being watched
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        info!("Stopped watching {:?}", self.directory);
    }
}
