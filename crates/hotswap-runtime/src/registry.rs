//! Module registry
//!
//! Owns one record per loaded module and drives every lifecycle
//! transition: `Unloaded -> Loaded(v0) -> Loaded(v1) -> ... -> Unloaded`.
//!
//! Ordering rules enforced here:
//! - a native handle is dropped before its staged file is deleted
//! - a record is only visible while its handle is live; a reload takes the
//!   record out of the table for its whole duration
//! - `version` only grows, and only on a successful reload

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use hotswap_kernel::{HostContext, ModuleLoader, NativeLibrary, StateSink, StateSource};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{FailurePolicy, HotReloadConfig};
use crate::error::{ModuleError, ModuleResult};
use crate::events::{self, ReloadEvent};
use crate::staging::{StagingArea, file_digest};
use crate::symbols::{EntryPoints, is_valid_name, library_file_name};

/// Where a reload left the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// The new binary is live at `version`
    Reloaded { version: u64 },
    /// The module was dropped; it must be loaded again explicitly
    Unloaded,
    /// The previous binary was re-mapped and kept its `version`
    RolledBack { version: u64 },
}

impl std::fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadOutcome::Reloaded { version } => write!(f, "reloaded at v{}", version),
            ReloadOutcome::Unloaded => write!(f, "unloaded"),
            ReloadOutcome::RolledBack { version } => write!(f, "rolled back to v{}", version),
        }
    }
}

/// Public view of a loaded module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    /// Logical name, unique key
    pub name: String,
    /// Binary maintained by the build
    pub source_path: PathBuf,
    /// Copy currently mapped
    pub staged_path: PathBuf,
    /// Bumped on every successful reload
    pub version: u64,
    /// Successful reloads since the first load
    pub reload_count: u32,
    /// Modification time of `source_path` when last (re)loaded
    pub last_modified: SystemTime,
    /// SHA-256 of the mapped bytes
    pub digest: String,
    /// When the module was first loaded
    pub loaded_at: SystemTime,
}

struct ModuleRecord {
    info: ModuleInfo,
    handle: Box<dyn NativeLibrary>,
}

/// Outcome of a `load` or `unload`
#[derive(Debug)]
pub struct LifecycleReport {
    pub name: String,
    /// Version loaded, or the version that was unloaded
    pub version: u64,
    /// Non-fatal problems, such as missing entry points
    pub warnings: Vec<ModuleError>,
}

/// Outcome of a successful `reload`
#[derive(Debug)]
pub struct ReloadReport {
    pub name: String,
    pub outcome: ReloadOutcome,
    pub previous_version: u64,
    /// Bytes captured from the old version and replayed into the new one
    pub state_bytes: usize,
    pub duration: Duration,
    pub warnings: Vec<ModuleError>,
}

/// File name -> logical module name.
///
/// Shared with watcher threads, so lookups go through a read-write lock.
#[derive(Debug, Clone, Default)]
pub struct FilenameIndex {
    inner: Arc<RwLock<HashMap<OsString, String>>>,
}

impl FilenameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map the file name of `path` to `name`
    pub fn insert(&self, path: &Path, name: &str) {
        if let Some(file_name) = path.file_name() {
            self.inner
                .write()
                .insert(file_name.to_os_string(), name.to_string());
        }
    }

    /// Forget the file name of `path`
    pub fn remove(&self, path: &Path) {
        if let Some(file_name) = path.file_name() {
            self.inner.write().remove(file_name);
        }
    }

    /// Forget every file name mapped to `name`
    pub fn remove_module(&self, name: &str) {
        self.inner.write().retain(|_, module| module != name);
    }

    /// Logical name for a changed file, if it belongs to a module
    pub fn resolve(&self, file_name: &OsStr) -> Option<String> {
        self.inner.read().get(file_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Parts of a record kept while its handle is released during a reload
struct Detached {
    info: ModuleInfo,
    captured: Vec<u8>,
}

/// Registry of loaded native modules
pub struct ModuleRegistry {
    loader: Arc<dyn ModuleLoader>,
    staging: StagingArea,
    modules: HashMap<String, ModuleRecord>,
    index: FilenameIndex,
    source_dir: PathBuf,
    failure_policy: FailurePolicy,
    events: broadcast::Sender<ReloadEvent>,
}

impl ModuleRegistry {
    /// Create a registry staging into `staging`
    pub fn new(loader: Arc<dyn ModuleLoader>, staging: StagingArea) -> Self {
        Self {
            loader,
            staging,
            modules: HashMap::new(),
            index: FilenameIndex::new(),
            source_dir: PathBuf::from("."),
            failure_policy: FailurePolicy::default(),
            events: events::channel(),
        }
    }

    /// Create a registry from host configuration
    pub fn from_config(
        loader: Arc<dyn ModuleLoader>,
        config: &HotReloadConfig,
    ) -> std::io::Result<Self> {
        let staging = match &config.staging_dir {
            Some(dir) => StagingArea::new(dir),
            None => StagingArea::temporary()?,
        };
        info!("Staging module binaries in {:?}", staging.dir());

        Ok(Self::new(loader, staging)
            .with_source_dir(&config.source_dir)
            .with_failure_policy(config.failure_policy))
    }

    /// Set the directory `load_by_name` looks in
    pub fn with_source_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.source_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set what a failed reload does
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Handle to the filename index, for change notifiers
    pub fn filename_index(&self) -> FilenameIndex {
        self.index.clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ReloadEvent) {
        let _ = self.events.send(event);
    }

    fn announce(&self, warning: &ModuleError) {
        if let ModuleError::SymbolMissing { name, symbol } = warning {
            self.emit(ReloadEvent::SymbolMissing {
                name: name.clone(),
                symbol: symbol.clone(),
            });
        }
    }

    fn note(&self, warnings: &mut Vec<ModuleError>, warning: ModuleError) {
        self.announce(&warning);
        warnings.push(warning);
    }

    fn discard_staged(&mut self, name: &str, path: &Path) -> Option<ModuleError> {
        match self.staging.unstage(path) {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to remove staged file {:?} of {}: {}", path, name, e);
                Some(ModuleError::io(name, path, e))
            }
        }
    }

    fn check_name(name: &str) -> ModuleResult<()> {
        if is_valid_name(name) {
            Ok(())
        } else {
            error!("Rejecting module name {:?}: expected [A-Za-z0-9_]+", name);
            Err(ModuleError::InvalidName(name.to_string()))
        }
    }

    /// Path of `name`'s binary in the source directory
    pub fn locate(&self, name: &str) -> ModuleResult<PathBuf> {
        Self::check_name(name)?;
        let path = self.source_dir.join(library_file_name(name));
        if path.is_file() {
            Ok(path)
        } else {
            Err(ModuleError::NotFound {
                name: name.to_string(),
                path: Some(path),
            })
        }
    }

    /// Load `name` from its platform file name in the source directory
    pub fn load_by_name(&mut self, name: &str, context: HostContext) -> ModuleResult<LifecycleReport> {
        let path = self.locate(name)?;
        self.load(name, path, context)
    }

    /// Stage, map and initialise a module
    pub fn load<P: AsRef<Path>>(
        &mut self,
        name: &str,
        source_path: P,
        context: HostContext,
    ) -> ModuleResult<LifecycleReport> {
        let source_path = source_path.as_ref();
        Self::check_name(name)?;

        if self.modules.contains_key(name) {
            warn!("Module {} is already loaded", name);
            return Err(ModuleError::AlreadyLoaded(name.to_string()));
        }

        if !source_path.is_file() {
            error!("Module {} source not found at {:?}", name, source_path);
            return Err(ModuleError::NotFound {
                name: name.to_string(),
                path: Some(source_path.to_path_buf()),
            });
        }

        info!("Loading module {} from {:?}", name, source_path);

        let last_modified = self
            .loader
            .modified_time(source_path)
            .map_err(|e| ModuleError::io(name, source_path, e))?;

        let staged = self.staging.stage(name, source_path, 0).map_err(|e| {
            error!("Failed to stage module {} from {:?}: {}", name, source_path, e);
            ModuleError::io(name, source_path, e)
        })?;

        let handle = match self.loader.map(&staged.path) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to map module {} from {:?}: {}", name, staged.path, e);
                let leftover = self.discard_staged(name, &staged.path);
                return Err(ModuleError::LoadFailure {
                    name: name.to_string(),
                    path: staged.path,
                    source: e,
                }
                .with_cleanup(leftover));
            }
        };

        let mut warnings = Vec::new();
        if let Err(warning) = EntryPoints::resolve(handle.as_ref(), name).call_load(context, None) {
            self.note(&mut warnings, warning);
        }

        self.index.insert(source_path, name);
        self.index.insert(&staged.path, name);

        let now = SystemTime::now();
        let info = ModuleInfo {
            name: name.to_string(),
            source_path: source_path.to_path_buf(),
            staged_path: staged.path.clone(),
            version: 0,
            reload_count: 0,
            last_modified,
            digest: staged.digest,
            loaded_at: now,
        };
        self.modules
            .insert(name.to_string(), ModuleRecord { info, handle });

        info!("Loaded module {} (v0) as {:?}", name, staged.path);
        self.emit(ReloadEvent::Loaded {
            name: name.to_string(),
            version: 0,
            staged_path: staged.path,
        });

        Ok(LifecycleReport {
            name: name.to_string(),
            version: 0,
            warnings,
        })
    }

    /// Finalise and unmap a module, discarding its state
    pub fn unload(&mut self, name: &str, context: HostContext) -> ModuleResult<LifecycleReport> {
        let Some(ModuleRecord { info, handle }) = self.modules.remove(name) else {
            warn!("Cannot unload {}: not loaded", name);
            return Err(ModuleError::not_found(name));
        };

        info!("Unloading module {} (v{})", name, info.version);

        let mut warnings = Vec::new();
        if let Err(warning) =
            EntryPoints::resolve(handle.as_ref(), name).call_unload(context, None)
        {
            self.note(&mut warnings, warning);
        }

        drop(handle);
        self.index.remove_module(name);
        self.emit(ReloadEvent::Unloaded {
            name: name.to_string(),
        });

        // the record is gone either way; a file that survives is retried by teardown
        if let Some(err) = self.discard_staged(name, &info.staged_path) {
            return Err(err);
        }

        Ok(LifecycleReport {
            name: name.to_string(),
            version: info.version,
            warnings,
        })
    }

    /// Unload every module, collecting failures instead of stopping
    pub fn unload_all(&mut self, context: HostContext) -> Vec<(String, ModuleError)> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();

        names
            .into_iter()
            .filter_map(|name| match self.unload(&name, context) {
                Ok(_) => None,
                Err(e) => {
                    warn!("Failed to unload module {}: {}", name, e);
                    Some((name, e))
                }
            })
            .collect()
    }

    /// Unload everything and delete any staged file left behind
    pub fn teardown(&mut self, context: HostContext) -> Vec<(String, ModuleError)> {
        info!("Tearing down module registry ({} loaded)", self.modules.len());
        let mut failures = self.unload_all(context);
        failures.extend(self.purge_staging());
        failures
    }

    /// Release every handle and staged file without calling `unload_<name>`.
    ///
    /// For abnormal shutdown, when modules can no longer be trusted to run.
    pub fn reset(&mut self) -> Vec<(String, ModuleError)> {
        warn!("Resetting module registry ({} loaded)", self.modules.len());

        let mut failures = Vec::new();
        let mut records: Vec<(String, ModuleRecord)> = self.modules.drain().collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, ModuleRecord { info, handle }) in records {
            drop(handle);
            if let Some(err) = self.discard_staged(&name, &info.staged_path) {
                failures.push((name.clone(), err));
            }
            self.emit(ReloadEvent::Unloaded { name });
        }

        self.index.clear();
        failures.extend(self.purge_staging());
        failures
    }

    fn purge_staging(&mut self) -> Vec<(String, ModuleError)> {
        self.staging
            .purge()
            .into_iter()
            .map(|(path, e)| {
                let name = path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (name.clone(), ModuleError::io(&name, path, e))
            })
            .collect()
    }

    /// Swap `name` to the current contents of its source binary.
    ///
    /// State written by the old version's `unload_<name>` is replayed into
    /// the new version's `load_<name>`. When the new binary cannot be staged
    /// or mapped, the configured [`FailurePolicy`] decides whether the module
    /// is dropped or the previous binary is re-mapped.
    pub fn reload(&mut self, name: &str, context: HostContext) -> ModuleResult<ReloadReport> {
        let started = Instant::now();

        let Some(ModuleRecord { info, handle }) = self.modules.remove(name) else {
            warn!("Cannot reload {}: not loaded", name);
            return Err(ModuleError::not_found(name));
        };

        let previous_version = info.version;
        info!("Reloading module {} (v{})", name, previous_version);
        self.emit(ReloadEvent::ReloadStarted {
            name: name.to_string(),
            version: previous_version,
        });

        let mut warnings = Vec::new();

        // Capture the outgoing version's state, then release it
        let mut captured = Vec::new();
        {
            let mut sink = StateSink::new(&mut captured);
            if let Err(warning) =
                EntryPoints::resolve(handle.as_ref(), name).call_unload(context, Some(&mut sink))
            {
                self.note(&mut warnings, warning);
            }
        }
        drop(handle);
        debug!("Captured {} state bytes from {}", captured.len(), name);

        let detached = Detached { info, captured };
        let next_version = previous_version + 1;

        let last_modified = match self.loader.modified_time(&detached.info.source_path) {
            Ok(modified) => modified,
            Err(e) => {
                let cause = ModuleError::io(name, &detached.info.source_path, e);
                return Err(self.fail_reload(name, detached, cause, context));
            }
        };

        let staged = match self
            .staging
            .stage(name, &detached.info.source_path, next_version)
        {
            Ok(staged) => staged,
            Err(e) => {
                error!(
                    "Failed to stage module {} from {:?}: {}",
                    name, detached.info.source_path, e
                );
                let cause = ModuleError::io(name, &detached.info.source_path, e);
                return Err(self.fail_reload(name, detached, cause, context));
            }
        };

        let handle = match self.loader.map(&staged.path) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to map module {} from {:?}: {}", name, staged.path, e);
                let leftover = self.discard_staged(name, &staged.path);
                let cause = ModuleError::LoadFailure {
                    name: name.to_string(),
                    path: staged.path,
                    source: e,
                }
                .with_cleanup(leftover);
                return Err(self.fail_reload(name, detached, cause, context));
            }
        };

        let Detached { info, captured } = detached;

        // Replay into the incoming version
        {
            let mut source = StateSource::new(&captured);
            if let Err(warning) =
                EntryPoints::resolve(handle.as_ref(), name).call_load(context, Some(&mut source))
            {
                self.note(&mut warnings, warning);
            }
            if source.remaining() > 0 {
                debug!(
                    "Module {} left {} state bytes unread",
                    name,
                    source.remaining()
                );
            }
        }

        if let Some(err) = self.discard_staged(name, &info.staged_path) {
            warnings.push(err);
        }
        self.index.remove(&info.staged_path);
        self.index.insert(&staged.path, name);

        let new_info = ModuleInfo {
            staged_path: staged.path,
            version: next_version,
            reload_count: info.reload_count + 1,
            last_modified,
            digest: staged.digest,
            ..info
        };
        self.modules.insert(
            name.to_string(),
            ModuleRecord {
                info: new_info,
                handle,
            },
        );

        let duration = started.elapsed();
        info!(
            "Module {} reloaded to v{} in {:?} ({} state bytes)",
            name,
            next_version,
            duration,
            captured.len()
        );
        self.emit(ReloadEvent::ReloadCompleted {
            name: name.to_string(),
            version: next_version,
            state_bytes: captured.len(),
            duration,
        });

        Ok(ReloadReport {
            name: name.to_string(),
            outcome: ReloadOutcome::Reloaded {
                version: next_version,
            },
            previous_version,
            state_bytes: captured.len(),
            duration,
            warnings,
        })
    }

    /// Apply the failure policy after the new binary could not be brought up
    fn fail_reload(
        &mut self,
        name: &str,
        detached: Detached,
        cause: ModuleError,
        context: HostContext,
    ) -> ModuleError {
        let Detached { info, captured } = detached;

        let (outcome, leftover) = match self.try_rollback(name, info, &captured, context) {
            Ok(version) => (ReloadOutcome::RolledBack { version }, None),
            Err(info) => {
                let leftover = self.discard_staged(name, &info.staged_path);
                self.index.remove_module(name);
                error!(
                    "Module {} unloaded after failed reload; {} state bytes dropped",
                    name,
                    captured.len()
                );
                (ReloadOutcome::Unloaded, leftover)
            }
        };
        let cause = cause.with_cleanup(leftover);

        self.emit(ReloadEvent::ReloadFailed {
            name: name.to_string(),
            error: cause.to_string(),
            outcome,
        });

        ModuleError::ReloadFailed {
            name: name.to_string(),
            outcome,
            source: Box::new(cause),
        }
    }

    /// Re-map the previous staged copy and replay `captured` into it.
    ///
    /// Hands `info` back when the policy forbids it or the re-map fails.
    fn try_rollback(
        &mut self,
        name: &str,
        info: ModuleInfo,
        captured: &[u8],
        context: HostContext,
    ) -> Result<u64, ModuleInfo> {
        if self.failure_policy != FailurePolicy::Rollback {
            return Err(info);
        }

        let handle = match self.loader.map(&info.staged_path) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Rollback of module {} failed, unloading it: {}", name, e);
                return Err(info);
            }
        };

        warn!(
            "Rolling back module {} to v{} from {:?}",
            name, info.version, info.staged_path
        );
        let mut source = StateSource::new(captured);
        if let Err(warning) =
            EntryPoints::resolve(handle.as_ref(), name).call_load(context, Some(&mut source))
        {
            self.announce(&warning);
        }

        let version = info.version;
        self.modules
            .insert(name.to_string(), ModuleRecord { info, handle });
        Ok(version)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Snapshot of a loaded module
    pub fn info(&self, name: &str) -> Option<ModuleInfo> {
        self.modules.get(name).map(|record| record.info.clone())
    }

    /// Current version of a loaded module
    pub fn version(&self, name: &str) -> Option<u64> {
        self.modules.get(name).map(|record| record.info.version)
    }

    /// Snapshots of every loaded module, sorted by name
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let mut modules: Vec<ModuleInfo> =
            self.modules.values().map(|r| r.info.clone()).collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules
    }

    /// Logical names of loaded modules, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Whether the source binary was modified after the module was (re)loaded
    pub fn is_stale(&self, name: &str) -> ModuleResult<bool> {
        let record = self
            .modules
            .get(name)
            .ok_or_else(|| ModuleError::not_found(name))?;
        let modified = self
            .loader
            .modified_time(&record.info.source_path)
            .map_err(|e| ModuleError::io(name, &record.info.source_path, e))?;
        Ok(modified > record.info.last_modified)
    }

    /// Whether the source binary's bytes differ from the mapped copy
    pub fn has_changed(&self, name: &str) -> ModuleResult<bool> {
        let record = self
            .modules
            .get(name)
            .ok_or_else(|| ModuleError::not_found(name))?;
        let digest = file_digest(&record.info.source_path)
            .map_err(|e| ModuleError::io(name, &record.info.source_path, e))?;
        Ok(digest != record.info.digest)
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        if !self.modules.is_empty() {
            warn!(
                "Module registry dropped with {} modules loaded; releasing without unload",
                self.modules.len()
            );
            self.reset();
        } else {
            self.purge_staging();
        }
    }
}
