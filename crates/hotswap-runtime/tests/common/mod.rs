//! Shared fixtures for registry and coordinator tests.
//!
//! Module "binaries" are small text files naming one of the in-process
//! symbol tables below. The fake loader reads the file at map time, so a
//! staged copy keeps behaving like the bytes it was copied from.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use hotswap_kernel::{EntryPoint, LoaderError, ModuleLoader, NativeLibrary, StateChannel};
use hotswap_runtime::{FailurePolicy, ModuleRegistry, StagingArea, library_file_name};
use tempfile::TempDir;

thread_local! {
    static COUNTER: Cell<u32> = const { Cell::new(0) };
    static CALLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static CONTEXTS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn record(call: &str, context: *mut c_void) {
    CALLS.with(|c| c.borrow_mut().push(call.to_string()));
    CONTEXTS.with(|c| c.borrow_mut().push(context as usize));
}

/// Entry points invoked on this thread, oldest first
pub fn calls() -> Vec<String> {
    CALLS.with(|c| c.borrow().clone())
}

/// Context pointers seen by entry points on this thread
pub fn contexts() -> Vec<usize> {
    CONTEXTS.with(|c| c.borrow().clone())
}

pub fn counter() -> u32 {
    COUNTER.with(Cell::get)
}

unsafe extern "C" fn load_counter(context: *mut c_void, channel: *mut StateChannel) {
    let value = match unsafe { StateChannel::from_raw(channel) } {
        Some(channel) => {
            let mut raw = [0u8; 4];
            match channel.read_exact(&mut raw) {
                Ok(()) => u32::from_le_bytes(raw),
                Err(_) => 0,
            }
        }
        None => 0,
    };
    COUNTER.with(|c| c.set(value));
    record("load_counter", context);
}

unsafe extern "C" fn unload_counter(context: *mut c_void, channel: *mut StateChannel) {
    if let Some(channel) = unsafe { StateChannel::from_raw(channel) } {
        let next = COUNTER.with(Cell::get) + 1;
        let _ = channel.write_all(&next.to_le_bytes());
    }
    record("unload_counter", context);
}

unsafe extern "C" fn load_audio(context: *mut c_void, _channel: *mut StateChannel) {
    record("load_audio", context);
}

unsafe extern "C" fn unload_audio(context: *mut c_void, _channel: *mut StateChannel) {
    record("unload_audio", context);
}

unsafe extern "C" fn load_physics(context: *mut c_void, _channel: *mut StateChannel) {
    record("load_physics", context);
}

unsafe extern "C" fn unload_physics(context: *mut c_void, _channel: *mut StateChannel) {
    record("unload_physics", context);
}

/// Symbol table for an image name
fn image(name: &str) -> Option<Vec<(&'static str, EntryPoint)>> {
    let table: Vec<(&'static str, EntryPoint)> = match name {
        "counter" => vec![
            ("load_counter", load_counter as EntryPoint),
            ("unload_counter", unload_counter as EntryPoint),
        ],
        "audio" => vec![
            ("load_audio", load_audio as EntryPoint),
            ("unload_audio", unload_audio as EntryPoint),
        ],
        "physics" => vec![
            ("load_physics", load_physics as EntryPoint),
            ("unload_physics", unload_physics as EntryPoint),
        ],
        "physics-unload-only" => vec![("unload_physics", unload_physics as EntryPoint)],
        "empty" => Vec::new(),
        _ => return None,
    };
    Some(table)
}

/// Counters shared between a loader and the test
#[derive(Debug, Default)]
pub struct LoaderStats {
    pub mapped: AtomicUsize,
    pub live: AtomicUsize,
    /// Handles whose backing file vanished before they were dropped
    pub deleted_while_mapped: AtomicUsize,
}

impl LoaderStats {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn mapped(&self) -> usize {
        self.mapped.load(Ordering::SeqCst)
    }

    pub fn deleted_while_mapped(&self) -> usize {
        self.deleted_while_mapped.load(Ordering::SeqCst)
    }
}

pub struct FakeLoader {
    stats: Arc<LoaderStats>,
}

impl FakeLoader {
    pub fn new(stats: Arc<LoaderStats>) -> Self {
        Self { stats }
    }
}

impl ModuleLoader for FakeLoader {
    fn map(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, LoaderError> {
        let contents = std::fs::read_to_string(path)?;
        if contents.trim() == "squatter" {
            // swap the staged file for a directory so deleting it fails
            std::fs::remove_file(path)?;
            std::fs::create_dir(path)?;
            std::fs::write(path.join("hold"), "squatter")?;
            return Err(LoaderError::Map {
                path: path.to_path_buf(),
                reason: "staged file replaced by a directory".to_string(),
            });
        }
        let symbols = image(contents.trim()).ok_or_else(|| LoaderError::Map {
            path: path.to_path_buf(),
            reason: format!("unknown image {:?}", contents.trim()),
        })?;

        self.stats.mapped.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLibrary {
            path: path.to_path_buf(),
            symbols,
            stats: self.stats.clone(),
        }))
    }
}

struct FakeLibrary {
    path: PathBuf,
    symbols: Vec<(&'static str, EntryPoint)>,
    stats: Arc<LoaderStats>,
}

impl NativeLibrary for FakeLibrary {
    fn entry_point(&self, symbol: &str) -> Option<EntryPoint> {
        self.symbols
            .iter()
            .find(|(name, _)| *name == symbol)
            .map(|(_, entry)| *entry)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FakeLibrary {
    fn drop(&mut self) {
        if !self.path.exists() {
            self.stats.deleted_while_mapped.fetch_add(1, Ordering::SeqCst);
        }
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Source and staging directories plus a loader wired to them
pub struct Fixture {
    pub source: TempDir,
    pub staging: TempDir,
    pub stats: Arc<LoaderStats>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            source: tempfile::tempdir().unwrap(),
            staging: tempfile::tempdir().unwrap(),
            stats: Arc::new(LoaderStats::default()),
        }
    }

    pub fn source_dir(&self) -> &Path {
        self.source.path()
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Write `image` as the build output of module `name`
    pub fn write_module(&self, name: &str, image: &str) -> PathBuf {
        let path = self.source_dir().join(library_file_name(name));
        std::fs::write(&path, image).unwrap();
        path
    }

    /// Push the source file's modification time into the future
    pub fn touch(&self, name: &str) {
        let path = self.source_dir().join(library_file_name(name));
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
    }

    pub fn registry(&self) -> ModuleRegistry {
        ModuleRegistry::new(
            Arc::new(FakeLoader::new(self.stats.clone())),
            StagingArea::new(self.staging_dir()),
        )
        .with_source_dir(self.source_dir())
    }

    pub fn registry_with_policy(&self, policy: FailurePolicy) -> ModuleRegistry {
        self.registry().with_failure_policy(policy)
    }

    /// Files in the staging directory belonging to `name`
    pub fn staged_files(&self, name: &str) -> Vec<PathBuf> {
        let prefix = format!("{}-v", name);
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.staging_dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .and_then(|f| f.to_str())
                    .is_some_and(|f| f.starts_with(&prefix))
            })
            .collect();
        files.sort();
        files
    }

    /// Every file in the staging directory
    pub fn staging_len(&self) -> usize {
        std::fs::read_dir(self.staging_dir()).unwrap().count()
    }
}
