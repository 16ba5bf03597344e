//! Staging area for module binaries
//!
//! The loader never maps a source binary directly: a build tool may be
//! rewriting it, and the old version must stay mapped while the new one is
//! loaded. Every (re)load maps a private copy named after the module, its
//! version and a random disambiguator, e.g. `physics-v3-0190b6c1….so`.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::symbols::is_valid_name;

/// A staged copy of a source binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBinary {
    /// Path of the copy inside the staging directory
    pub path: PathBuf,
    /// SHA-256 of the copied bytes, lowercase hex
    pub digest: String,
}

/// Private directory of staged module copies
pub struct StagingArea {
    dir: PathBuf,
    /// Keeps a temporary directory alive; removed with the area
    _temp: Option<TempDir>,
    /// Files this area created and has not deleted yet
    staged: BTreeSet<PathBuf>,
}

impl StagingArea {
    /// Stage into `dir`, created on first use
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            _temp: None,
            staged: BTreeSet::new(),
        }
    }

    /// Stage into a fresh temporary directory removed on drop
    pub fn temporary() -> io::Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("hotswap-staging-")
            .tempdir()?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
            staged: BTreeSet::new(),
        })
    }

    /// The staging directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn staged_name(name: &str, source: &Path, version: u64) -> String {
        let nonce = uuid::Uuid::now_v7().simple();
        match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}-v{}-{}.{}", name, version, nonce, ext),
            None => format!("{}-v{}-{}", name, version, nonce),
        }
    }

    /// Copy `source` byte-for-byte into the staging directory
    pub fn stage(&mut self, name: &str, source: &Path, version: u64) -> io::Result<StagedBinary> {
        if !is_valid_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid module name {:?}", name),
            ));
        }
        std::fs::create_dir_all(&self.dir)?;

        let mut path = self.dir.join(Self::staged_name(name, source, version));
        while path.exists() || self.staged.contains(&path) {
            path = self.dir.join(Self::staged_name(name, source, version));
        }

        if let Err(e) = std::fs::copy(source, &path) {
            discard_partial(&path);
            return Err(e);
        }

        let digest = match file_digest(&path) {
            Ok(digest) => digest,
            Err(e) => {
                discard_partial(&path);
                return Err(e);
            }
        };

        debug!("Staged {:?} as {:?}", source, path);
        self.staged.insert(path.clone());

        Ok(StagedBinary { path, digest })
    }

    /// Delete a staged copy.
    ///
    /// The caller must have released every native handle mapping it.
    pub fn unstage(&mut self, staged_path: &Path) -> io::Result<()> {
        match std::fs::remove_file(staged_path) {
            Ok(()) => {
                debug!("Removed staged file {:?}", staged_path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Staged file already gone: {:?}", staged_path);
            }
            Err(e) => return Err(e),
        }
        self.staged.remove(staged_path);
        Ok(())
    }

    /// Whether `path` is a live copy created by this area
    pub fn is_staged(&self, path: &Path) -> bool {
        self.staged.contains(path)
    }

    /// Live copies created by this area
    pub fn staged_files(&self) -> impl Iterator<Item = &Path> {
        self.staged.iter().map(PathBuf::as_path)
    }

    /// Delete every copy still present, returning the ones that failed
    pub fn purge(&mut self) -> Vec<(PathBuf, io::Error)> {
        let paths: Vec<PathBuf> = self.staged.iter().cloned().collect();
        paths
            .into_iter()
            .filter_map(|path| match self.unstage(&path) {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to purge staged file {:?}: {}", path, e);
                    Some((path, e))
                }
            })
            .collect()
    }
}

fn discard_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!("Failed to remove partial copy {:?}: {}", path, e);
    }
}

/// SHA-256 of a file's contents, lowercase hex
pub fn file_digest(path: &Path) -> io::Result<String> {
    let contents = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}
