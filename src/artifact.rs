//! Artifact extraction
//!
//! Copies the native artifact for a resolved platform out of a resource bundle
//! into a private temporary file that the dynamic loader can open. Every call
//! produces an independent file; nothing is cached between calls.

use crate::error::{BridgeError, BridgeResult};
use crate::platform::{PlatformDescriptor, LIBRARY_NAME};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempPath;
use tracing::{debug, info};

mod embedded {
    include!(concat!(env!("OUT_DIR"), "/embedded_natives.rs"));
}

/// Read-only source of bundled native artifacts, keyed by resource path
/// (`/{os}/{arch}/{file}`).
pub trait ResourceBundle: Send + Sync {
    /// Open a resource for streaming, or `Ok(None)` if the bundle has no such entry.
    ///
    /// # Errors
    /// Returns an error if the entry exists but cannot be opened.
    fn open(&self, resource_path: &str) -> io::Result<Option<Box<dyn Read + '_>>>;

    /// List every resource path the bundle carries
    fn resource_paths(&self) -> Vec<String>;
}

/// Artifacts compiled into the binary by `build.rs`
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedNatives;

impl ResourceBundle for EmbeddedNatives {
    fn open(&self, resource_path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        Ok(embedded::EMBEDDED_NATIVES
            .iter()
            .find(|(path, _)| *path == resource_path)
            .map(|(_, bytes)| Box::new(*bytes) as Box<dyn Read>))
    }

    fn resource_paths(&self) -> Vec<String> {
        embedded::EMBEDDED_NATIVES
            .iter()
            .map(|(path, _)| (*path).to_string())
            .collect()
    }
}

/// In-memory bundle
#[derive(Debug, Clone, Default)]
pub struct MemoryBundle {
    resources: HashMap<String, Vec<u8>>,
}

impl MemoryBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a resource
    #[must_use]
    pub fn with_resource(mut self, resource_path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(resource_path.into(), bytes.into());
        self
    }
}

impl ResourceBundle for MemoryBundle {
    fn open(&self, resource_path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        Ok(self
            .resources
            .get(resource_path)
            .map(|bytes| Box::new(bytes.as_slice()) as Box<dyn Read + '_>))
    }

    fn resource_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.resources.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Bundle backed by a directory using the same `/{os}/{arch}/{file}` layout
#[derive(Debug, Clone)]
pub struct DirectoryBundle {
    root: PathBuf,
}

impl DirectoryBundle {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, resource_path: &str) -> PathBuf {
        resource_path
            .split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ResourceBundle for DirectoryBundle {
    fn open(&self, resource_path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        let path = self.resolve(resource_path);
        if !path.is_file() {
            return Ok(None);
        }
        File::open(&path).map(|file| Some(Box::new(file) as Box<dyn Read + '_>))
    }

    fn resource_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for os in ["windows", "macos", "linux"] {
            for arch in ["aarch64", "x86_64"] {
                let Ok(entries) = std::fs::read_dir(self.root.join(os).join(arch)) else {
                    continue;
                };
                for entry in entries.flatten() {
                    if entry.path().is_file() {
                        paths.push(format!(
                            "/{os}/{arch}/{}",
                            entry.file_name().to_string_lossy()
                        ));
                    }
                }
            }
        }
        paths.sort();
        paths
    }
}

/// A native artifact materialized on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub source_resource_path: String,
    pub temporary_file_path: PathBuf,
}

static EXIT_CLEANUP: Lazy<Mutex<Vec<TempPath>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn register_for_exit_cleanup(path: TempPath) {
    EXIT_CLEANUP
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(path);
}

/// Paths currently waiting for deletion at process exit
#[must_use]
pub fn pending_exit_cleanup() -> Vec<PathBuf> {
    EXIT_CLEANUP
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .iter()
        .map(|p| p.to_path_buf())
        .collect()
}

/// Delete every extracted artifact registered so far. Returns how many were removed.
///
/// Failures are only noted at debug level: a loaded library image does not
/// depend on its file, and some platforms refuse to unlink a mapped library.
pub fn run_exit_cleanup() -> usize {
    let pending: Vec<TempPath> = std::mem::take(
        &mut *EXIT_CLEANUP
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner),
    );

    let mut removed = 0;
    for path in pending {
        let shown = path.display().to_string();
        match path.close() {
            Ok(()) => {
                debug!("Removed extracted artifact {}", shown);
                removed += 1;
            }
            Err(e) => debug!("Could not remove extracted artifact {}: {}", shown, e),
        }
    }
    removed
}

/// Delete one registered artifact ahead of process exit.
///
/// Returns `false` if `path` is not registered or the file could not be removed.
/// A path that could not be removed stays registered for [`run_exit_cleanup`].
pub fn release_extracted(path: &Path) -> bool {
    let mut pending = EXIT_CLEANUP
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let Some(index) = pending.iter().position(|p| **p == *path) else {
        return false;
    };

    match std::fs::remove_file(path) {
        Ok(()) => {
            drop(pending.swap_remove(index));
            debug!("Released extracted artifact {}", path.display());
            true
        }
        Err(e) => {
            debug!("Could not release extracted artifact {}: {}", path.display(), e);
            false
        }
    }
}

/// Runs [`run_exit_cleanup`] when dropped. Hold one for the lifetime of `main`.
#[derive(Debug, Default)]
#[must_use = "cleanup runs when the guard is dropped"]
pub struct ExitCleanupGuard;

impl Drop for ExitCleanupGuard {
    fn drop(&mut self) {
        run_exit_cleanup();
    }
}

/// Extract the artifact for `descriptor` from `bundle` into a fresh temporary file.
///
/// # Errors
/// - [`BridgeError::ArtifactNotFound`] if the bundle has no entry at the descriptor's subpath.
///   No temporary file is created in that case.
/// - [`BridgeError::ExtractionIo`] on any file-system failure; the partial file is removed.
pub fn extract(
    bundle: &dyn ResourceBundle,
    descriptor: &PlatformDescriptor,
) -> BridgeResult<ArtifactHandle> {
    let resource_path = descriptor.resource_subpath.clone();
    let io_error = |path: &Path, source: io::Error| BridgeError::ExtractionIo {
        resource_path: resource_path.clone(),
        path: path.to_path_buf(),
        source,
    };

    let mut reader = bundle
        .open(&resource_path)
        .map_err(|e| io_error(Path::new(&resource_path), e))?
        .ok_or_else(|| BridgeError::ArtifactNotFound {
            resource_path: resource_path.clone(),
        })?;

    // The suffix matters: some loaders refuse files without the platform extension
    let temp = tempfile::Builder::new()
        .prefix(LIBRARY_NAME)
        .suffix(descriptor.file_extension)
        .tempfile()
        .map_err(|e| io_error(&std::env::temp_dir(), e))?;
    let (mut file, temp_path) = temp.into_parts();

    let written = io::copy(&mut reader, &mut file)
        .and_then(|n| file.flush().map(|()| n))
        .and_then(|n| file.sync_all().map(|()| n))
        .map_err(|e| io_error(&temp_path, e))?;
    drop(file);

    let temporary_file_path = temp_path.to_path_buf();
    register_for_exit_cleanup(temp_path);

    info!(
        "Extracted {} ({} bytes) to {}",
        resource_path,
        written,
        temporary_file_path.display()
    );

    Ok(ArtifactHandle {
        source_resource_path: resource_path,
        temporary_file_path,
    })
}
