//! Error taxonomy for the native bootstrap bridge.

use std::io;
use std::path::PathBuf;

/// Exit code used when the bridge fails before the native entry point is reached.
pub const BRIDGE_FAILURE_EXIT_CODE: u8 = 1;

/// Result alias used across the bridge modules
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Everything that can go wrong between picking an artifact and getting a status byte back.
///
/// All variants except [`BridgeError::NativeRuntimeFailure`] are bridge-stage defects:
/// there is no fallback artifact and nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("unsupported platform: os `{os}`, architecture `{arch}`")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("native artifact not found in bundle: {resource_path}")]
    ArtifactNotFound { resource_path: String },

    #[error("failed to extract {resource_path} to {}: {source}", .path.display())]
    ExtractionIo {
        resource_path: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load native library {}: {source}", .path.display())]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("entry point `{symbol}` not found in {}: {source}", .path.display())]
    SymbolResolution {
        symbol: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("invalid native argument at position {index}: contains a NUL byte")]
    InvalidArgument { index: usize },

    #[error("native component exited with status {status}")]
    NativeRuntimeFailure { status: u8 },
}

impl BridgeError {
    /// Whether the error was raised before the native entry point ran.
    #[must_use]
    pub fn is_bridge_stage(&self) -> bool {
        !matches!(self, Self::NativeRuntimeFailure { .. })
    }

    /// Process exit code this error maps to when running standalone.
    ///
    /// A native failure passes its own status through; every bridge-stage
    /// failure collapses to [`BRIDGE_FAILURE_EXIT_CODE`].
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NativeRuntimeFailure { status } => *status,
            _ => BRIDGE_FAILURE_EXIT_CODE,
        }
    }
}
