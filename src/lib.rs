//! limbo-bridge - run a precompiled limbo server in-process
//!
//! This library bundles the native server as a shared library per platform,
//! picks the one matching the running host, extracts it and calls its entry
//! point, either standalone or on behalf of a plugin host.
//!
//! # Modules
//!
//! - [`platform`]: Maps OS and CPU architecture to the bundled artifact
//! - [`artifact`]: Resource bundles and extraction to a temporary file
//! - [`bridge`]: Loading the library and calling its entry point
//! - [`lifecycle`]: Start-once / stop-best-effort integration for plugin hosts
//! - [`config`]: Launcher settings for the standalone binary
//! - [`error`]: Error taxonomy and exit code mapping

pub mod artifact;
pub mod bridge;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod platform;

pub use bridge::{invoke, launch, ExitStatus, InvocationArgs, Launcher, NativeLauncher};
pub use error::{BridgeError, BridgeResult, BRIDGE_FAILURE_EXIT_CODE};
