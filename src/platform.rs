//! Platform resolution
//!
//! Maps the running operating system and CPU architecture onto the one bundled
//! native artifact built for it. The table is fixed at compile time; a target
//! missing from it has no artifact and cannot be launched.

use crate::error::{BridgeError, BridgeResult};
use std::fmt;

/// Artifact family name, baked in at build time.
pub const LIBRARY_NAME: &str = match option_env!("LIMBO_BRIDGE_LIB_NAME") {
    Some(name) => name,
    None => "pico_limbo",
};

/// Operating system families that ship a native artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Windows,
    MacOs,
    Linux,
}

impl OsFamily {
    /// Directory name used for this family in the resource layout
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
        }
    }

    /// Parse an OS name as reported by the host (`std::env::consts::OS`,
    /// a JVM-style `os.name`, `uname -s`).
    #[must_use]
    pub fn parse(os: &str) -> Option<Self> {
        let os = os.trim().to_ascii_lowercase();
        if os.starts_with("windows") {
            Some(Self::Windows)
        } else if os == "macos" || os == "darwin" || os.starts_with("mac os") {
            Some(Self::MacOs)
        } else if os == "linux" {
            Some(Self::Linux)
        } else {
            None
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved artifact descriptor for one supported target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDescriptor {
    pub os_family: OsFamily,
    pub architecture: &'static str,
    pub library_prefix: &'static str,
    pub file_extension: &'static str,
    pub resource_subpath: String,
}

impl PlatformDescriptor {
    /// File name of the artifact without its platform directory
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}{}{}",
            self.library_prefix, LIBRARY_NAME, self.file_extension
        )
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os_family, self.architecture)
    }
}

struct TableEntry {
    os_family: OsFamily,
    architecture: &'static str,
    file_extension: &'static str,
    library_prefix: &'static str,
}

const SUPPORTED_TARGETS: &[TableEntry] = &[
    TableEntry {
        os_family: OsFamily::Windows,
        architecture: "x86_64",
        file_extension: ".dll",
        library_prefix: "",
    },
    TableEntry {
        os_family: OsFamily::MacOs,
        architecture: "aarch64",
        file_extension: ".dylib",
        library_prefix: "lib",
    },
    TableEntry {
        os_family: OsFamily::Linux,
        architecture: "x86_64",
        file_extension: ".so",
        library_prefix: "lib",
    },
    TableEntry {
        os_family: OsFamily::Linux,
        architecture: "aarch64",
        file_extension: ".so",
        library_prefix: "lib",
    },
];

/// Canonicalize architecture aliases to the tokens used in the resource layout.
#[must_use]
pub fn normalize_arch(arch: &str) -> String {
    let arch = arch.trim().to_ascii_lowercase();
    match arch.as_str() {
        "amd64" | "x64" | "x86-64" => "x86_64".to_string(),
        "arm64" => "aarch64".to_string(),
        _ => arch,
    }
}

/// Resolve the descriptor for an explicit OS name and architecture string.
///
/// # Errors
/// Returns [`BridgeError::UnsupportedPlatform`] when the pair has no table entry.
pub fn resolve_for(os: &str, arch: &str) -> BridgeResult<PlatformDescriptor> {
    let unsupported = || BridgeError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    };

    let os_family = OsFamily::parse(os).ok_or_else(unsupported)?;
    let arch = normalize_arch(arch);

    let entry = SUPPORTED_TARGETS
        .iter()
        .find(|e| e.os_family == os_family && e.architecture == arch)
        .ok_or_else(unsupported)?;

    Ok(PlatformDescriptor {
        os_family,
        architecture: entry.architecture,
        library_prefix: entry.library_prefix,
        file_extension: entry.file_extension,
        resource_subpath: format!(
            "/{}/{}/{}{}{}",
            os_family.as_str(),
            entry.architecture,
            entry.library_prefix,
            LIBRARY_NAME,
            entry.file_extension
        ),
    })
}

/// Resolve the descriptor for the platform this process runs on.
///
/// # Errors
/// Returns [`BridgeError::UnsupportedPlatform`] on targets without a bundled artifact.
pub fn resolve() -> BridgeResult<PlatformDescriptor> {
    resolve_for(std::env::consts::OS, std::env::consts::ARCH)
}
