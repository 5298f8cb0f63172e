//! Native bridge
//!
//! Loads an extracted server library into this process and calls its single
//! exported entry point with an argv-style vector. The call blocks until the
//! native server decides to return; there is no way to interrupt it from here.

use crate::artifact::{extract, release_extracted, ArtifactHandle, EmbeddedNatives, ResourceBundle};
use crate::error::{BridgeError, BridgeResult};
use crate::platform::{self, PlatformDescriptor};
use libloading::{Library, Symbol};
use std::ffi::{c_char, c_int, CString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Exported symbol every native artifact must provide
pub const ENTRY_SYMBOL: &str = "start_app";

/// Token passed as `argv[0]`; the native argument parser skips it
pub const SYNTHETIC_PROGRAM_NAME: &str = "limbo_bridge";

/// Raw ABI of [`ENTRY_SYMBOL`]
pub type RawEntryPoint = unsafe extern "C" fn(argc: c_int, argv: *const *const c_char) -> u8;

/// Process-style arguments for one native invocation.
///
/// Always `[program_name, "--config", <path>, extra...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationArgs {
    args: Vec<String>,
}

impl InvocationArgs {
    /// Arguments pointing the native server at `config_path`
    pub fn for_config<P: AsRef<Path>>(config_path: P) -> Self {
        Self::with_program_name(SYNTHETIC_PROGRAM_NAME, config_path)
    }

    pub fn with_program_name<P: AsRef<Path>>(program_name: &str, config_path: P) -> Self {
        Self {
            args: vec![
                program_name.to_string(),
                "--config".to_string(),
                config_path.as_ref().to_string_lossy().into_owned(),
            ],
        }
    }

    /// Append caller-supplied arguments after the config pair
    #[must_use]
    pub fn extra<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn program_name(&self) -> &str {
        &self.args[0]
    }

    #[must_use]
    pub fn config_path(&self) -> &str {
        &self.args[2]
    }
}

impl fmt::Display for InvocationArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// NUL-terminated copies of the arguments plus the pointer array handed to C.
/// The pointers borrow from `_strings`, so both live and die together.
struct CArgv {
    _strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CArgv {
    fn new(args: &InvocationArgs) -> BridgeResult<Self> {
        let strings = args
            .as_slice()
            .iter()
            .enumerate()
            .map(|(index, arg)| {
                CString::new(arg.as_bytes()).map_err(|_| BridgeError::InvalidArgument { index })
            })
            .collect::<BridgeResult<Vec<_>>>()?;

        if c_int::try_from(strings.len()).is_err() {
            return Err(BridgeError::InvalidArgument {
                index: strings.len(),
            });
        }

        let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        // argv[argc] is NULL by C convention
        ptrs.push(std::ptr::null());

        Ok(Self {
            _strings: strings,
            ptrs,
        })
    }

    fn argc(&self) -> c_int {
        // Bounded by the check in `new`
        (self.ptrs.len() - 1) as c_int
    }

    fn argv(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

/// Status byte returned by the native entry point, read as a process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(u8);

impl ExitStatus {
    pub const SUCCESS: Self = Self(0);

    #[must_use]
    pub fn from_code(code: u8) -> Self {
        Self(code)
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn success(self) -> bool {
        self.0 == 0
    }

    /// Turn a non-zero status into [`BridgeError::NativeRuntimeFailure`]
    ///
    /// # Errors
    /// Returns the failure carrying the original status when it is non-zero.
    pub fn into_result(self) -> BridgeResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(BridgeError::NativeRuntimeFailure { status: self.0 })
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.0)
    }
}

/// A native artifact loaded into this process
pub struct NativeLibrary {
    library: Library,
    path: PathBuf,
}

impl NativeLibrary {
    /// Load the shared library at `path`
    ///
    /// # Errors
    /// Returns [`BridgeError::LibraryLoad`] with the loader's diagnostic when the file is
    /// missing, built for another target, or has unresolved dependencies.
    pub fn load<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let path = path.as_ref();
        // SAFETY: Running the library's initializers is inherent to loading a native artifact.
        let library = unsafe { Library::new(path) }.map_err(|source| BridgeError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded native library {}", path.display());

        Ok(Self {
            library,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve [`ENTRY_SYMBOL`] once
    ///
    /// # Errors
    /// Returns [`BridgeError::SymbolResolution`] if the artifact does not export it.
    pub fn entry_point(&self) -> BridgeResult<NativeEntryPoint<'_>> {
        // SAFETY: The symbol type matches the agreed entry point ABI.
        let func: Symbol<'_, RawEntryPoint> = unsafe {
            self.library.get(ENTRY_SYMBOL.as_bytes())
        }
        .map_err(|source| BridgeError::SymbolResolution {
            symbol: ENTRY_SYMBOL.to_string(),
            path: self.path.clone(),
            source,
        })?;

        Ok(NativeEntryPoint { func })
    }

    /// Keep the library mapped for the rest of the process.
    ///
    /// Native server threads can outlive the entry point call, so the image is never unloaded.
    pub fn keep_loaded(self) {
        std::mem::forget(self.library);
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// The resolved entry point, `(args) -> status`
pub struct NativeEntryPoint<'lib> {
    func: Symbol<'lib, RawEntryPoint>,
}

impl NativeEntryPoint<'_> {
    /// Call the native component and block until it returns
    ///
    /// # Errors
    /// Returns [`BridgeError::InvalidArgument`] if an argument cannot be passed as a C string.
    pub fn call(&self, args: &InvocationArgs) -> BridgeResult<ExitStatus> {
        let argv = CArgv::new(args)?;
        Ok(self.call_marshalled(&argv))
    }

    fn call_marshalled(&self, argv: &CArgv) -> ExitStatus {
        // SAFETY: argv holds argc valid NUL-terminated strings followed by NULL,
        // all alive for the duration of the call.
        let code = unsafe { (self.func)(argv.argc(), argv.argv()) };
        ExitStatus(code)
    }
}

/// Load the extracted artifact and run its entry point with `args`.
///
/// Arguments are validated before anything is loaded.
///
/// # Errors
/// [`BridgeError::InvalidArgument`], [`BridgeError::LibraryLoad`] or
/// [`BridgeError::SymbolResolution`]. A non-zero status is returned as `Ok`;
/// use [`ExitStatus::into_result`] to treat it as a failure.
pub fn invoke(handle: &ArtifactHandle, args: &InvocationArgs) -> BridgeResult<ExitStatus> {
    let argv = CArgv::new(args)?;
    let library = NativeLibrary::load(&handle.temporary_file_path)?;
    let status = {
        let entry = library.entry_point()?;
        info!("Starting native component: {}", args);
        entry.call_marshalled(&argv)
    };
    library.keep_loaded();

    if status.success() {
        info!("Native component exited cleanly");
    } else {
        warn!("Native component exited with status {}", status);
    }
    Ok(status)
}

/// Resolve, extract and invoke in one step, logging enough context to diagnose a
/// packaging defect on failure.
///
/// # Errors
/// Any bridge-stage [`BridgeError`]; the native status itself is returned as `Ok`.
pub fn launch(bundle: &dyn ResourceBundle, args: &InvocationArgs) -> BridgeResult<ExitStatus> {
    let (descriptor, handle) = resolve_and_extract(bundle)?;
    invoke_logged(&descriptor, &handle, args)
}

fn resolve_and_extract(
    bundle: &dyn ResourceBundle,
) -> BridgeResult<(PlatformDescriptor, ArtifactHandle)> {
    let descriptor = platform::resolve().map_err(|e| {
        error!("Cannot pick a native artifact: {}", e);
        e
    })?;
    debug!(
        "Resolved platform {} -> {}",
        descriptor, descriptor.resource_subpath
    );

    let handle = extract(bundle, &descriptor).map_err(|e| {
        error!(
            "Extraction failed for {} (resource {}): {}",
            descriptor, descriptor.resource_subpath, e
        );
        e
    })?;
    Ok((descriptor, handle))
}

fn invoke_logged(
    descriptor: &PlatformDescriptor,
    handle: &ArtifactHandle,
    args: &InvocationArgs,
) -> BridgeResult<ExitStatus> {
    invoke(handle, args).map_err(|e| {
        error!(
            "Native bridge failed for {} (resource {}, file {}): {}",
            descriptor,
            handle.source_resource_path,
            handle.temporary_file_path.display(),
            e
        );
        e
    })
}

/// Something that can run the native component to completion.
pub trait Launcher: Send + Sync {
    /// Run with `args`, blocking until the component returns
    ///
    /// # Errors
    /// Any bridge-stage failure.
    fn launch(&self, args: &InvocationArgs) -> BridgeResult<ExitStatus>;

    /// Delete whatever this launcher extracted. Called when the host shuts down;
    /// returns how many files were removed.
    fn release_artifacts(&self) -> usize {
        0
    }
}

/// [`Launcher`] backed by a resource bundle and the real dynamic loader
#[derive(Clone)]
pub struct NativeLauncher {
    bundle: Arc<dyn ResourceBundle>,
    extracted: Arc<Mutex<Vec<PathBuf>>>,
}

impl NativeLauncher {
    pub fn new(bundle: Arc<dyn ResourceBundle>) -> Self {
        Self {
            bundle,
            extracted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Launcher over the artifacts compiled into this binary
    #[must_use]
    pub fn embedded() -> Self {
        Self::new(Arc::new(EmbeddedNatives))
    }

    /// Temporary files extracted by this launcher and not yet released
    #[must_use]
    pub fn extracted(&self) -> Vec<PathBuf> {
        self.extracted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Launcher for NativeLauncher {
    fn launch(&self, args: &InvocationArgs) -> BridgeResult<ExitStatus> {
        let (descriptor, handle) = resolve_and_extract(self.bundle.as_ref())?;
        self.extracted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.temporary_file_path.clone());
        invoke_logged(&descriptor, &handle, args)
    }

    fn release_artifacts(&self) -> usize {
        let mut extracted = self.extracted.lock().unwrap_or_else(PoisonError::into_inner);
        let before = extracted.len();
        // Unlinking a mapped library is fine on Unix; Windows keeps the file until exit
        extracted.retain(|path| !release_extracted(path));
        let remaining = extracted.len();
        drop(extracted);
        if remaining > 0 {
            debug!("{} extracted artifact(s) left for exit cleanup", remaining);
        }
        before - remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_args_without_extras() {
        let args = InvocationArgs::for_config("/data/server.toml");
        assert_eq!(
            args.as_slice(),
            &[
                SYNTHETIC_PROGRAM_NAME.to_string(),
                "--config".to_string(),
                "/data/server.toml".to_string()
            ]
        );
        assert_eq!(args.program_name(), SYNTHETIC_PROGRAM_NAME);
        assert_eq!(args.config_path(), "/data/server.toml");
    }

    #[test]
    fn test_args_keep_extra_order() {
        let args = InvocationArgs::for_config("/data/server.toml").extra(["--verbose", "-v"]);
        assert_eq!(args.as_slice()[3..], ["--verbose".to_string(), "-v".to_string()]);
        assert_eq!(
            args.to_string(),
            format!("{SYNTHETIC_PROGRAM_NAME} --config /data/server.toml --verbose -v")
        );
    }

    #[test]
    fn test_argv_marshalling() {
        let args = InvocationArgs::for_config("/data/server.toml").extra(["ünïcode"]);
        let argv = CArgv::new(&args).unwrap();
        assert_eq!(argv.argc(), 4);

        for (i, expected) in args.as_slice().iter().enumerate() {
            // SAFETY: pointers come from live CStrings owned by argv
            let s = unsafe { CStr::from_ptr(*argv.argv().add(i)) };
            assert_eq!(s.to_str().unwrap(), expected);
        }
        // SAFETY: the array has argc + 1 entries
        assert!(unsafe { *argv.argv().add(4) }.is_null());
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let args = InvocationArgs::for_config("/data/server.toml").extra(["bad\0arg"]);
        match CArgv::new(&args) {
            Err(BridgeError::InvalidArgument { index }) => assert_eq!(index, 3),
            other => panic!("expected InvalidArgument, got {:?}", other.map(|a| a.argc())),
        }
    }

    #[test]
    fn test_exit_status_mapping() {
        assert!(ExitStatus::SUCCESS.success());
        assert!(ExitStatus::SUCCESS.into_result().is_ok());

        let failed = ExitStatus::from_code(42);
        assert!(!failed.success());
        assert_eq!(failed.code(), 42);
        match failed.into_result() {
            Err(BridgeError::NativeRuntimeFailure { status }) => assert_eq!(status, 42),
            other => panic!("expected NativeRuntimeFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.so");
        match NativeLibrary::load(&path) {
            Err(BridgeError::LibraryLoad { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected LibraryLoad, got {other:?}"),
        }
    }

    #[test]
    fn test_load_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"definitely not a shared library").unwrap();

        let handle = ArtifactHandle {
            source_resource_path: "/linux/x86_64/garbage.so".to_string(),
            temporary_file_path: path,
        };
        let err = invoke(&handle, &InvocationArgs::for_config("/data/server.toml")).unwrap_err();
        assert!(matches!(err, BridgeError::LibraryLoad { .. }), "{err:?}");
        assert!(err.is_bridge_stage());
    }

    #[test]
    fn test_invalid_args_fail_before_loading() {
        let handle = ArtifactHandle {
            source_resource_path: "/linux/x86_64/libpico_limbo.so".to_string(),
            temporary_file_path: PathBuf::from("/nonexistent/libpico_limbo.so"),
        };
        let args = InvocationArgs::for_config("/data/server.toml").extra(["\0"]);
        assert!(matches!(
            invoke(&handle, &args),
            Err(BridgeError::InvalidArgument { index: 3 })
        ));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_missing_entry_symbol() {
        let library = NativeLibrary::load("libc.so.6").unwrap();
        match library.entry_point() {
            Err(BridgeError::SymbolResolution { symbol, .. }) => assert_eq!(symbol, ENTRY_SYMBOL),
            Err(other) => panic!("expected SymbolResolution, got {other:?}"),
            Ok(_) => panic!("libc must not export {ENTRY_SYMBOL}"),
        }
    }
}
