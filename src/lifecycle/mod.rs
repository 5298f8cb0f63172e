//! Host lifecycle integration
//!
//! A plugin host drives the native component through two events: init starts it
//! exactly once on a background executor, shutdown asks it to stop. The native
//! call cannot be interrupted, so shutdown is a request the component may outlive.

pub mod executor;
pub mod worker;

pub use executor::{BackgroundExecutor, Job, ScheduledTask, ThreadExecutor, TokioExecutor};
pub use worker::{StopOutcome, WorkerHandle, WorkerOutcome, WorkerState};

use crate::bridge::{InvocationArgs, Launcher, NativeLauncher, SYNTHETIC_PROGRAM_NAME};
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

/// Configuration file the native server reads from the data directory
pub const CONFIG_FILE_NAME: &str = "server.toml";

/// The two lifecycle events a plugin host delivers
pub trait HostPlugin {
    /// Host finished initializing; start the component
    ///
    /// # Errors
    /// Returns an error when startup fails; the host should report the plugin as failed.
    fn on_init(&self) -> Result<()>;

    /// Host is shutting down
    fn on_shutdown(&self);
}

/// What an adapter needs from its host
pub trait HostContext: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &str;

    /// Plugin data directory; holds `server.toml`
    fn data_directory(&self) -> &Path;

    /// Where blocking work may run
    fn executor(&self) -> &dyn BackgroundExecutor;
}

/// A plain [`HostContext`] for the two supported host styles
pub struct PluginHost {
    name: String,
    data_directory: PathBuf,
    executor: Box<dyn BackgroundExecutor>,
}

impl PluginHost {
    pub fn new(
        name: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        executor: Box<dyn BackgroundExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            data_directory: data_directory.into(),
            executor,
        }
    }

    /// Proxy-style host: async runs on a dedicated thread, no task handle
    pub fn threaded(name: impl Into<String>, data_directory: impl Into<PathBuf>) -> Self {
        Self::new(name, data_directory, Box::new(ThreadExecutor::default()))
    }

    /// Scheduler-style host: cancellable tasks on a tokio runtime
    pub fn scheduled(
        name: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self::new(name, data_directory, Box::new(TokioExecutor::new(runtime)))
    }
}

impl HostContext for PluginHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    fn executor(&self) -> &dyn BackgroundExecutor {
        self.executor.as_ref()
    }
}

/// Drives one native invocation for one host.
///
/// The worker handle is created on the first init and can never be replaced.
pub struct LifecycleAdapter<H: HostContext> {
    host: H,
    launcher: Arc<dyn Launcher>,
    program_name: String,
    extra_args: Vec<String>,
    worker: OnceCell<WorkerHandle>,
    task: Mutex<Option<Box<dyn ScheduledTask>>>,
}

impl<H: HostContext> LifecycleAdapter<H> {
    /// Adapter launching the artifacts embedded in this binary
    pub fn new(host: H) -> Self {
        Self::with_launcher(host, Arc::new(NativeLauncher::embedded()))
    }

    pub fn with_launcher(host: H, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            host,
            launcher,
            program_name: SYNTHETIC_PROGRAM_NAME.to_string(),
            extra_args: Vec::new(),
            worker: OnceCell::new(),
            task: Mutex::new(None),
        }
    }

    /// Extra arguments appended after `--config <path>`
    #[must_use]
    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The worker, once init has run
    #[must_use]
    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.get()
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.worker
            .get()
            .map_or(WorkerState::NotStarted, WorkerHandle::state)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.host.data_directory().join(CONFIG_FILE_NAME)
    }

    fn ensure_data_directory(&self) -> Result<()> {
        let dir = self.host.data_directory();
        if !dir.exists() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create data directory {}", dir.display())
            })?;
            info!("[{}] Created data directory {}", self.host.name(), dir.display());
        }
        Ok(())
    }
}

impl<H: HostContext> HostPlugin for LifecycleAdapter<H> {
    fn on_init(&self) -> Result<()> {
        if let Some(worker) = self.worker.get() {
            warn!(
                "[{}] Ignoring repeated init, native worker is already {}",
                self.host.name(),
                worker.state()
            );
            return Ok(());
        }

        if let Err(e) = self.ensure_data_directory() {
            error!("[{}] {:#}", self.host.name(), e);
            return Err(e);
        }

        let args = InvocationArgs::with_program_name(&self.program_name, self.config_path())
            .extra(self.extra_args.iter().cloned());
        let worker = WorkerHandle::new(args, Arc::clone(&self.launcher));
        if self.worker.set(worker.clone()).is_err() {
            warn!("[{}] Concurrent init lost the race, ignoring", self.host.name());
            return Ok(());
        }

        if let Err(state) = worker.mark_scheduled() {
            warn!("[{}] Native worker already {}", self.host.name(), state);
            return Ok(());
        }

        let job_worker = worker.clone();
        match self.host.executor().submit(Box::new(move || job_worker.run())) {
            Ok(task) => {
                *self.task.lock().unwrap_or_else(PoisonError::into_inner) = task;
                info!(
                    "[{}] Native component scheduled with config {}",
                    self.host.name(),
                    worker.args().config_path()
                );
                Ok(())
            }
            Err(e) => {
                worker.stop();
                error!("[{}] Failed to schedule native component: {:#}", self.host.name(), e);
                Err(e)
            }
        }
    }

    fn on_shutdown(&self) {
        if let Some(worker) = self.worker.get() {
            match worker.stop() {
                StopOutcome::NativeStillRunning => warn!(
                    "[{}] Native component is still running and cannot be interrupted; it stops only when it exits on its own",
                    self.host.name()
                ),
                StopOutcome::Cancelled => {
                    info!("[{}] Native component cancelled before start", self.host.name());
                }
                StopOutcome::AlreadyStopped => {
                    info!("[{}] Native component already stopped", self.host.name());
                }
            }
        }

        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel();
        }

        let released = self.launcher.release_artifacts();
        if released > 0 {
            info!("[{}] Removed {} extracted artifact(s)", self.host.name(), released);
        }
    }
}
