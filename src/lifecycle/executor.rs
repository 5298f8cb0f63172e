//! Background execution contexts supplied by a plugin host.
//!
//! The native call blocks for the whole life of the server, so it must never run on
//! a host's event thread. Two host styles are covered: fire-and-forget async runs
//! with no handle back, and a scheduler that hands out a cancellable task.

use anyhow::{Context, Result};
use std::fmt;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

/// Unit of work handed to an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling handle returned by hosts that support cancelling a submitted job
pub trait ScheduledTask: Send + Sync + fmt::Debug {
    /// Cancel the job if it has not started. A job already running is unaffected.
    fn cancel(&self);
}

/// A host-provided place to run blocking work off the host's own threads
pub trait BackgroundExecutor: Send + Sync {
    /// Submit `job`. Hosts without task handles return `Ok(None)`.
    ///
    /// # Errors
    /// Returns an error if the host refuses the job.
    fn submit(&self, job: Job) -> Result<Option<Box<dyn ScheduledTask>>>;
}

/// Runs each job on a dedicated named thread, like a proxy's `runAsync`
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    thread_name: String,
}

impl ThreadExecutor {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("limbo-bridge-native")
    }
}

impl BackgroundExecutor for ThreadExecutor {
    fn submit(&self, job: Job) -> Result<Option<Box<dyn ScheduledTask>>> {
        std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(job)
            .context("Failed to spawn native worker thread")?;
        debug!("Submitted native job to thread {}", self.thread_name);
        Ok(None)
    }
}

/// Runs each job on a tokio runtime's blocking pool and returns an abortable task
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime of the calling context
    ///
    /// # Errors
    /// Returns an error when called outside a tokio runtime.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().context("No tokio runtime available")?;
        Ok(Self::new(handle))
    }
}

#[derive(Debug)]
struct TokioTask(AbortHandle);

impl ScheduledTask for TokioTask {
    fn cancel(&self) {
        // Blocking tasks that already started run to completion regardless
        self.0.abort();
    }
}

impl BackgroundExecutor for TokioExecutor {
    fn submit(&self, job: Job) -> Result<Option<Box<dyn ScheduledTask>>> {
        let task = self.handle.spawn_blocking(job);
        debug!("Submitted native job to tokio blocking pool");
        Ok(Some(Box::new(TokioTask(task.abort_handle()))))
    }
}
