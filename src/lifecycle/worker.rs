use crate::bridge::{ExitStatus, InvocationArgs, Launcher};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle of the single native invocation owned by a [`WorkerHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    NotStarted,
    Scheduled,
    Running,
    Stopped,
}

impl WorkerState {
    /// Allowed edges. There is no way back to `Scheduled` once running.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use WorkerState::{NotStarted, Running, Scheduled, Stopped};
        matches!(
            (self, next),
            (NotStarted, Scheduled)
                | (NotStarted, Stopped)
                | (Scheduled, Running)
                | (Scheduled, Stopped)
                | (Running, Stopped)
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// What a call to [`WorkerHandle::stop`] actually achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The native call had not started and now never will
    Cancelled,
    /// The handle is stopped but the native call is still blocked in its run loop.
    /// Nothing on this side can interrupt it.
    NativeStillRunning,
    /// Already stopped, and the native call (if any) has returned
    AlreadyStopped,
}

/// How the native invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Exited(ExitStatus),
    BridgeFailed(String),
    /// Stopped before the executor dispatched the job
    Skipped,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<WorkerState>,
    changed: Condvar,
    native_active: AtomicBool,
    stop_requests: AtomicUsize,
    launches: AtomicUsize,
    outcome: Mutex<Option<WorkerOutcome>>,
}

/// Owns exactly one native invocation. Clones share state, so the executor job
/// and the adapter see the same handle.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
    args: InvocationArgs,
    launcher: Arc<dyn Launcher>,
}

impl WorkerHandle {
    pub fn new(args: InvocationArgs, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(WorkerState::NotStarted),
                changed: Condvar::new(),
                native_active: AtomicBool::new(false),
                stop_requests: AtomicUsize::new(0),
                launches: AtomicUsize::new(0),
                outcome: Mutex::new(None),
            }),
            args,
            launcher,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: WorkerState) -> Result<WorkerState, WorkerState> {
        let mut state = self.lock_state();
        let previous = *state;
        if !previous.can_transition_to(next) {
            return Err(previous);
        }
        *state = next;
        drop(state);
        self.shared.changed.notify_all();
        debug!("Worker {} -> {}", previous, next);
        Ok(previous)
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    #[must_use]
    pub fn args(&self) -> &InvocationArgs {
        &self.args
    }

    /// Record that the job was handed to an executor.
    ///
    /// # Errors
    /// Returns the current state if the handle is not `NotStarted`.
    pub fn mark_scheduled(&self) -> Result<(), WorkerState> {
        self.transition(WorkerState::Scheduled).map(|_| ())
    }

    /// Executor entry point: run the native component to completion.
    ///
    /// Does nothing if `stop` won the race and the handle is already stopped.
    pub fn run(&self) {
        // Flag first so a concurrent stop never sees Running without an active call
        self.shared.native_active.store(true, Ordering::SeqCst);
        if let Err(state) = self.transition(WorkerState::Running) {
            self.shared.native_active.store(false, Ordering::SeqCst);
            info!("Native launch skipped, worker is {}", state);
            self.record_outcome(WorkerOutcome::Skipped, false);
            return;
        }

        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        let result = self.launcher.launch(&self.args);
        self.shared.native_active.store(false, Ordering::SeqCst);

        let outcome = match result {
            Ok(status) if status.success() => {
                info!("Native component finished");
                WorkerOutcome::Exited(status)
            }
            Ok(status) => {
                warn!("Native component reported failure status {}", status);
                WorkerOutcome::Exited(status)
            }
            Err(e) => {
                error!("Native component could not be started: {}", e);
                WorkerOutcome::BridgeFailed(e.to_string())
            }
        };
        // Already stopped if the host shut down while we were blocked
        let _ = self.transition(WorkerState::Stopped);
        self.record_outcome(outcome, true);
    }

    /// Store the outcome under the state lock so `wait_for_exit` cannot miss it
    fn record_outcome(&self, outcome: WorkerOutcome, overwrite: bool) {
        let state = self.lock_state();
        let mut slot = self
            .shared
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if overwrite || slot.is_none() {
            *slot = Some(outcome);
        }
        drop(slot);
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Request a stop. Best-effort: a native call already in its run loop keeps
    /// running until it returns by itself.
    pub fn stop(&self) -> StopOutcome {
        self.shared.stop_requests.fetch_add(1, Ordering::SeqCst);

        match self.transition(WorkerState::Stopped) {
            Ok(WorkerState::Running) if self.is_native_active() => {
                warn!("Stop requested while the native component is running; it cannot be interrupted");
                StopOutcome::NativeStillRunning
            }
            Ok(WorkerState::Running) => StopOutcome::AlreadyStopped,
            Ok(_) => {
                // The job may never be dispatched, so the outcome cannot wait for it
                self.record_outcome(WorkerOutcome::Skipped, false);
                info!("Native launch cancelled before it started");
                StopOutcome::Cancelled
            }
            Err(_) if self.is_native_active() => StopOutcome::NativeStillRunning,
            Err(_) => StopOutcome::AlreadyStopped,
        }
    }

    /// Whether the native entry point is currently blocked in its call
    #[must_use]
    pub fn is_native_active(&self) -> bool {
        self.shared.native_active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stop_requests(&self) -> usize {
        self.shared.stop_requests.load(Ordering::SeqCst)
    }

    /// Number of times the launcher was entered (0 or 1)
    #[must_use]
    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn outcome(&self) -> Option<WorkerOutcome> {
        self.shared
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until the state satisfies `pred` or `timeout` elapses. Returns the last state seen.
    pub fn wait_until<F>(&self, timeout: Duration, pred: F) -> WorkerState
    where
        F: Fn(WorkerState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        while !pred(*state) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *state
    }

    /// Block until the native call has returned or `timeout` elapses
    pub fn wait_for_exit(&self, timeout: Duration) -> Option<WorkerOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        while self.outcome().is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(state);
        self.outcome()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("state", &self.state())
            .field("native_active", &self.is_native_active())
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, BridgeResult};
    use std::sync::mpsc;

    /// Returns the code, or a missing-artifact error for `None`
    struct FixedLauncher(Option<u8>);

    impl Launcher for FixedLauncher {
        fn launch(&self, _args: &InvocationArgs) -> BridgeResult<ExitStatus> {
            self.0
                .map(ExitStatus::from_code)
                .ok_or_else(|| BridgeError::ArtifactNotFound {
                    resource_path: "/linux/x86_64/libpico_limbo.so".to_string(),
                })
        }
    }

    fn handle(result: Option<u8>) -> WorkerHandle {
        WorkerHandle::new(
            InvocationArgs::for_config("/data/server.toml"),
            Arc::new(FixedLauncher(result)),
        )
    }

    #[test]
    fn test_transition_table() {
        use WorkerState::*;
        assert!(NotStarted.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Scheduled));
        assert!(!Scheduled.can_transition_to(Scheduled));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!NotStarted.can_transition_to(Running));
    }

    #[test]
    fn test_run_to_completion() {
        let worker = handle(Some(0));
        worker.mark_scheduled().unwrap();
        assert_eq!(worker.mark_scheduled(), Err(WorkerState::Scheduled));

        worker.run();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.outcome(), Some(WorkerOutcome::Exited(ExitStatus::SUCCESS)));
        assert_eq!(worker.launches(), 1);

        // A second dispatch of the same job never reaches the launcher
        worker.run();
        assert_eq!(worker.launches(), 1);
        assert_eq!(worker.outcome(), Some(WorkerOutcome::Exited(ExitStatus::SUCCESS)));
        assert_eq!(worker.stop(), StopOutcome::AlreadyStopped);
    }

    #[test]
    fn test_native_failure_status_is_kept() {
        let worker = handle(Some(3));
        worker.mark_scheduled().unwrap();
        worker.run();
        assert_eq!(
            worker.outcome(),
            Some(WorkerOutcome::Exited(ExitStatus::from_code(3)))
        );
    }

    #[test]
    fn test_bridge_failure_is_recorded() {
        let worker = handle(None);
        worker.mark_scheduled().unwrap();
        worker.run();
        match worker.outcome() {
            Some(WorkerOutcome::BridgeFailed(msg)) => assert!(msg.contains("not found")),
            other => panic!("expected BridgeFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_before_dispatch_cancels() {
        let worker = handle(Some(0));
        worker.mark_scheduled().unwrap();
        assert_eq!(worker.stop(), StopOutcome::Cancelled);
        // Known before the executor ever runs the job
        assert_eq!(
            worker.wait_for_exit(Duration::from_millis(10)),
            Some(WorkerOutcome::Skipped)
        );

        worker.run();
        assert_eq!(worker.launches(), 0);
        assert_eq!(worker.outcome(), Some(WorkerOutcome::Skipped));
    }

    struct BlockingLauncher {
        release: Mutex<mpsc::Receiver<u8>>,
    }

    impl Launcher for BlockingLauncher {
        fn launch(&self, _args: &InvocationArgs) -> BridgeResult<ExitStatus> {
            let code = self
                .release
                .lock()
                .unwrap()
                .recv()
                .unwrap_or(0);
            Ok(ExitStatus::from_code(code))
        }
    }

    #[test]
    fn test_stop_cannot_interrupt_running_native_call() {
        let (tx, rx) = mpsc::channel();
        let worker = WorkerHandle::new(
            InvocationArgs::for_config("/data/server.toml"),
            Arc::new(BlockingLauncher {
                release: Mutex::new(rx),
            }),
        );
        worker.mark_scheduled().unwrap();

        let job = worker.clone();
        let thread = std::thread::spawn(move || job.run());

        let state = worker.wait_until(Duration::from_secs(5), |s| s == WorkerState::Running);
        assert_eq!(state, WorkerState::Running);

        assert_eq!(worker.stop(), StopOutcome::NativeStillRunning);
        assert_eq!(worker.state(), WorkerState::Stopped);
        // Still blocked: stop is only a request
        assert!(worker.is_native_active());
        assert!(worker.outcome().is_none());

        tx.send(7).unwrap();
        thread.join().unwrap();
        assert!(!worker.is_native_active());
        assert_eq!(
            worker.wait_for_exit(Duration::from_secs(5)),
            Some(WorkerOutcome::Exited(ExitStatus::from_code(7)))
        );
        assert_eq!(worker.state(), WorkerState::Stopped);
    }
}
