use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engines::{DynEngine, EngineContext};
use crate::error::{EchoError, Result};
use crate::events::{EngineEvent, EventSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Starting,
    Running,
    Stopping,
    /// Absorbing: a new task is required to run again.
    Terminated,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Terminated)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Idle => "idle",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Stopping => "stopping",
            TaskState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// One run of an echo engine, from start request to termination.
///
/// Decouples the blocking work from where its side effects are observed:
/// `start()` signals the launch into the event stream before the worker
/// spawns, and the worker signals completion exactly once, on every exit
/// path, for the consumer to observe on its own context. The owned socket
/// is released inside the engine before either terminal signal fires.
pub struct EchoTask {
    engine: DynEngine,
    port: u16,
    sink: EventSink,
    shutdown: CancellationToken,
    state: Arc<watch::Sender<TaskState>>,
    bound: Arc<watch::Sender<Option<SocketAddr>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EchoTask {
    pub fn new(engine: DynEngine, port: u16, sink: EventSink) -> Self {
        Self {
            engine,
            port,
            sink,
            shutdown: CancellationToken::new(),
            state: Arc::new(watch::channel(TaskState::Idle).0),
            bound: Arc::new(watch::channel(None).0),
            worker: Mutex::new(None),
        }
    }

    /// Launches the worker. Must be called from within a tokio runtime.
    ///
    /// Signals `TaskStarted` into the event stream before the worker can
    /// emit anything, so the launch signal is ordered ahead of every engine
    /// event. Not re-entrant: any state but `Idle` is rejected.
    pub fn start(&self) -> Result<()> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state == TaskState::Idle {
                *state = TaskState::Starting;
                claimed = true;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(EchoError::AlreadyStarted(*self.state.borrow()));
        }

        self.sink.send(EngineEvent::TaskStarted);
        self.sink.log("Starting server.");

        let engine = self.engine.clone();
        let sink = self.sink.clone();
        let state = self.state.clone();
        let ctx = EngineContext::new(
            self.port,
            self.sink.clone(),
            self.shutdown.clone(),
            self.bound.clone(),
        );

        let handle = tokio::spawn(async move {
            state.send_replace(TaskState::Running);
            debug!(engine = engine.name(), "worker launched");

            let outcome = match AssertUnwindSafe(engine.run(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(EchoError::Other(anyhow::anyhow!(
                    "worker panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            state.send_if_modified(|s| {
                if *s != TaskState::Stopping {
                    *s = TaskState::Stopping;
                    true
                } else {
                    false
                }
            });

            let failure = match outcome {
                Ok(()) => None,
                Err(err) => {
                    error!(engine = engine.name(), "worker failed: {err}");
                    sink.log(err.to_string());
                    Some(err.to_string())
                }
            };

            sink.log("Server terminated.");
            state.send_replace(TaskState::Terminated);
            sink.send(EngineEvent::TaskEnded { error: failure });
        });
        *self.worker.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Requests cooperative termination. Idempotent; a no-op once the task
    /// is `Terminated`. Unblocks the engine's accept/receive promptly via
    /// the cancellation token rather than a polling timeout.
    pub fn stop(&self) {
        if self.state().is_terminal() {
            return;
        }
        debug!("stop requested");
        self.state.send_if_modified(|state| match *state {
            TaskState::Starting | TaskState::Running => {
                *state = TaskState::Stopping;
                true
            }
            _ => false,
        });
        self.shutdown.cancel();
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// The address the engine actually bound, once it has.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Waits for the engine to report its bound address. Returns `None`
    /// when the task terminates without ever binding (e.g. bind failure).
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut bound = self.bound.subscribe();
        let mut state = self.state.subscribe();
        loop {
            if let Some(addr) = *bound.borrow() {
                return Some(addr);
            }
            if self.state().is_terminal() {
                return *bound.borrow();
            }
            tokio::select! {
                changed = bound.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = state.wait_for(|s| s.is_terminal()) => {
                    return *bound.borrow();
                }
            }
        }
    }

    /// Waits for the worker to exit. Returns immediately for a task that
    /// was never started.
    pub async fn join(&self) {
        if self.state() == TaskState::Idle {
            return;
        }
        let handle = self.worker.lock().unwrap().take();
        match handle {
            Some(handle) => {
                if let Err(err) = handle.await {
                    // catch_unwind leaves only cancellation to surface here
                    debug!("worker join error: {err}");
                }
            }
            None => {
                let mut state = self.state.subscribe();
                let _ = state.wait_for(|s| s.is_terminal()).await;
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
