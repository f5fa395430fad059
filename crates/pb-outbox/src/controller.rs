//! Dispatch Controller
//!
//! Owns the Idle/Running state and the lifecycle of the background loop.
//! `start` from Idle spawns a new loop; `start` while Running is a no-op.
//! `stop` flips the state to Idle and signals the active loop, which exits
//! at its next check (after the in-flight message, or immediately when
//! sleeping).
//!
//! A new loop awaits the previous loop's task before its first fetch, so at
//! most one loop is ever delivering, even after a quick stop/start.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pb_common::DispatchState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch_loop::{DispatchLoop, LoopExit};
use crate::outbox_metrics;

#[derive(Default)]
struct ControllerState {
    state: DispatchState,
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
    /// Kept until the next `start` awaits it, so a new loop always waits
    /// for the old one to finish.
    handle: Option<JoinHandle<LoopExit>>,
    /// Resolves to the exit of the most recently started loop.
    exit_rx: Option<watch::Receiver<Option<LoopExit>>>,
    last_exit: Option<LoopExit>,
}

#[derive(Default)]
struct Shared {
    inner: Mutex<ControllerState>,
}

impl Shared {
    /// Called by a loop task when it exits. Only the current generation may
    /// move the controller back to Idle.
    fn finish(&self, generation: u64, exit: &LoopExit) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(generation, current = inner.generation, "Superseded loop exited");
            return;
        }

        if inner.state.is_running() {
            inner.state = DispatchState::Idle;
            inner.stop_tx = None;
            outbox_metrics::set_dispatcher_running(false);
            warn!(generation, reason = exit.reason(), "Dispatcher returned to idle");
        }
        inner.last_exit = Some(exit.clone());
    }
}

pub struct DispatchController {
    dispatch_loop: Arc<DispatchLoop>,
    shared: Arc<Shared>,
}

impl DispatchController {
    pub fn new(dispatch_loop: DispatchLoop) -> Self {
        Self {
            dispatch_loop: Arc::new(dispatch_loop),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Start dispatching. Returns `false` if a loop was already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_running() {
            debug!("Dispatcher already running");
            return false;
        }

        inner.generation += 1;
        let generation = inner.generation;
        let (stop_tx, stop_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = watch::channel(None);
        let previous = inner.handle.take();

        let dispatch_loop = Arc::clone(&self.dispatch_loop);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    warn!(error = %e, "Previous dispatch loop task failed");
                }
            }
            let exit = dispatch_loop.run(stop_rx).await;
            shared.finish(generation, &exit);
            let _ = exit_tx.send(Some(exit.clone()));
            exit
        });

        inner.state = DispatchState::Running;
        inner.stop_tx = Some(stop_tx);
        inner.handle = Some(handle);
        inner.exit_rx = Some(exit_rx);
        outbox_metrics::set_dispatcher_running(true);

        info!(generation, "Dispatcher started");
        true
    }

    /// Stop dispatching. Returns `true` if the dispatcher was running.
    pub fn stop(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        let was_running = inner.state.is_running();

        inner.state = DispatchState::Idle;
        if let Some(stop_tx) = inner.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        outbox_metrics::set_dispatcher_running(false);

        if was_running {
            info!(generation = inner.generation, "Dispatcher stopped");
        }
        was_running
    }

    pub fn state(&self) -> DispatchState {
        self.shared.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// How the most recent loop ended, if one has ended.
    pub fn last_exit(&self) -> Option<LoopExit> {
        self.shared.inner.lock().last_exit.clone()
    }

    /// Wait for the most recently started loop to exit.
    ///
    /// Returns `None` when no loop was started or its task failed. Dropping
    /// the returned future leaves the task tracked by the controller.
    pub async fn join(&self) -> Option<LoopExit> {
        let mut exit_rx = self.shared.inner.lock().exit_rx.clone()?;
        let exit = match exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).clone(),
            Err(_) => {
                warn!("Dispatch loop task ended without reporting an exit");
                None
            }
        };
        exit
    }

    /// Stop and wait up to `timeout` for the active loop to finish its
    /// in-flight message.
    pub async fn shutdown(&self, timeout: Duration) -> Option<LoopExit> {
        self.stop();
        match tokio::time::timeout(timeout, self.join()).await {
            Ok(exit) => exit,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Dispatch loop did not stop in time");
                None
            }
        }
    }
}
