//! Background workers.
//!
//! Every worker runs on its own named OS thread and follows one lifecycle:
//!
//! ```text
//! Stopped --start()--> Running --request_shutdown()--> Draining --join()--> Stopped
//! ```
//!
//! * [`TaskWorker`] executes submitted closures in FIFO order. The server uses
//!   one as the dispatcher and one as the async I/O task queue.
//! * [`Scheduler`] holds timed events and forwards them to a [`TaskHandle`]
//!   when they come due.
//! * [`Supervisor`] owns the set of workers and declares start and join order.

mod dispatcher;
mod scheduler;
mod supervisor;

pub use dispatcher::{TaskHandle, TaskWorker};
pub use scheduler::{EventId, Scheduler, SchedulerHandle};
pub use supervisor::{JoinJournal, Supervisor};

use crate::error::WorkerError;
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// A unit of work executed on a worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Draining,
}

/// Uniform lifecycle contract the [`Supervisor`] drives.
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> WorkerState;

    /// Spawns the worker thread. Fails if the worker is not stopped.
    fn start(&self) -> Result<(), WorkerError>;

    /// Stops accepting new work; already queued work still runs.
    fn request_shutdown(&self);

    /// Blocks until the worker thread exits. Only valid once draining.
    fn join(&self) -> Result<(), WorkerError>;
}

/// Thread and state bookkeeping shared by the worker implementations.
pub(crate) struct Lifecycle {
    name: String,
    state: Mutex<WorkerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Lifecycle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(WorkerState::Stopped),
            thread: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub(crate) fn spawn<F>(&self, body: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if *state != WorkerState::Stopped {
            return Err(WorkerError::AlreadyRunning(self.name.clone()));
        }

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(body)
            .map_err(|source| WorkerError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        *self.thread.lock() = Some(handle);
        *state = WorkerState::Running;
        debug!(worker = %self.name, "worker started");
        Ok(())
    }

    /// Runs `admit` under the state lock if the worker is running.
    ///
    /// Holding the lock while enqueueing guarantees nothing lands in a queue
    /// after the drain marker.
    pub(crate) fn admit<R>(&self, admit: impl FnOnce() -> R) -> Result<R, WorkerError> {
        let state = self.state.lock();
        if *state != WorkerState::Running {
            return Err(WorkerError::NotAccepting(self.name.clone()));
        }
        Ok(admit())
    }

    /// Moves Running to Draining and runs `on_drain` under the state lock.
    /// Returns `false` if the worker was not running.
    pub(crate) fn drain(&self, on_drain: impl FnOnce()) -> bool {
        let mut state = self.state.lock();
        if *state != WorkerState::Running {
            return false;
        }
        *state = WorkerState::Draining;
        on_drain();
        debug!(worker = %self.name, "worker draining");
        true
    }

    pub(crate) fn join(&self) -> Result<(), WorkerError> {
        if self.state() == WorkerState::Running {
            return Err(WorkerError::NotDraining(self.name.clone()));
        }

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| WorkerError::Panicked(self.name.clone()))?;
            debug!(worker = %self.name, "worker joined");
        }

        *self.state.lock() = WorkerState::Stopped;
        Ok(())
    }
}
