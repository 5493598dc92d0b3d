//! Bootstrap coordination on the main thread.
//!
//! ```text
//! Idle -> WorkersStarting -> PipelineRunning -> Decided -> Serving -----> Terminated
//!                                                      \-> ShuttingDown -/
//! ```
//!
//! The coordinator starts the workers, hands the initialization pipeline to
//! the dispatcher and blocks on the startup handshake. The handshake carries
//! the server context back, so the service manager is only inspected after
//! every registration the pipeline made. A fatal pipeline error is returned
//! as-is for the caller to escalate; the workers are left running because the
//! process is about to terminate.

use crate::context::{GameState, ServerContext, WorkerHandles};
use crate::error::BootstrapError;
use crate::handshake::handshake;
use crate::pipeline::{InitializationPipeline, PipelineReport, Readiness};
use crate::worker::{
    JoinJournal, Scheduler, SchedulerHandle, Supervisor, TaskHandle, TaskWorker, Worker,
    WorkerState,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DISPATCHER: &str = "dispatcher";
pub const SCHEDULER: &str = "scheduler";
pub const ASYNC_TASKS: &str = "async-tasks";

/// Scheduler first, since it feeds the other two; the dispatcher last, since
/// everything else may still post work to it.
const JOIN_ORDER: [&str; 3] = [SCHEDULER, ASYNC_TASKS, DISPATCHER];

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    WorkersStarting,
    PipelineRunning,
    Decided,
    Serving,
    ShuttingDown,
    Terminated,
}

/// Read-only view of a coordinator that stays valid after
/// [`BootstrapCoordinator::run`] has consumed it.
#[derive(Clone)]
pub struct CoordinatorMonitor {
    phases: Arc<Mutex<Vec<Phase>>>,
    workers: Vec<Arc<dyn Worker>>,
    joined: JoinJournal,
}

impl CoordinatorMonitor {
    pub fn phase(&self) -> Phase {
        current(&self.phases)
    }

    /// Every phase entered so far, starting with [`Phase::Idle`].
    pub fn history(&self) -> Vec<Phase> {
        self.phases.lock().clone()
    }

    /// `(name, state)` of every worker, in registration order.
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .map(|worker| (worker.name().to_string(), worker.state()))
            .collect()
    }

    /// Workers joined so far, in the order their joins completed.
    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().clone()
    }
}

/// Drives process startup and shutdown.
pub struct BootstrapCoordinator {
    dispatcher: Arc<TaskWorker>,
    supervisor: Supervisor,
    handles: WorkerHandles,
    phases: Arc<Mutex<Vec<Phase>>>,
}

impl Default for BootstrapCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapCoordinator {
    /// Creates the dispatcher, scheduler and async-task workers, all stopped.
    pub fn new() -> Self {
        let dispatcher = Arc::new(TaskWorker::new(DISPATCHER));
        let dispatch_handle = TaskHandle::new(dispatcher.clone());
        let scheduler = Arc::new(Scheduler::new(SCHEDULER, dispatch_handle.clone()));
        let async_tasks = Arc::new(TaskWorker::new(ASYNC_TASKS));

        let mut supervisor = Supervisor::new();
        supervisor.register(dispatcher.clone());
        supervisor.register(scheduler.clone());
        supervisor.register(async_tasks.clone());
        supervisor
            .set_join_order(&JOIN_ORDER)
            .expect("Join order should only name the workers registered above");

        Self {
            dispatcher,
            supervisor,
            handles: WorkerHandles {
                dispatcher: dispatch_handle,
                scheduler: SchedulerHandle::new(scheduler),
                async_tasks: TaskHandle::new(async_tasks),
            },
            phases: Arc::new(Mutex::new(vec![Phase::Idle])),
        }
    }

    /// Submit-only handles for building the [`ServerContext`].
    pub fn handles(&self) -> WorkerHandles {
        self.handles.clone()
    }

    pub fn phase(&self) -> Phase {
        current(&self.phases)
    }

    pub fn monitor(&self) -> CoordinatorMonitor {
        CoordinatorMonitor {
            phases: self.phases.clone(),
            workers: self.supervisor.workers().to_vec(),
            joined: self.supervisor.join_journal(),
        }
    }

    fn transition(&self, next: Phase) {
        let mut phases = self.phases.lock();
        debug!("bootstrap phase {:?} -> {:?}", phases.last(), next);
        phases.push(next);
    }

    /// Brings the server up, serves until `shutdown` resolves, and tears the
    /// workers down.
    ///
    /// Returns `Ok(())` after a normal shutdown. Any error means the process
    /// should exit with a failure status; [`BootstrapError::is_fatal`] tells
    /// whether it needs the fatal escalation path.
    pub fn run<S>(
        self,
        pipeline: InitializationPipeline,
        context: ServerContext,
        shutdown: S,
    ) -> Result<(), BootstrapError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        self.transition(Phase::WorkersStarting);
        self.supervisor.start_all()?;

        self.transition(Phase::PipelineRunning);
        let (notifier, waiter) = handshake::<Readiness>();
        self.dispatcher
            .submit(move || pipeline.run(context, notifier))?;

        let ready = waiter.wait()??;
        self.transition(Phase::Decided);
        log_report(&ready.report);

        let ServerContext {
            services, world, ..
        } = ready.context;

        if services.is_running() {
            self.transition(Phase::Serving);
            info!("{} server online!", world.name());
            let served = services.run(shutdown);

            world.set_game_state(GameState::Shutdown);
            self.supervisor.shutdown()?;
            self.transition(Phase::Terminated);
            served.map_err(BootstrapError::Serve)
        } else {
            self.transition(Phase::ShuttingDown);
            error!("No services running. The server is NOT online!");
            self.supervisor.shutdown()?;
            self.transition(Phase::Terminated);
            Err(BootstrapError::NoServiceRunning)
        }
    }
}

fn current(phases: &Mutex<Vec<Phase>>) -> Phase {
    phases.lock().last().copied().unwrap_or(Phase::Idle)
}

fn log_report(report: &PipelineReport) {
    info!(
        "Startup finished: {} stage(s) loaded, {} failure(s) absorbed",
        report.completed.len(),
        report.absorbed.len()
    );
    for (stage, reason) in &report.absorbed {
        warn!(stage = %stage, "{} did not load: {}", stage, reason);
    }
}
