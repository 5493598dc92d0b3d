//! Sequential initialization pipeline.
//!
//! A pipeline is an ordered list of named [`Stage`]s followed by ready hooks.
//! It runs once, on whichever worker thread executes it:
//!
//! * a failing mandatory stage stops the pipeline with a [`FatalError`];
//!   no later stage runs
//! * a failing best-effort stage is logged and the next stage runs
//! * after the last stage the ready hooks run, then the startup handshake is
//!   signaled with the context
//!
//! There is no per-stage timeout. A stage that never returns keeps the
//! process in startup.

use crate::context::ServerContext;
use crate::error::{FatalError, StageError};
use crate::handshake::Notifier;
use std::time::Instant;
use tracing::{error, info, warn};

type StageAction = Box<dyn FnOnce(&mut ServerContext) -> Result<(), StageError> + Send>;
type ReadyHook = Box<dyn FnOnce(&mut ServerContext) + Send>;

/// One named step of the startup sequence.
pub struct Stage {
    name: String,
    mandatory: bool,
    action: StageAction,
}

impl Stage {
    /// A stage whose failure aborts startup.
    pub fn mandatory<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&mut ServerContext) -> Result<(), StageError> + Send + 'static,
    {
        Self {
            name: name.into(),
            mandatory: true,
            action: Box::new(action),
        }
    }

    /// A stage whose failure is logged and otherwise ignored.
    pub fn best_effort<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&mut ServerContext) -> Result<(), StageError> + Send + 'static,
    {
        Self {
            name: name.into(),
            mandatory: false,
            action: Box::new(action),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

/// What a completed pipeline did.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Stages that succeeded, in execution order
    pub completed: Vec<String>,
    /// Best-effort stages that failed, with the reason
    pub absorbed: Vec<(String, String)>,
}

impl PipelineReport {
    /// Every stage that ran, in execution order.
    pub fn executed(&self) -> Vec<&str> {
        self.completed
            .iter()
            .map(String::as_str)
            .chain(self.absorbed.iter().map(|(name, _)| name.as_str()))
            .collect()
    }
}

/// Successful startup: the context handed back to the main thread.
pub struct Ready {
    pub context: ServerContext,
    pub report: PipelineReport,
}

/// Value carried by the startup handshake.
pub type Readiness = Result<Ready, FatalError>;

/// Ordered, immutable list of startup stages.
#[derive(Default)]
pub struct InitializationPipeline {
    stages: Vec<Stage>,
    ready_hooks: Vec<ReadyHook>,
}

impl InitializationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn mandatory<F>(self, name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&mut ServerContext) -> Result<(), StageError> + Send + 'static,
    {
        self.stage(Stage::mandatory(name, action))
    }

    pub fn best_effort<F>(self, name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&mut ServerContext) -> Result<(), StageError> + Send + 'static,
    {
        self.stage(Stage::best_effort(name, action))
    }

    /// Adds a side effect that runs once every stage has finished, before the
    /// handshake is signaled.
    pub fn on_ready<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut ServerContext) + Send + 'static,
    {
        self.ready_hooks.push(Box::new(hook));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Runs every stage in order against `context`.
    pub fn execute(self, context: &mut ServerContext) -> Result<PipelineReport, FatalError> {
        let mut report = PipelineReport::default();
        let started = Instant::now();

        for stage in self.stages {
            let Stage {
                name,
                mandatory,
                action,
            } = stage;

            info!(stage = %name, "Loading {}", name);
            match action(context) {
                Ok(()) => report.completed.push(name),
                Err(source) if mandatory => {
                    error!(stage = %name, "Cannot load: {}: {}", name, source);
                    return Err(FatalError {
                        stage: name,
                        source,
                    });
                }
                Err(source) => {
                    warn!(stage = %name, "{} failed, continuing: {}", name, source);
                    report.absorbed.push((name, source.to_string()));
                }
            }
        }

        for hook in self.ready_hooks {
            hook(context);
        }

        info!(
            "Initialization finished in {:.2?} ({} stage(s), {} absorbed failure(s))",
            started.elapsed(),
            report.completed.len() + report.absorbed.len(),
            report.absorbed.len()
        );
        Ok(report)
    }

    /// Executes the pipeline and signals `handshake` with the outcome.
    ///
    /// This is the body of the task submitted to the dispatcher. The handshake
    /// fires exactly once, with the context on success or the fatal error on
    /// failure.
    pub fn run(self, mut context: ServerContext, handshake: Notifier<Readiness>) {
        let readiness = self
            .execute(&mut context)
            .map(|report| Ready { context, report });
        handshake.signal(readiness);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ConfigSource, WorkerHandles};
    use crate::handshake::handshake;
    use crate::worker::{Scheduler, SchedulerHandle, TaskHandle, TaskWorker};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn context() -> ServerContext {
        let dispatcher = TaskHandle::new(Arc::new(TaskWorker::new("dispatcher")));
        let scheduler = SchedulerHandle::new(Arc::new(Scheduler::new("scheduler", dispatcher.clone())));
        let async_tasks = TaskHandle::new(Arc::new(TaskWorker::new("async-tasks")));
        ServerContext::new(
            ConfigSource::default(),
            WorkerHandles {
                dispatcher,
                scheduler,
                async_tasks,
            },
        )
    }

    fn recording(journal: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, fail: bool) -> Stage {
        let journal = journal.clone();
        let action = move |_: &mut ServerContext| {
            journal.lock().push(name);
            if fail {
                Err(StageError::Configuration(format!("{} failed", name)))
            } else {
                Ok(())
            }
        };
        Stage::mandatory(name, action)
    }

    fn best_effort(journal: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, fail: bool) -> Stage {
        let Stage { name, action, .. } = recording(journal, name, fail);
        Stage {
            name,
            mandatory: false,
            action,
        }
    }

    #[test]
    fn test_stages_run_in_declaration_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = InitializationPipeline::new()
            .stage(recording(&journal, "config", false))
            .stage(recording(&journal, "database", false))
            .stage(recording(&journal, "map", false));

        let report = pipeline.execute(&mut context()).unwrap();
        assert_eq!(*journal.lock(), vec!["config", "database", "map"]);
        assert_eq!(report.completed, vec!["config", "database", "map"]);
        assert!(report.absorbed.is_empty());
    }

    #[test]
    fn test_mandatory_failure_stops_pipeline() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let ready = Arc::new(Mutex::new(false));
        let flag = ready.clone();

        let pipeline = InitializationPipeline::new()
            .stage(recording(&journal, "config", false))
            .stage(recording(&journal, "world type", true))
            .stage(recording(&journal, "map", false))
            .on_ready(move |_| *flag.lock() = true);

        let err = pipeline.execute(&mut context()).unwrap_err();
        assert_eq!(err.stage, "world type");
        assert_eq!(*journal.lock(), vec!["config", "world type"]);
        assert!(!*ready.lock());
    }

    #[test]
    fn test_best_effort_failure_continues() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = InitializationPipeline::new()
            .stage(recording(&journal, "config", false))
            .stage(best_effort(&journal, "optimize tables", true))
            .stage(recording(&journal, "map", false))
            .stage(best_effort(&journal, "login protocol", false));

        let report = pipeline.execute(&mut context()).unwrap();
        assert_eq!(
            *journal.lock(),
            vec!["config", "optimize tables", "map", "login protocol"]
        );
        assert_eq!(report.completed, vec!["config", "map", "login protocol"]);
        assert_eq!(report.absorbed.len(), 1);
        assert_eq!(report.absorbed[0].0, "optimize tables");
    }

    #[test]
    fn test_ready_hooks_run_after_stages() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let hook_journal = journal.clone();

        let pipeline = InitializationPipeline::new()
            .stage(recording(&journal, "config", false))
            .on_ready(move |_| hook_journal.lock().push("ready"));

        pipeline.execute(&mut context()).unwrap();
        assert_eq!(*journal.lock(), vec!["config", "ready"]);
    }

    #[test]
    fn test_run_signals_handshake_once_with_outcome() {
        let (notifier, waiter) = handshake();
        let pipeline = InitializationPipeline::new().mandatory("config", |_| Ok(()));
        pipeline.run(context(), notifier);

        let ready = waiter.wait().unwrap().unwrap();
        assert_eq!(ready.report.completed, vec!["config"]);
    }

    #[test]
    fn test_run_signals_fatal_error() {
        let (notifier, waiter) = handshake();
        let pipeline = InitializationPipeline::new().mandatory("database", |_| {
            Err(StageError::Database("connection refused".to_string()))
        });
        pipeline.run(context(), notifier);

        let fatal = waiter.wait().unwrap().err().unwrap();
        assert_eq!(fatal.stage, "database");
    }
}
