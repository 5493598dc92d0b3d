//! Ordered ownership of the process workers.

use super::{Worker, WorkerState};
use crate::error::WorkerError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Names of joined workers, appended as each join completes.
pub type JoinJournal = Arc<Mutex<Vec<String>>>;

/// Owns the process workers. Workers start in registration order and are
/// shut down and joined in the declared join order.
#[derive(Default)]
pub struct Supervisor {
    workers: Vec<Arc<dyn Worker>>,
    join_order: Vec<usize>,
    joined: JoinJournal,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a worker. Until [`set_join_order`](Self::set_join_order) is
    /// called, workers are joined in registration order.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.join_order.push(self.workers.len());
        self.workers.push(worker);
    }

    /// Declares the order in which workers are shut down and joined.
    ///
    /// Every registered worker must appear exactly once.
    pub fn set_join_order(&mut self, names: &[&str]) -> Result<(), WorkerError> {
        let mut order = Vec::with_capacity(names.len());
        for name in names {
            let index = self
                .workers
                .iter()
                .position(|worker| worker.name() == *name)
                .ok_or_else(|| WorkerError::Unknown(name.to_string()))?;
            if !order.contains(&index) {
                order.push(index);
            }
        }

        if let Some(missing) = (0..self.workers.len()).find(|index| !order.contains(index)) {
            return Err(WorkerError::Unknown(format!(
                "{} (missing from join order)",
                self.workers[missing].name()
            )));
        }

        self.join_order = order;
        Ok(())
    }

    pub fn workers(&self) -> &[Arc<dyn Worker>] {
        &self.workers
    }

    /// Shared record of completed joins; stays readable after the supervisor
    /// is gone.
    pub fn join_journal(&self) -> JoinJournal {
        self.joined.clone()
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|worker| worker.name()).collect()
    }

    pub fn join_order(&self) -> Vec<&str> {
        self.join_order
            .iter()
            .map(|&index| self.workers[index].name())
            .collect()
    }

    /// Starts every worker in registration order.
    ///
    /// If one fails to start, the ones already running are asked to shut down
    /// and the error is returned.
    pub fn start_all(&self) -> Result<(), WorkerError> {
        for (index, worker) in self.workers.iter().enumerate() {
            if let Err(e) = worker.start() {
                for started in &self.workers[..index] {
                    started.request_shutdown();
                }
                return Err(e);
            }
        }
        info!("Started {} worker(s): {:?}", self.workers.len(), self.worker_names());
        Ok(())
    }

    /// Asks every worker to drain, in join order, without waiting.
    pub fn request_shutdown_all(&self) {
        for worker in self.ordered() {
            worker.request_shutdown();
        }
    }

    /// Shuts down and joins each worker in join order.
    ///
    /// Each worker is fully joined before the next one is asked to drain, so a
    /// worker that feeds another one has stopped before its target does.
    /// Returns the names in the order they were joined.
    pub fn shutdown(&self) -> Result<Vec<String>, WorkerError> {
        let mut joined = Vec::with_capacity(self.workers.len());
        for worker in self.ordered() {
            worker.request_shutdown();
            if worker.state() == WorkerState::Running {
                warn!(worker = %worker.name(), "worker ignored shutdown request");
            }
            worker.join()?;
            self.joined.lock().push(worker.name().to_string());
            joined.push(worker.name().to_string());
        }
        info!("Joined worker(s): {:?}", joined);
        Ok(joined)
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<dyn Worker>> {
        self.join_order.iter().map(move |&index| &self.workers[index])
    }
}
