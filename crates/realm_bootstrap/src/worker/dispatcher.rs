//! FIFO task worker.

use super::{Lifecycle, Task, Worker, WorkerState};
use crate::error::WorkerError;
use crossbeam::channel::{self, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

enum Message {
    Run(Task),
    Drain,
}

/// Executes submitted tasks one at a time, in submission order, on its own
/// thread.
pub struct TaskWorker {
    lifecycle: Lifecycle,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl TaskWorker {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            lifecycle: Lifecycle::new(name),
            sender,
            receiver,
        }
    }

    /// Queues `task` for execution on the worker thread.
    ///
    /// The task is dropped and [`WorkerError::NotAccepting`] returned unless
    /// the worker is running.
    pub fn submit<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.lifecycle
            .admit(|| self.sender.send(Message::Run(Box::new(task))))?
            .map_err(|_| WorkerError::NotAccepting(self.lifecycle.name().to_string()))
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Worker for TaskWorker {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn start(&self) -> Result<(), WorkerError> {
        let receiver = self.receiver.clone();
        let name = self.lifecycle.name().to_string();
        self.lifecycle.spawn(move || run_queue(&name, receiver))
    }

    fn request_shutdown(&self) {
        self.lifecycle.drain(|| {
            // The receiver lives as long as `self`, so this cannot fail.
            let _ = self.sender.send(Message::Drain);
        });
    }

    fn join(&self) -> Result<(), WorkerError> {
        self.lifecycle.join()
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

fn run_queue(name: &str, receiver: Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(task) => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(worker = %name, "task panicked");
                }
            }
            Message::Drain => break,
        }
    }
    debug!(worker = %name, "task queue drained");
}

/// Submit-only view of a [`TaskWorker`], handed to components that need to
/// queue work without controlling the worker's lifecycle.
#[derive(Clone)]
pub struct TaskHandle {
    worker: Arc<TaskWorker>,
}

impl TaskHandle {
    pub fn new(worker: Arc<TaskWorker>) -> Self {
        Self { worker }
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn submit<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.worker.submit(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_order_on_worker_thread() {
        let worker = TaskWorker::new("dispatcher");
        worker.start().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            worker
                .submit(move || {
                    let thread_name = thread::current().name().map(str::to_string);
                    seen.lock().push((i, thread_name));
                })
                .unwrap();
        }

        worker.request_shutdown();
        worker.join().unwrap();

        let seen = seen.lock();
        let order: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("dispatcher")));
    }

    #[test]
    fn test_submit_rejected_unless_running() {
        let worker = TaskWorker::new("dispatcher");
        assert!(matches!(
            worker.submit(|| {}),
            Err(WorkerError::NotAccepting(_))
        ));

        worker.start().unwrap();
        worker.request_shutdown();
        assert_eq!(worker.state(), WorkerState::Draining);
        assert!(matches!(
            worker.submit(|| {}),
            Err(WorkerError::NotAccepting(_))
        ));
        worker.join().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_start_twice_fails() {
        let worker = TaskWorker::new("dispatcher");
        worker.start().unwrap();
        assert!(matches!(
            worker.start(),
            Err(WorkerError::AlreadyRunning(_))
        ));
        worker.request_shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_join_requires_shutdown_request() {
        let worker = TaskWorker::new("async-tasks");
        worker.start().unwrap();
        assert!(matches!(worker.join(), Err(WorkerError::NotDraining(_))));
        worker.request_shutdown();
        assert!(worker.join().is_ok());
    }

    #[test]
    fn test_queued_tasks_finish_after_shutdown_request() {
        let worker = TaskWorker::new("dispatcher");
        worker.start().unwrap();

        let done = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let done = done.clone();
            worker
                .submit(move || {
                    thread::sleep(Duration::from_millis(10));
                    *done.lock() += 1;
                })
                .unwrap();
        }

        worker.request_shutdown();
        worker.join().unwrap();
        assert_eq!(*done.lock(), 3);
    }

    #[test]
    fn test_panicking_task_does_not_stop_worker() {
        let worker = TaskWorker::new("dispatcher");
        worker.start().unwrap();

        let ran = Arc::new(Mutex::new(false));
        worker.submit(|| panic!("boom")).unwrap();
        let flag = ran.clone();
        worker.submit(move || *flag.lock() = true).unwrap();

        worker.request_shutdown();
        worker.join().unwrap();
        assert!(*ran.lock());
    }
}
