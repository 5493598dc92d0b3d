//! Timer-based scheduler.
//!
//! The scheduler thread sleeps until the earliest event is due, then hands the
//! event's task to its target [`TaskHandle`] (normally the dispatcher), so
//! scheduled work still executes on the dispatcher thread. Recurring events
//! are re-armed after each dispatch.
//!
//! On shutdown the scheduler stops accepting events and discards the ones not
//! yet due; anything already handed to the dispatcher still runs there.

use super::{Lifecycle, Task, TaskHandle, Worker, WorkerState};
use crate::error::WorkerError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Identifier returned when an event is scheduled, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

enum Job {
    Once(Task),
    Every(Duration, Arc<dyn Fn() + Send + Sync>),
}

struct Entry {
    deadline: Instant,
    id: EventId,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.id.0.cmp(&other.id.0))
    }
}

#[derive(Default)]
struct Timeline {
    events: BinaryHeap<Reverse<Entry>>,
    cancelled: HashSet<EventId>,
    next_id: u64,
    stopping: bool,
}

struct Shared {
    timeline: Mutex<Timeline>,
    wake: Condvar,
}

/// Worker that fires tasks after a delay, optionally repeating.
pub struct Scheduler {
    lifecycle: Lifecycle,
    shared: Arc<Shared>,
    target: TaskHandle,
}

impl Scheduler {
    /// Creates a scheduler whose due events are submitted to `target`.
    pub fn new(name: impl Into<String>, target: TaskHandle) -> Self {
        Self {
            lifecycle: Lifecycle::new(name),
            shared: Arc::new(Shared {
                timeline: Mutex::new(Timeline::default()),
                wake: Condvar::new(),
            }),
            target,
        }
    }

    /// Runs `task` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<EventId, WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.insert(delay, Job::Once(Box::new(task)))
    }

    /// Runs `task` every `interval`, starting one interval from now.
    ///
    /// A zero interval is rejected.
    pub fn schedule_recurring<F>(&self, interval: Duration, task: F) -> Result<EventId, WorkerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(self.invalid_delay(interval));
        }
        self.insert(interval, Job::Every(interval, Arc::new(task)))
    }

    /// Cancels a pending event. Returns `false` if it was unknown or already
    /// fired.
    pub fn cancel(&self, id: EventId) -> bool {
        let mut timeline = self.shared.timeline.lock();
        let pending = timeline.events.iter().any(|Reverse(entry)| entry.id == id);
        if pending {
            timeline.cancelled.insert(id);
            self.shared.wake.notify_one();
        }
        pending
    }

    /// Number of events waiting to fire.
    pub fn pending(&self) -> usize {
        let timeline = self.shared.timeline.lock();
        timeline.events.len().saturating_sub(timeline.cancelled.len())
    }

    fn invalid_delay(&self, delay: Duration) -> WorkerError {
        WorkerError::InvalidDelay {
            name: self.lifecycle.name().to_string(),
            delay,
        }
    }

    fn insert(&self, delay: Duration, job: Job) -> Result<EventId, WorkerError> {
        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| self.invalid_delay(delay))?;
        self.lifecycle.admit(|| {
            let mut timeline = self.shared.timeline.lock();
            timeline.next_id += 1;
            let id = EventId(timeline.next_id);
            timeline.events.push(Reverse(Entry {
                deadline,
                id,
                job,
            }));
            self.shared.wake.notify_one();
            id
        })
    }
}

impl Worker for Scheduler {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn start(&self) -> Result<(), WorkerError> {
        let shared = self.shared.clone();
        let target = self.target.clone();
        let name = self.lifecycle.name().to_string();
        {
            let mut timeline = shared.timeline.lock();
            timeline.stopping = false;
        }
        self.lifecycle.spawn(move || run_timeline(&name, &shared, &target))
    }

    fn request_shutdown(&self) {
        self.lifecycle.drain(|| {
            let mut timeline = self.shared.timeline.lock();
            timeline.stopping = true;
            self.shared.wake.notify_all();
        });
    }

    fn join(&self) -> Result<(), WorkerError> {
        self.lifecycle.join()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

fn run_timeline(name: &str, shared: &Shared, target: &TaskHandle) {
    let mut timeline = shared.timeline.lock();
    loop {
        if timeline.stopping {
            break;
        }

        let Some(deadline) = timeline.events.peek().map(|Reverse(entry)| entry.deadline) else {
            shared.wake.wait(&mut timeline);
            continue;
        };

        if deadline > Instant::now() {
            shared.wake.wait_until(&mut timeline, deadline);
            continue;
        }

        let Some(Reverse(entry)) = timeline.events.pop() else {
            continue;
        };
        if timeline.cancelled.remove(&entry.id) {
            trace!(worker = %name, event = entry.id.0, "skipping cancelled event");
            continue;
        }

        match entry.job {
            Job::Once(task) => {
                MutexGuard::unlocked(&mut timeline, || dispatch(name, target, task));
            }
            Job::Every(interval, task) => {
                let run = task.clone();
                MutexGuard::unlocked(&mut timeline, || {
                    dispatch(name, target, Box::new(move || run()))
                });
                match entry.deadline.checked_add(interval) {
                    Some(deadline) => timeline.events.push(Reverse(Entry {
                        deadline,
                        id: entry.id,
                        job: Job::Every(interval, task),
                    })),
                    None => debug!(
                        worker = %name,
                        event = entry.id.0,
                        "next deadline out of range, dropping recurring event"
                    ),
                }
            }
        }
    }

    let discarded = timeline.events.len();
    timeline.events.clear();
    timeline.cancelled.clear();
    debug!(worker = %name, discarded, "scheduler stopped");
}

fn dispatch(name: &str, target: &TaskHandle, task: Task) {
    if let Err(e) = target.submit(task) {
        debug!(worker = %name, target = %target.name(), error = %e, "dropping due event");
    }
}

/// Scheduling-only view of a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
}

impl SchedulerHandle {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<EventId, WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.schedule(delay, task)
    }

    pub fn schedule_recurring<F>(&self, interval: Duration, task: F) -> Result<EventId, WorkerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.scheduler.schedule_recurring(interval, task)
    }

    pub fn cancel(&self, id: EventId) -> bool {
        self.scheduler.cancel(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::TaskWorker;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::thread;

    fn started_pair() -> (Arc<TaskWorker>, Scheduler) {
        let dispatcher = Arc::new(TaskWorker::new("dispatcher"));
        dispatcher.start().unwrap();
        let scheduler = Scheduler::new("scheduler", TaskHandle::new(dispatcher.clone()));
        scheduler.start().unwrap();
        (dispatcher, scheduler)
    }

    fn stop(dispatcher: &TaskWorker, scheduler: &Scheduler) {
        scheduler.request_shutdown();
        scheduler.join().unwrap();
        dispatcher.request_shutdown();
        dispatcher.join().unwrap();
    }

    #[test]
    fn test_due_event_runs_on_dispatcher() {
        let (dispatcher, scheduler) = started_pair();
        let (tx, rx) = std::sync::mpsc::channel();

        scheduler
            .schedule(Duration::from_millis(10), move || {
                tx.send(thread::current().name().map(str::to_string)).unwrap();
            })
            .unwrap();

        let ran_on = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ran_on.as_deref(), Some("dispatcher"));
        stop(&dispatcher, &scheduler);
    }

    #[test]
    fn test_events_fire_in_deadline_order() {
        let (dispatcher, scheduler) = started_pair();
        let (tx, rx) = std::sync::mpsc::channel();

        for (delay, label) in [(60, "late"), (10, "early"), (30, "middle")] {
            let tx = tx.clone();
            scheduler
                .schedule(Duration::from_millis(delay), move || tx.send(label).unwrap())
                .unwrap();
        }

        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
        stop(&dispatcher, &scheduler);
    }

    #[test]
    fn test_cancelled_event_never_fires() {
        let (dispatcher, scheduler) = started_pair();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let id = scheduler
            .schedule(Duration::from_millis(50), move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        assert!(scheduler.cancel(id));

        thread::sleep(Duration::from_millis(120));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
        stop(&dispatcher, &scheduler);
    }

    #[test]
    fn test_recurring_event_repeats() {
        let (dispatcher, scheduler) = started_pair();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler
            .schedule_recurring(Duration::from_millis(10), move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        stop(&dispatcher, &scheduler);
        assert!(fired.load(AtomicOrdering::SeqCst) >= 3);
    }

    #[test]
    fn test_unrepresentable_delay_is_rejected() {
        let (dispatcher, scheduler) = started_pair();
        let forever = Duration::from_secs(i64::MAX as u64);

        assert!(matches!(
            scheduler.schedule(forever, || {}),
            Err(WorkerError::InvalidDelay { .. })
        ));
        assert!(matches!(
            scheduler.schedule_recurring(forever, || {}),
            Err(WorkerError::InvalidDelay { .. })
        ));
        assert!(matches!(
            scheduler.schedule_recurring(Duration::ZERO, || {}),
            Err(WorkerError::InvalidDelay { .. })
        ));
        assert_eq!(scheduler.pending(), 0);
        stop(&dispatcher, &scheduler);
    }

    #[test]
    fn test_schedule_rejected_after_shutdown() {
        let (dispatcher, scheduler) = started_pair();
        scheduler.request_shutdown();
        assert!(matches!(
            scheduler.schedule(Duration::ZERO, || {}),
            Err(WorkerError::NotAccepting(_))
        ));
        scheduler.join().unwrap();
        dispatcher.request_shutdown();
        dispatcher.join().unwrap();
    }
}
