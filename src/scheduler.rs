// Scheduler module
// Priority task queue with backpressure, plus a pool that drains it on the tokio runtime.
// Tasks are cooperative: aborting only raises a flag that the task polls through its
// TaskContext, and priorities can change while a task is still queued.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::runtime::{Runtime, RuntimeBuilder};

/// Execution priority. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    VeryHigh = 3,
}

impl Priority {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::VeryHigh,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler has been shut down")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A unit of work. `run` is called at most once, on whatever thread the scheduler picks.
pub trait Task: Send + Sync + 'static {
    fn run(&self, ctx: &TaskContext);

    fn description(&self) -> String {
        String::from("task")
    }
}

// Shared between the queue, the handle given to the submitter and the running task.
#[derive(Debug)]
struct TaskState {
    id: TaskId,
    description: String,
    priority: AtomicU8,
    aborted: AtomicBool,
    running: AtomicBool,
    finished: AtomicBool,
    progress: AtomicU8,
}

/// Passed to a running task.
pub struct TaskContext {
    state: Arc<TaskState>,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.state.id
    }

    /// False once the task has been aborted; tasks check it between steps.
    pub fn can_execute(&self) -> bool {
        !self.state.aborted.load(Ordering::Acquire)
    }

    pub fn report_progress(&self, percent: u8) {
        self.state.progress.store(percent.min(100), Ordering::Relaxed);
    }
}

/// Submitter-side handle of a task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.state.id
    }

    pub fn description(&self) -> &str {
        &self.state.description
    }

    /// Request cancellation. Queued tasks are dropped, running tasks stop at their next check.
    pub fn abort(&self) {
        self.state.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.state.priority.load(Ordering::Relaxed))
    }

    /// Takes effect for the next dispatch if the task is still queued.
    pub fn set_priority(&self, priority: Priority) {
        self.state.priority.store(priority as u8, Ordering::Relaxed);
    }

    pub fn progress(&self) -> u8 {
        self.state.progress.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn has_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }
}

struct QueuedTask {
    seq: u64,
    task: Arc<dyn Task>,
    state: Arc<TaskState>,
}

/// Pending tasks, selected by current priority then submission order.
struct TaskQueue {
    pending: VecDeque<QueuedTask>,
    // Maximum number of tasks running at once (backpressure).
    max_concurrent: usize,
    active: usize,
    next_seq: u64,
}

impl TaskQueue {
    fn new(max_concurrent: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            max_concurrent: max_concurrent.max(1),
            active: 0,
            next_seq: 0,
        }
    }

    fn schedule_task(&mut self, task: Arc<dyn Task>, state: Arc<TaskState>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(QueuedTask { seq, task, state });
    }

    fn next_task(&mut self) -> Option<QueuedTask> {
        // Aborted tasks never run.
        self.pending.retain(|queued| {
            let aborted = queued.state.aborted.load(Ordering::Acquire);
            if aborted {
                queued.state.finished.store(true, Ordering::Release);
            }
            !aborted
        });

        if self.active >= self.max_concurrent {
            return None;
        }

        let index = self
            .pending
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                let pa = a.state.priority.load(Ordering::Relaxed);
                let pb = b.state.priority.load(Ordering::Relaxed);
                pa.cmp(&pb).then(b.seq.cmp(&a.seq))
            })
            .map(|(index, _)| index)?;

        let queued = self.pending.remove(index)?;
        self.active += 1;
        Some(queued)
    }

    fn complete_task(&mut self) {
        if self.active > 0 {
            self.active -= 1;
        }
    }
}

struct SchedulerShared {
    queue: Mutex<TaskQueue>,
    notify: Notify,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl SchedulerShared {
    fn next_task(&self) -> Option<QueuedTask> {
        self.queue.lock().next_task()
    }

    fn execute(&self, queued: QueuedTask) {
        let ctx = TaskContext {
            state: Arc::clone(&queued.state),
        };
        if ctx.can_execute() {
            trace!(task = %queued.state.id, description = %queued.state.description, "running");
            queued.state.running.store(true, Ordering::Release);
            queued.task.run(&ctx);
            queued.state.running.store(false, Ordering::Release);
        }
        queued.state.finished.store(true, Ordering::Release);
        self.queue.lock().complete_task();
        self.notify.notify_one();
    }
}

/// Priority scheduler. Cloning shares the same queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                queue: Mutex::new(TaskQueue::new(max_concurrent)),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Queue `task` for execution.
    pub fn submit(&self, task: Arc<dyn Task>, priority: Priority) -> Result<TaskHandle, SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        let state = Arc::new(TaskState {
            id: TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed)),
            description: task.description(),
            priority: AtomicU8::new(priority as u8),
            aborted: AtomicBool::new(false),
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            progress: AtomicU8::new(0),
        });
        let handle = TaskHandle {
            state: Arc::clone(&state),
        };
        self.shared.queue.lock().schedule_task(task, state);
        self.shared.notify.notify_one();
        Ok(handle)
    }

    /// Run the next eligible task on the calling thread. Returns false if none ran.
    pub fn run_next(&self) -> bool {
        match self.shared.next_task() {
            Some(queued) => {
                self.shared.execute(queued);
                true
            }
            None => false,
        }
    }

    /// Run queued tasks on the calling thread until the queue is empty.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }

    /// Number of queued tasks that have not been aborted.
    pub fn pending_count(&self) -> usize {
        self.shared
            .queue
            .lock()
            .pending
            .iter()
            .filter(|queued| !queued.state.aborted.load(Ordering::Acquire))
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.shared.queue.lock().active
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.queue.lock().max_concurrent
    }

    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        self.shared.queue.lock().max_concurrent = max_concurrent.max(1);
        self.shared.notify.notify_one();
    }

    /// Reject further submissions and abort everything still queued.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut queue = self.shared.queue.lock();
        for queued in queue.pending.drain(..) {
            queued.state.aborted.store(true, Ordering::Release);
            queued.state.finished.store(true, Ordering::Release);
        }
        drop(queue);
        self.shared.notify.notify_one();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

async fn dispatch(shared: Arc<SchedulerShared>) {
    loop {
        if shared.shut_down.load(Ordering::Acquire) {
            break;
        }
        match shared.next_task() {
            Some(queued) => {
                let shared = Arc::clone(&shared);
                tokio::task::spawn_blocking(move || shared.execute(queued));
            }
            None => shared.notify.notified().await,
        }
    }
    debug!("dispatcher stopped");
}

/// Builder for a TaskPool.
#[derive(Debug, Clone)]
pub struct TaskPoolBuilder {
    worker_threads: usize, // Default: 4, Range: 1-64
    max_concurrent: usize, // Default: 4, Range: 1-256
}

impl Default for TaskPoolBuilder {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_concurrent: 4,
        }
    }
}

impl TaskPoolBuilder {
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.clamp(1, 64);
        self
    }

    pub fn max_concurrent(mut self, tasks: usize) -> Self {
        self.max_concurrent = tasks.clamp(1, 256);
        self
    }

    /// Create a scheduler and start draining it.
    pub fn build(self) -> Result<TaskPool, std::io::Error> {
        TaskPool::start(Scheduler::new(self.max_concurrent), self.worker_threads)
    }
}

/// Runs a scheduler's tasks on a multi-threaded runtime.
pub struct TaskPool {
    scheduler: Scheduler,
    runtime: Runtime,
    dispatcher: Option<tokio::task::JoinHandle<()>>,
}

impl TaskPool {
    pub fn builder() -> TaskPoolBuilder {
        TaskPoolBuilder::default()
    }

    /// Start draining `scheduler` with `worker_threads` async threads.
    pub fn start(scheduler: Scheduler, worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = RuntimeBuilder::new()
            .worker_threads(worker_threads)
            .max_blocking_threads(scheduler.max_concurrent())
            .build()?;
        let dispatcher = runtime.spawn(dispatch(Arc::clone(&scheduler.shared)));
        debug!(worker_threads, max_concurrent = scheduler.max_concurrent(), "task pool started");
        Ok(Self {
            scheduler,
            runtime,
            dispatcher,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stop the dispatcher and wait briefly for running tasks.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
        self.runtime.shutdown(Duration::from_millis(500));
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Recorder {
        label: u32,
        sink: Arc<Mutex<Vec<u32>>>,
    }

    impl Task for Recorder {
        fn run(&self, ctx: &TaskContext) {
            if ctx.can_execute() {
                self.sink.lock().push(self.label);
                ctx.report_progress(100);
            }
        }
    }

    fn recorder(label: u32, sink: &Arc<Mutex<Vec<u32>>>) -> Arc<dyn Task> {
        Arc::new(Recorder {
            label,
            sink: Arc::clone(sink),
        })
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let scheduler = Scheduler::new(1);
        let sink = Arc::new(Mutex::new(Vec::new()));
        scheduler.submit(recorder(1, &sink), Priority::Low).unwrap();
        scheduler.submit(recorder(2, &sink), Priority::Normal).unwrap();
        scheduler.submit(recorder(3, &sink), Priority::VeryHigh).unwrap();
        scheduler.submit(recorder(4, &sink), Priority::Normal).unwrap();

        assert_eq!(scheduler.run_pending(), 4);
        assert_eq!(*sink.lock(), vec![3, 2, 4, 1]);
    }

    #[test]
    fn test_priority_change_while_queued() {
        let scheduler = Scheduler::new(1);
        let sink = Arc::new(Mutex::new(Vec::new()));
        scheduler.submit(recorder(1, &sink), Priority::Normal).unwrap();
        let late = scheduler.submit(recorder(2, &sink), Priority::Low).unwrap();
        late.set_priority(Priority::VeryHigh);

        scheduler.run_pending();
        assert_eq!(*sink.lock(), vec![2, 1]);
        assert_eq!(late.priority(), Priority::VeryHigh);
    }

    #[test]
    fn test_aborted_tasks_never_run() {
        let scheduler = Scheduler::new(2);
        let sink = Arc::new(Mutex::new(Vec::new()));
        let handle = scheduler.submit(recorder(1, &sink), Priority::Normal).unwrap();
        scheduler.submit(recorder(2, &sink), Priority::Normal).unwrap();
        handle.abort();

        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(*sink.lock(), vec![2]);
        assert!(handle.has_finished());
        assert_eq!(handle.progress(), 0);
    }

    #[test]
    fn test_backpressure() {
        let scheduler = Scheduler::new(1);
        let sink = Arc::new(Mutex::new(Vec::new()));
        scheduler.submit(recorder(1, &sink), Priority::Normal).unwrap();
        scheduler.submit(recorder(2, &sink), Priority::Normal).unwrap();

        let first = scheduler.shared.next_task().unwrap();
        assert!(scheduler.shared.next_task().is_none());
        assert_eq!(scheduler.active_count(), 1);

        scheduler.shared.execute(first);
        assert_eq!(scheduler.active_count(), 0);
        assert!(scheduler.run_next());
        assert_eq!(*sink.lock(), vec![1, 2]);
    }

    #[test]
    fn test_shutdown_rejects_and_aborts() {
        let scheduler = Scheduler::default();
        let sink = Arc::new(Mutex::new(Vec::new()));
        let queued = scheduler.submit(recorder(1, &sink), Priority::Normal).unwrap();
        scheduler.shutdown();

        assert!(queued.is_aborted());
        assert_eq!(
            scheduler.submit(recorder(2, &sink), Priority::Normal).unwrap_err(),
            SchedulerError::ShutDown
        );
        assert_eq!(scheduler.run_pending(), 0);
    }

    struct Notifier {
        tx: Mutex<mpsc::Sender<TaskId>>,
    }

    impl Task for Notifier {
        fn run(&self, ctx: &TaskContext) {
            let _ = self.tx.lock().send(ctx.id());
        }

        fn description(&self) -> String {
            "notifier".to_string()
        }
    }

    #[test]
    fn test_pool_runs_tasks_on_workers() {
        let pool = TaskPool::builder().worker_threads(2).max_concurrent(2).build().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut ids = Vec::new();
        for _ in 0..8 {
            let task = Arc::new(Notifier { tx: Mutex::new(tx.clone()) });
            let handle = pool.scheduler().submit(task, Priority::Normal).unwrap();
            assert_eq!(handle.description(), "notifier");
            ids.push(handle.id());
        }

        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).expect("task did not run"));
        }
        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
    }
}
