//! # Serial Executor
//!
//! A single named worker thread that owns a value of type `T` and runs
//! closures against it one at a time. Any thread may post work; only the
//! worker ever touches `T`, so `T` needs no locking of its own.
//!
//! Tasks receive a [`TaskScope`] through which they can post follow-up work,
//! including delayed tasks. Delayed tasks are kept in a min-heap on the
//! worker and the worker blocks on the control channel until the earliest
//! deadline. Deadlines are read from the executor's [`Clock`], so a mocked
//! clock holds delayed work back until the mock is advanced.
//!
//! ```text
//!   producers ──post()──▶ crossbeam channel ──▶ worker: [ready FIFO] ──▶ task(&mut T)
//!                                                 ▲
//!                                  delayed heap ──┘ (deadline reached)
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use quanta::{Clock, Instant};
use tracing::{debug, trace};

use crate::error::ExecutorError;

type Task<T> = Box<dyn FnOnce(&mut T, &mut TaskScope<T>) + Send>;

enum Message<T> {
    Run(Task<T>),
    RunAt(Instant, Task<T>),
    Shutdown,
}

// ─── Delayed tasks ──────────────────────────────────────────────────────────

struct Delayed<T> {
    deadline: Instant,
    seq: u64,
    task: Task<T>,
}

// Reversed so the heap yields the earliest deadline; `seq` keeps equal
// deadlines in post order.
impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl<T> Eq for Delayed<T> {}

/// Handle given to running tasks for posting follow-up work on the same
/// worker.
pub struct TaskScope<T> {
    clock: Clock,
    ready: VecDeque<Task<T>>,
    delayed: BinaryHeap<Delayed<T>>,
    next_seq: u64,
}

impl<T> TaskScope<T> {
    pub(crate) fn new(clock: Clock) -> Self {
        TaskScope {
            clock,
            ready: VecDeque::new(),
            delayed: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Run `task` after the current one (and anything already queued).
    pub fn post<F>(&mut self, task: F)
    where
        F: FnOnce(&mut T, &mut TaskScope<T>) + Send + 'static,
    {
        self.ready.push_back(Box::new(task));
    }

    /// Run `task` once `delay` has elapsed.
    pub fn post_delayed<F>(&mut self, delay: Duration, task: F)
    where
        F: FnOnce(&mut T, &mut TaskScope<T>) + Send + 'static,
    {
        self.schedule(self.clock.now() + delay, Box::new(task));
    }

    /// Delayed tasks not yet due.
    pub fn pending_delayed(&self) -> usize {
        self.delayed.len()
    }

    fn schedule(&mut self, deadline: Instant, task: Task<T>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(Delayed {
            deadline,
            seq,
            task,
        });
    }

    /// Move due delayed tasks to the ready queue; returns the next deadline.
    fn promote_due(&mut self, now: Instant) -> Option<Instant> {
        while let Some(next) = self.delayed.peek() {
            if next.deadline > now {
                return Some(next.deadline);
            }
            if let Some(due) = self.delayed.pop() {
                self.ready.push_back(due.task);
            }
        }
        None
    }
}

// ─── Executor ───────────────────────────────────────────────────────────────

/// Owns `T` on a dedicated thread and runs posted closures against it in
/// order.
///
/// Dropping the executor shuts the worker down and drops `T` on it.
pub struct SerialExecutor<T: Send + 'static> {
    tx: Sender<Message<T>>,
    clock: Clock,
    thread_id: ThreadId,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> SerialExecutor<T> {
    /// Spawn the worker thread, moving `state` onto it. Delayed tasks are
    /// timed against `clock`.
    pub fn spawn(name: &str, clock: Clock, state: T) -> Result<Self, ExecutorError> {
        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_clock = clock.clone();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker(state, worker_clock, rx))
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;
        let thread_id = handle.thread().id();
        debug!(name, "serial executor started");
        Ok(SerialExecutor {
            tx,
            clock,
            thread_id,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// True when called from the worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn post<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce(&mut T, &mut TaskScope<T>) + Send + 'static,
    {
        self.send(Message::Run(Box::new(task)))
    }

    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce(&mut T, &mut TaskScope<T>) + Send + 'static,
    {
        self.send(Message::RunAt(self.clock.now() + delay, Box::new(task)))
    }

    /// Run `f` on the worker and wait for its result. Everything posted
    /// before it has run by the time it returns.
    pub fn invoke<R, F>(&self, f: F) -> Result<R, ExecutorError>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        if self.is_current() {
            return Err(ExecutorError::Reentrant);
        }
        let (result_tx, result_rx) = bounded(1);
        self.post(move |state, _| {
            let _ = result_tx.send(f(state));
        })?;
        result_rx.recv().map_err(|_| ExecutorError::Shutdown)
    }

    fn send(&self, msg: Message<T>) -> Result<(), ExecutorError> {
        if self.is_shutdown() {
            return Err(ExecutorError::Shutdown);
        }
        self.tx.send(msg).map_err(|_| ExecutorError::Shutdown)
    }

    /// Stop the worker. Tasks already queued ahead of the stop request still
    /// run; delayed tasks are discarded. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Message::Shutdown);
        if self.is_current() {
            // Joining ourselves would deadlock; the loop exits after this task.
            return;
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<T: Send + 'static> Drop for SerialExecutor<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker<T>(mut state: T, clock: Clock, rx: Receiver<Message<T>>) {
    let mut scope = TaskScope::new(clock.clone());
    loop {
        while let Some(task) = scope.ready.pop_front() {
            task(&mut state, &mut scope);
        }

        let next_deadline = scope.promote_due(clock.now());
        if !scope.ready.is_empty() {
            continue;
        }

        let msg = match next_deadline {
            Some(deadline) => {
                // A mocked clock does not move while we sleep; the deadline
                // is simply re-checked after the timeout.
                let timeout = deadline.saturating_duration_since(clock.now());
                match rx.recv_timeout(timeout) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            },
        };

        match msg {
            Message::Run(task) => scope.ready.push_back(task),
            Message::RunAt(deadline, task) => scope.schedule(deadline, task),
            Message::Shutdown => break,
        }
    }
    trace!(discarded = scope.pending_delayed(), "serial executor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_tasks_in_post_order() {
        let exec = SerialExecutor::spawn("test-order", Clock::new(), Vec::<u32>::new()).unwrap();
        for i in 0..100 {
            exec.post(move |v, _| v.push(i)).unwrap();
        }
        let seen = exec.invoke(|v| v.clone()).unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn is_current_only_on_worker() {
        let exec = SerialExecutor::spawn("test-current", Clock::new(), ()).unwrap();
        assert!(!exec.is_current());
        let worker_id = exec.invoke(|_| thread::current().id()).unwrap();
        assert_eq!(worker_id, exec.thread_id);
    }

    #[test]
    fn delayed_tasks_fire_in_deadline_order() {
        let exec =
            SerialExecutor::spawn("test-delayed", Clock::new(), Vec::<&'static str>::new())
                .unwrap();
        let (tx, rx) = mpsc::channel();
        exec.post_delayed(Duration::from_millis(40), |v, _| v.push("late"))
            .unwrap();
        exec.post_delayed(Duration::from_millis(10), |v, _| v.push("early"))
            .unwrap();
        exec.post(|v, _| v.push("now")).unwrap();
        exec.post_delayed(Duration::from_millis(80), move |v, _| {
            let _ = tx.send(v.clone());
        })
        .unwrap();

        let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen, vec!["now", "early", "late"]);
    }

    #[test]
    fn delayed_task_waits_at_least_its_delay() {
        let clock = Clock::new();
        let exec = SerialExecutor::spawn("test-wait", clock.clone(), ()).unwrap();
        let (tx, rx) = mpsc::channel();
        let posted = clock.now();
        let task_clock = clock.clone();
        exec.post_delayed(Duration::from_millis(30), move |_, _| {
            let _ = tx.send(task_clock.now());
        })
        .unwrap();
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired.saturating_duration_since(posted) >= Duration::from_millis(30));
    }

    #[test]
    fn delayed_task_follows_mock_clock() {
        let (clock, mock) = Clock::mock();
        let exec = SerialExecutor::spawn("test-mock", clock, ()).unwrap();
        let (tx, rx) = mpsc::channel();
        exec.post_delayed(Duration::from_millis(10), move |_, _| {
            let _ = tx.send(());
        })
        .unwrap();

        // Real time passing is not enough.
        assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());

        mock.increment(Duration::from_millis(10));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn scope_posts_run_on_worker() {
        let exec = SerialExecutor::spawn("test-scope", Clock::new(), 0u32).unwrap();
        let (tx, rx) = mpsc::channel();
        exec.post(move |n, scope| {
            *n += 1;
            scope.post(|n, scope| {
                *n += 1;
                scope.post_delayed(Duration::from_millis(5), move |n, _| {
                    *n += 1;
                    let _ = tx.send(*n);
                });
            });
        })
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_posts() {
        let exec = SerialExecutor::spawn("test-shutdown", Clock::new(), ()).unwrap();
        exec.shutdown();
        exec.shutdown();
        assert!(exec.is_shutdown());
        assert_eq!(exec.post(|_, _| {}), Err(ExecutorError::Shutdown));
        assert_eq!(exec.invoke(|_| ()), Err(ExecutorError::Shutdown));
    }

    #[test]
    fn shutdown_drops_state_on_worker() {
        struct Flag(mpsc::Sender<ThreadId>);
        impl Drop for Flag {
            fn drop(&mut self) {
                let _ = self.0.send(thread::current().id());
            }
        }

        let (tx, rx) = mpsc::channel();
        let exec = SerialExecutor::spawn("test-drop", Clock::new(), Flag(tx)).unwrap();
        let worker_id = exec.thread_id;
        drop(exec);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), worker_id);
    }

    #[test]
    fn invoke_from_worker_is_rejected() {
        let exec =
            Arc::new(SerialExecutor::spawn("test-reentrant", Clock::new(), ()).unwrap());
        let inner = Arc::clone(&exec);
        let (tx, rx) = mpsc::channel();
        exec.post(move |_, _| {
            let _ = tx.send(inner.invoke(|_| ()));
        })
        .unwrap();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Err(ExecutorError::Reentrant));
    }
}
