//! Bounded-concurrency task queue.
//!
//! [`TaskQueue`] accepts an unbounded backlog of deferred units of work and
//! drives them with a configurable maximum concurrency. Dispatch order is
//! FIFO; completion order depends on each task's own latency.
//!
//! The drive loop is a self-refilling pool: every completion immediately
//! refills free slots from the front of the backlog, so concurrency stays at
//! the limit until the backlog is exhausted, then drains to zero.
//!
//! # Failure isolation
//!
//! A task that returns an error (or panics) is logged and does not abort the
//! queue, other in-flight tasks, or the remaining backlog. [`TaskQueue::run`]
//! itself never fails.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tracing::error;

/// Concurrency limit used by [`TaskQueue::default`].
pub const DEFAULT_CONCURRENCY: usize = 4;

/// A queued unit of work. Boxed futures are inert until dispatched.
type Task = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Lifecycle of a [`TaskQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No drive loop is active.
    Idle,
    /// [`TaskQueue::run`] is dispatching tasks.
    Running,
    /// A stop was requested: in-flight tasks are draining, nothing new is
    /// dispatched.
    StopRequested,
}

/// A FIFO queue of deferred tasks executed with bounded concurrency.
///
/// All methods take `&self`, so a queue can be shared across tasks behind an
/// [`std::sync::Arc`] — e.g. to call [`TaskQueue::stop`] or
/// [`TaskQueue::submit`] while [`TaskQueue::run`] is in progress.
pub struct TaskQueue {
    /// Max concurrently-running tasks. Read at every dispatch decision, so
    /// changes apply from the next dispatch onward, never retroactively.
    limit: AtomicUsize,
    backlog: Mutex<VecDeque<Task>>,
    active: AtomicUsize,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl TaskQueue {
    /// Create a queue that runs at most `limit` tasks concurrently.
    ///
    /// A limit of zero is treated as 1: the queue must never deadlock.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit.max(1)),
            backlog: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Append a unit of work to the backlog.
    ///
    /// Does not start execution by itself — the task runs once a
    /// [`TaskQueue::run`] drive loop dispatches it. May be called at any
    /// time, including while the queue is running.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.backlog
            .lock()
            .expect("backlog lock")
            .push_back(Box::pin(task));
    }

    /// Set the concurrency limit for future dispatch decisions.
    ///
    /// Tasks already in flight above a newly-lowered limit finish normally;
    /// the pool only refills once it drains below the new limit. Zero is
    /// treated as 1.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit.max(1), Ordering::SeqCst);
    }

    /// Request a stop.
    ///
    /// Never interrupts in-flight tasks; prevents any further dequeue from
    /// the backlog. Queued-but-unstarted tasks stay queued and a later
    /// [`TaskQueue::run`] resumes them.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Drive the backlog until it is drained (or a stop request drains the
    /// in-flight pool), then return.
    ///
    /// Idempotent: a call while a drive loop is already active returns
    /// immediately without touching the queue. Calling on an empty backlog
    /// completes immediately.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let mut in_flight: FuturesUnordered<JoinHandle<anyhow::Result<()>>> =
            FuturesUnordered::new();

        loop {
            // Refill free slots from the front of the backlog.
            while !self.stop_requested.load(Ordering::SeqCst) && in_flight.len() < self.limit() {
                let Some(task) = self.pop_front() else { break };
                self.active.fetch_add(1, Ordering::SeqCst);
                in_flight.push(tokio::spawn(task));
            }

            // Nothing in flight and nothing dispatchable: the queue is idle.
            let Some(joined) = in_flight.next().await else {
                break;
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("queued task failed: {err:#}"),
                Err(join_err) => error!("queued task panicked: {join_err}"),
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        if !self.running.load(Ordering::SeqCst) {
            RunState::Idle
        } else if self.stop_requested.load(Ordering::SeqCst) {
            RunState::StopRequested
        } else {
            RunState::Running
        }
    }

    /// Number of tasks currently executing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting in the backlog.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().expect("backlog lock").len()
    }

    fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    fn pop_front(&self) -> Option<Task> {
        self.backlog.lock().expect("backlog lock").pop_front()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("limit", &self.limit())
            .field("backlog_len", &self.backlog_len())
            .field("active", &self.active_count())
            .field("state", &self.state())
            .finish()
    }
}
