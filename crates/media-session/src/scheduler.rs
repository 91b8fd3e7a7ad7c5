//! Deferred task scheduling
//!
//! All session mutations run on one designated execution context. The session
//! only needs the [`Scheduler`] trait: `submit` queues a task that will run
//! exactly once, later, on that context, and never inside `submit` itself.
//!
//! Two implementations are provided:
//!
//! - [`ContextScheduler`] owns a dedicated thread driving a single-threaded
//!   tokio runtime fed by an unbounded channel.
//! - [`ManualScheduler`] only queues; whoever calls
//!   [`ManualScheduler::run_pending`] becomes the designated context. Useful
//!   when embedding the session in an existing main loop and for deterministic
//!   tests.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{MediaSessionError, Result};

/// A unit of work for the designated execution context
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Execution context that serializes session mutations
pub trait Scheduler: Send + Sync {
    /// Queue `task` to run once on the designated context
    ///
    /// Must return without running the task and without waiting for it.
    fn submit(&self, task: DeferredTask) -> Result<()>;

    /// Whether the calling thread is the designated context
    fn is_designated_context(&self) -> bool;
}

/// Counters shared between a scheduler and its context thread
#[derive(Debug, Default)]
pub struct SchedulerStats {
    submitted: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
}

impl SchedulerStats {
    /// Tasks accepted by `submit`
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Tasks that ran to completion
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    /// Tasks that panicked
    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Acquire)
    }

    /// Tasks accepted but not run yet
    pub fn pending(&self) -> u64 {
        self.submitted()
            .saturating_sub(self.executed() + self.panicked())
    }
}

fn run_task(name: &str, task: DeferredTask, stats: &SchedulerStats) {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => {
            stats.executed.fetch_add(1, Ordering::AcqRel);
        }
        Err(_) => {
            stats.panicked.fetch_add(1, Ordering::AcqRel);
            error!("Deferred task panicked on context {}", name);
        }
    }
}

/// Scheduler backed by a dedicated context thread
pub struct ContextScheduler {
    name: String,
    sender: RwLock<Option<mpsc::UnboundedSender<DeferredTask>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    stats: Arc<SchedulerStats>,
}

impl ContextScheduler {
    /// Spawn the context thread and start accepting tasks
    pub fn start(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<DeferredTask>();
        let stats = Arc::new(SchedulerStats::default());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| MediaSessionError::Config(format!("failed to build context runtime: {}", e)))?;

        let loop_stats = stats.clone();
        let loop_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(async move {
                    debug!("Context {} running", loop_name);
                    while let Some(task) = receiver.recv().await {
                        run_task(&loop_name, task, &loop_stats);
                    }
                    debug!("Context {} drained", loop_name);
                });
            })
            .map_err(|e| MediaSessionError::Config(format!("failed to spawn context thread: {}", e)))?;

        let thread_id = handle.thread().id();
        info!("Started execution context {}", name);

        Ok(Arc::new(Self {
            name,
            sender: RwLock::new(Some(sender)),
            thread: Mutex::new(Some(handle)),
            thread_id,
            stats,
        }))
    }

    /// Context name (also the thread name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task counters
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Wait until every task submitted before this call has run
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = tx.send(());
        }))?;
        rx.await.map_err(|_| MediaSessionError::SchedulerClosed)
    }

    /// Blocking variant of [`flush`](Self::flush) for non-async callers
    ///
    /// Must not be called from inside an async runtime or from the context thread.
    pub fn flush_blocking(&self) -> Result<()> {
        if self.is_designated_context() {
            return Err(MediaSessionError::InvalidArgument(
                "flush_blocking called from the designated context".to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = tx.send(());
        }))?;
        rx.blocking_recv().map_err(|_| MediaSessionError::SchedulerClosed)
    }

    /// Stop accepting tasks, run what is queued and join the context thread
    pub fn shutdown(&self) {
        if self.sender.write().take().is_none() {
            return;
        }
        if self.is_designated_context() {
            // Cannot join ourselves; the loop exits once the queue drains.
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("Context thread {} terminated abnormally", self.name);
            }
        }
        info!("Execution context {} stopped", self.name);
    }
}

impl Scheduler for ContextScheduler {
    fn submit(&self, task: DeferredTask) -> Result<()> {
        let sender = self.sender.read();
        let sender = sender.as_ref().ok_or(MediaSessionError::SchedulerClosed)?;
        sender
            .send(task)
            .map_err(|_| MediaSessionError::SchedulerClosed)?;
        self.stats.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_designated_context(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for ContextScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ContextScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextScheduler")
            .field("name", &self.name)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Scheduler that queues tasks until the owner drains them
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<DeferredTask>>,
    drain: Mutex<()>,
    running_on: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
    stats: SchedulerStats,
}

impl ManualScheduler {
    /// Create an empty scheduler
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run queued tasks on the calling thread until the queue is empty
    ///
    /// Tasks submitted while draining run in the same call. Only one thread
    /// drains at a time; other callers wait for it. A nested call from inside
    /// a task returns 0. Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        if self.is_designated_context() {
            return 0;
        }
        let _drain = self.drain.lock();
        *self.running_on.lock() = Some(thread::current().id());
        let mut ran = 0;
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => {
                    run_task("manual", task, &self.stats);
                    ran += 1;
                }
                None => break,
            }
        }
        *self.running_on.lock() = None;
        ran
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Refuse further submissions
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Task counters
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl Scheduler for ManualScheduler {
    fn submit(&self, task: DeferredTask) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MediaSessionError::SchedulerClosed);
        }
        self.queue.lock().push_back(task);
        self.stats.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_designated_context(&self) -> bool {
        *self.running_on.lock() == Some(thread::current().id())
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}
