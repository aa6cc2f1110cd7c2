use super::job::BoxedJob;
use super::panic_handler::PanicHandler;
use super::worker::{Worker, WorkerState};
use crate::config::{OverloadPolicy, PoolConfig};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static WORKER_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Selects which pool runs a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolClass {
    /// Small queued pool for work nobody is waiting on.
    Background,
    /// Large pool for user-visible work; rejects when every worker is busy.
    Interactive,
}

impl fmt::Display for PoolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolClass::Background => f.write_str("background"),
            PoolClass::Interactive => f.write_str("interactive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDiscipline {
    /// FIFO queue without a bound.
    Unbounded,
    /// Zero-capacity queue: a job is accepted only if an idle worker takes it
    /// immediately or a new worker can be started.
    Handoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPriority {
    Min,
    Normal,
    Max,
}

impl ThreadPriority {
    /// Nice value applied to worker threads.
    pub fn nice(&self) -> i32 {
        match self {
            ThreadPriority::Min => 19,
            ThreadPriority::Normal => 0,
            ThreadPriority::Max => -8,
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn apply_thread_priority(priority: ThreadPriority) {
    if priority == ThreadPriority::Normal {
        return;
    }
    unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        if libc::setpriority(libc::PRIO_PROCESS, tid, priority.nice()) != 0 {
            debug!(
                thread = thread::current().name().unwrap_or("unknown"),
                nice = priority.nice(),
                "could not apply thread priority"
            );
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn apply_thread_priority(_priority: ThreadPriority) {}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub class: PoolClass,
    pub pool_size: usize,
    pub idle: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub rejected: u64,
    pub panicked: usize,
    /// Total time workers have spent running jobs.
    pub busy_time: Duration,
}

pub(crate) struct PoolState {
    pub(crate) queue: VecDeque<BoxedJob>,
    pub(crate) live: usize,
    pub(crate) idle: usize,
    pub(crate) shutdown: bool,
}

impl PoolState {
    fn busy(&self) -> usize {
        self.live - self.idle.saturating_sub(self.queue.len())
    }
}

pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolState>,
    pub(crate) available: Condvar,
    pub(crate) terminated: Condvar,
    pub(crate) active: AtomicUsize,
    pub(crate) completed: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) busy_ns: AtomicU64,
    pub(crate) panic_handler: PanicHandler,
}

/// A bounded thread pool with executor-style admission.
///
/// Workers up to `min_workers` are started eagerly as jobs arrive and live
/// until shutdown. Above that, workers are started only when the queue
/// refuses a job and exit after `keep_alive` without work.
pub struct WorkerPool {
    class: PoolClass,
    config: PoolConfig,
    overload_policy: OverloadPolicy,
    debug: bool,
    stack_size: Option<usize>,
    thread_name_prefix: String,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(
        class: PoolClass,
        config: PoolConfig,
        overload_policy: OverloadPolicy,
        debug: bool,
        stack_size: Option<usize>,
        thread_name_prefix: &str,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                live: 0,
                idle: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
            terminated: Condvar::new(),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            busy_ns: AtomicU64::new(0),
            panic_handler: PanicHandler::new(),
        });

        Self {
            class,
            config,
            overload_policy,
            debug,
            stack_size,
            thread_name_prefix: thread_name_prefix.to_string(),
            shared,
        }
    }

    pub fn class(&self) -> PoolClass {
        self.class
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Hands `job` to the pool without blocking.
    ///
    /// On rejection the job is abandoned and [`Error::PoolSaturated`] is
    /// returned; nothing is retried.
    pub fn execute(&self, job: BoxedJob) -> Result<()> {
        let mut state = self.shared.state.lock();

        if state.shutdown {
            drop(state);
            job.abandon();
            return Err(Error::ShutDown);
        }

        let job = if state.live < self.config.min_workers {
            match self.spawn_worker(&mut state, job) {
                Ok(()) => None,
                Err(job) => Some(job),
            }
        } else {
            Some(job)
        };

        let job = match job {
            None => None,
            Some(job) if self.offer(&state) => {
                state.queue.push_back(job);
                self.shared.available.notify_one();
                None
            }
            Some(job) if state.live < self.config.max_workers => {
                self.spawn_worker(&mut state, job).err()
            }
            Some(job) => Some(job),
        };

        if let Some(job) = job {
            drop(state);
            return Err(self.reject(job));
        }

        let busy = state.busy();
        let pool_size = state.live;
        drop(state);

        if self.debug {
            debug!(
                pool = %self.class,
                pool_size,
                active = busy,
                "job admitted"
            );
        }

        self.check_overload(busy)
    }

    fn offer(&self, state: &PoolState) -> bool {
        match self.config.queue {
            QueueDiscipline::Unbounded => true,
            QueueDiscipline::Handoff => state.queue.len() < state.idle,
        }
    }

    fn reject(&self, job: BoxedJob) -> Error {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            pool = %self.class,
            job = job.name(),
            max_workers = self.config.max_workers,
            "job rejected, pool saturated"
        );
        job.abandon();
        Error::PoolSaturated {
            class: self.class,
            max_workers: self.config.max_workers,
        }
    }

    fn check_overload(&self, busy: usize) -> Result<()> {
        let threshold = match self.config.overload_threshold {
            Some(threshold) if busy > threshold => threshold,
            _ => return Ok(()),
        };

        match self.overload_policy {
            OverloadPolicy::Report => {
                error!(pool = %self.class, active = busy, threshold, "pool overloaded");
                Ok(())
            }
            OverloadPolicy::Fail => Err(Error::Overloaded {
                class: self.class,
                active: busy,
                threshold,
            }),
            OverloadPolicy::Abort => {
                error!(
                    pool = %self.class,
                    active = busy,
                    threshold,
                    "pool structurally overloaded, aborting"
                );
                std::process::abort();
            }
        }
    }

    /// Starts a worker whose first job is `job`. Gives the job back if the
    /// thread could not be created.
    fn spawn_worker(
        &self,
        state: &mut PoolState,
        job: BoxedJob,
    ) -> std::result::Result<(), BoxedJob> {
        let n = WORKER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}-{}", self.thread_name_prefix, self.class, n);

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let first = Arc::new(Mutex::new(Some(job)));
        let first_clone = first.clone();
        let worker = Worker::new(
            n,
            self.class,
            self.shared.clone(),
            self.config.min_workers,
            self.config.keep_alive,
            Arc::new(WorkerState::new()),
        );
        let priority = self.config.priority;

        match builder.spawn(move || {
            apply_thread_priority(priority);
            let job = first_clone.lock().take();
            worker.run(job);
        }) {
            Ok(_) => {
                state.live += 1;
                if self.debug {
                    debug!(pool = %self.class, thread = %name, "worker started");
                }
                Ok(())
            }
            Err(e) => {
                error!(pool = %self.class, error = %e, "failed to spawn worker");
                match first.lock().take() {
                    Some(job) => Err(job),
                    None => Ok(()),
                }
            }
        }
    }

    /// Stops accepting work, discards queued jobs and wakes idle workers.
    /// Running jobs are not interrupted. Returns the number of discarded
    /// jobs, each of which has been abandoned.
    pub fn shutdown_now(&self) -> usize {
        let drained: Vec<BoxedJob> = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.available.notify_all();
            if state.live == 0 {
                self.shared.terminated.notify_all();
            }
            state.queue.drain(..).collect()
        };

        let discarded = drained.len();
        for job in drained {
            job.abandon();
        }

        info!(pool = %self.class, discarded, "pool shut down");
        discarded
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Blocks until every worker has exited after a shutdown, or the
    /// timeout elapses. Returns whether the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !(state.shutdown && state.live == 0) {
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.shutdown && state.live == 0;
            }
        }
        true
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            class: self.class,
            pool_size: state.live,
            idle: state.idle,
            active: self.shared.active.load(Ordering::Relaxed),
            queued: state.queue.len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            panicked: self.shared.panic_handler.panic_count(),
            busy_time: Duration::from_nanos(self.shared.busy_ns.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("class", &self.class)
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            self.shutdown_now();
        }
    }
}
