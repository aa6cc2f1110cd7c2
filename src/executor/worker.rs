// worker thread loop
use super::job::BoxedJob;
use super::pool::{PoolClass, PoolShared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

pub type WorkerId = usize;

// stats for each worker
#[derive(Debug)]
pub struct WorkerState {
    pub jobs_executed: AtomicU64,
}

impl WorkerState {
    pub(crate) fn new() -> Self {
        Self {
            jobs_executed: AtomicU64::new(0),
        }
    }
}

pub(crate) struct Worker {
    id: WorkerId,
    class: PoolClass,
    shared: Arc<PoolShared>,
    min_workers: usize,
    keep_alive: Duration,
    state: Arc<WorkerState>,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        class: PoolClass,
        shared: Arc<PoolShared>,
        min_workers: usize,
        keep_alive: Duration,
        state: Arc<WorkerState>,
    ) -> Self {
        Self {
            id,
            class,
            shared,
            min_workers,
            keep_alive,
            state,
        }
    }

    // main loop
    pub(crate) fn run(self, first: Option<BoxedJob>) {
        if let Some(job) = first {
            self.execute_job(job);
        }

        while let Some(job) = self.next_job() {
            self.execute_job(job);
        }

        trace!(
            worker = self.id,
            pool = %self.class,
            executed = self.state.jobs_executed.load(Ordering::Relaxed),
            "worker exiting"
        );
    }

    /// Waits for queued work. Returns `None` once the worker should exit,
    /// having already removed itself from the live count.
    fn next_job(&self) -> Option<BoxedJob> {
        let mut state = self.shared.state.lock();

        loop {
            if state.shutdown {
                break;
            }

            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }

            let transient = state.live > self.min_workers;
            state.idle += 1;
            let timed_out = if transient {
                self.shared
                    .available
                    .wait_for(&mut state, self.keep_alive)
                    .timed_out()
            } else {
                self.shared.available.wait(&mut state);
                false
            };
            state.idle -= 1;

            if timed_out && state.queue.is_empty() && state.live > self.min_workers {
                break;
            }
        }

        state.live -= 1;
        if state.live == 0 {
            self.shared.terminated.notify_all();
        }
        None
    }

    fn execute_job(&self, job: BoxedJob) {
        self.shared.active.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let name = job.name().to_string();
        let _ = self.shared.panic_handler.execute(&name, move || job.run());

        self.shared
            .busy_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.state.jobs_executed.fetch_add(1, Ordering::Relaxed);
        self.shared.completed.fetch_add(1, Ordering::Relaxed);
        self.shared.active.fetch_sub(1, Ordering::Relaxed);
    }
}
