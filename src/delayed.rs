//! One-shot delayed jobs, each on its own short-lived scheduler thread.

use crate::error::{Error, Result};
use crate::executor::PanicHandler;
use crate::tag::Tag;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

static DELAYED_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelayedJobId(u64);

impl DelayedJobId {
    fn next() -> Self {
        DelayedJobId(DELAYED_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DelayedJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Scheduler {
    stop: Sender<()>,
    done: Arc<AtomicBool>,
}

impl Scheduler {
    /// Wakes the scheduler thread so it exits without running the job.
    /// A job that is already running is left to finish.
    fn stop(self) -> bool {
        if self.done.load(Ordering::Acquire) {
            return false;
        }
        let _ = self.stop.try_send(());
        true
    }
}

#[derive(Default)]
struct DelayedInner {
    jobs: Mutex<HashMap<Tag, HashMap<DelayedJobId, Scheduler>>>,
}

impl DelayedInner {
    fn remove(&self, tag: &Tag, id: DelayedJobId) -> Option<Scheduler> {
        let mut jobs = self.jobs.lock();
        let scheduled = jobs.get_mut(tag)?;
        let scheduler = scheduled.remove(&id);
        if scheduled.is_empty() {
            jobs.remove(tag);
        }
        scheduler
    }
}

/// Tag-scoped table of delayed one-shot jobs.
pub struct DelayedTaskRegistry {
    inner: Arc<DelayedInner>,
    panic_handler: Arc<PanicHandler>,
    thread_name_prefix: String,
}

impl DelayedTaskRegistry {
    pub fn new<S: Into<String>>(thread_name_prefix: S) -> Self {
        Self {
            inner: Arc::new(DelayedInner::default()),
            panic_handler: Arc::new(PanicHandler::new()),
            thread_name_prefix: thread_name_prefix.into(),
        }
    }

    /// Runs `job` on a dedicated thread after `delay`, unless cancelled
    /// first.
    pub fn schedule<F>(&self, tag: &Tag, job: F, delay: Duration) -> Result<DelayedJobId>
    where
        F: FnOnce() + Send + 'static,
    {
        if delay.is_zero() {
            return Err(Error::invalid_argument("delay must be > 0"));
        }

        let id = DelayedJobId::next();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let done = Arc::new(AtomicBool::new(false));

        let registry: Weak<DelayedInner> = Arc::downgrade(&self.inner);
        let panic_handler = self.panic_handler.clone();
        let thread_done = done.clone();
        let thread_tag = tag.clone();

        // Held across spawn so the thread cannot remove its entry before it
        // is inserted.
        let mut jobs = self.inner.jobs.lock();

        thread::Builder::new()
            .name(format!("{}-delay-{}", self.thread_name_prefix, id))
            .spawn(move || {
                match stop_rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {
                        let _ = panic_handler.execute("delayed", job);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        trace!(job = %id, "delayed job stopped before firing");
                    }
                }
                thread_done.store(true, Ordering::Release);
                if let Some(registry) = registry.upgrade() {
                    registry.remove(&thread_tag, id);
                }
            })?;

        jobs.entry(tag.clone()).or_default().insert(
            id,
            Scheduler {
                stop: stop_tx,
                done,
            },
        );
        Ok(id)
    }

    /// Stops the job if it has not fired. Returns `false` if the job was
    /// unknown under `tag` or had already finished.
    pub fn cancel(&self, tag: &Tag, id: DelayedJobId) -> bool {
        self.inner
            .remove(tag, id)
            .map_or(false, |scheduler| scheduler.stop())
    }

    /// Stops every waiting job under `tag` and drops the tag. Returns the
    /// number of jobs stopped.
    pub fn cancel_all(&self, tag: &Tag) -> usize {
        let Some(scheduled) = self.inner.jobs.lock().remove(tag) else {
            return 0;
        };
        let stopped = scheduled
            .into_values()
            .map(Scheduler::stop)
            .filter(|stopped| *stopped)
            .count();
        debug!(%tag, stopped, "delayed jobs cancelled");
        stopped
    }

    pub(crate) fn cancel_everything(&self) -> usize {
        let all: Vec<_> = self.inner.jobs.lock().drain().collect();
        all.into_iter()
            .flat_map(|(_, scheduled)| scheduled.into_values())
            .map(Scheduler::stop)
            .filter(|stopped| *stopped)
            .count()
    }

    /// Number of jobs under `tag` that have not finished.
    pub fn pending(&self, tag: &Tag) -> usize {
        self.inner.jobs.lock().get(tag).map_or(0, |jobs| jobs.len())
    }
}

impl fmt::Debug for DelayedTaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedTaskRegistry")
            .field("tags", &self.inner.jobs.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn test_fires_and_cleans_up() {
        let registry = DelayedTaskRegistry::new("test");
        let tag = Tag::new();
        let (tx, rx) = mpsc::channel();

        registry
            .schedule(&tag, move || tx.send(()).unwrap(), Duration::from_millis(20))
            .unwrap();
        assert_eq!(registry.pending(&tag), 1);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.pending(&tag) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(registry.pending(&tag), 0);
    }

    #[test]
    fn test_cancel_before_fire() {
        let registry = DelayedTaskRegistry::new("test");
        let tag = Tag::new();
        let (tx, rx) = mpsc::channel();

        let id = registry
            .schedule(&tag, move || tx.send(()).unwrap(), Duration::from_millis(100))
            .unwrap();
        assert!(registry.cancel(&tag, id));
        assert_eq!(registry.pending(&tag), 0);
        assert!(!registry.cancel(&tag, id));

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_cancel_all_keeps_other_tags() {
        let registry = DelayedTaskRegistry::new("test");
        let doomed = Tag::new();
        let kept = Tag::new();
        let (tx, rx) = mpsc::channel();

        for _ in 0..3 {
            let tx = tx.clone();
            registry
                .schedule(&doomed, move || tx.send("doomed").unwrap(), Duration::from_millis(50))
                .unwrap();
        }
        registry
            .schedule(&kept, move || tx.send("kept").unwrap(), Duration::from_millis(50))
            .unwrap();

        assert_eq!(registry.cancel_all(&doomed), 3);
        assert_eq!(registry.pending(&doomed), 0);

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "kept");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_zero_delay_rejected() {
        let registry = DelayedTaskRegistry::new("test");
        let result = registry.schedule(&Tag::new(), || {}, Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
