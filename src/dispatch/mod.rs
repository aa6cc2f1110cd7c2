//! Serial dispatch onto a single host-provided thread.
//!
//! [`Dispatcher::new`] returns a cloneable handle and a [`DispatchLoop`].
//! The host runs the loop on the thread that should receive callbacks (its
//! UI or main thread); every job posted through any handle then runs on
//! that thread, one at a time, in queue order. Hosts without such a thread
//! can use [`Dispatcher::spawn`].

mod job;

pub use job::MainJob;

use crate::error::{Error, Result};
use crate::executor::PanicHandler;
use crate::tag::Tag;
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

enum Runnable {
    Main(MainJob),
    Once(Box<dyn FnOnce() + Send + 'static>),
}

struct Entry {
    runnable: Runnable,
    tag: Option<Tag>,
}

impl Entry {
    fn is(&self, tag: &Tag, job: &MainJob) -> bool {
        match (&self.runnable, &self.tag) {
            (Runnable::Main(queued), Some(queued_tag)) => queued_tag == tag && queued == job,
            _ => false,
        }
    }

    fn has_tag(&self, tag: &Tag) -> bool {
        self.tag.as_ref() == Some(tag)
    }
}

struct Delayed {
    due: Instant,
    seq: u64,
    entry: Entry,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct DispatchState {
    ready: VecDeque<Entry>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    tracked: HashMap<Tag, Vec<MainJob>>,
    seq: u64,
    shutdown: bool,
}

impl DispatchState {
    fn track(&mut self, tag: &Tag, job: &MainJob, dedup: bool) {
        let jobs = self.tracked.entry(tag.clone()).or_default();
        if !dedup || !jobs.contains(job) {
            jobs.push(job.clone());
        }
    }

    fn untrack(&mut self, tag: &Tag, job: &MainJob) {
        if let Some(jobs) = self.tracked.get_mut(tag) {
            jobs.retain(|tracked| tracked != job);
            if jobs.is_empty() {
                self.tracked.remove(tag);
            }
        }
    }

    fn is_pending(&self, tag: &Tag, job: &MainJob) -> bool {
        self.ready.iter().any(|e| e.is(tag, job))
            || self.delayed.iter().any(|Reverse(d)| d.entry.is(tag, job))
    }

    fn remove_pending<P>(&mut self, pred: P) -> usize
    where
        P: Fn(&Entry) -> bool,
    {
        let before = self.ready.len() + self.delayed.len();
        self.ready.retain(|e| !pred(e));
        self.delayed.retain(|Reverse(d)| !pred(&d.entry));
        before - (self.ready.len() + self.delayed.len())
    }

    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .map_or(false, |Reverse(next)| next.due <= now)
        {
            if let Some(Reverse(due)) = self.delayed.pop() {
                self.ready.push_back(due.entry);
            }
        }
    }
}

struct DispatchShared {
    state: Mutex<DispatchState>,
    wakeup: Condvar,
    thread: OnceLock<ThreadId>,
    panic_handler: PanicHandler,
}

/// Handle for posting work to the dispatch thread.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<DispatchShared>,
}

impl Dispatcher {
    /// Creates a dispatcher. Nothing runs until the returned loop is run.
    pub fn new() -> (Dispatcher, DispatchLoop) {
        let shared = Arc::new(DispatchShared {
            state: Mutex::new(DispatchState::default()),
            wakeup: Condvar::new(),
            thread: OnceLock::new(),
            panic_handler: PanicHandler::new(),
        });

        (
            Dispatcher {
                shared: shared.clone(),
            },
            DispatchLoop { shared },
        )
    }

    /// Creates a dispatcher bound to a new dedicated thread.
    pub fn spawn<S: Into<String>>(name: S) -> Result<DispatchThread> {
        let (dispatcher, dispatch_loop) = Dispatcher::new();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || dispatch_loop.run())?;

        Ok(DispatchThread {
            dispatcher,
            handle: Some(handle),
        })
    }

    fn enqueue(&self, entry: Entry, front: bool) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }
        if front {
            state.ready.push_front(entry);
        } else {
            state.ready.push_back(entry);
        }
        self.shared.wakeup.notify_one();
        true
    }

    /// Queues `job` without tracking it under any tag.
    pub fn post(&self, job: MainJob) {
        self.enqueue(
            Entry {
                runnable: Runnable::Main(job),
                tag: None,
            },
            false,
        );
    }

    /// Queues a one-shot closure. Returns `false` if the dispatcher has shut
    /// down and the closure was dropped.
    pub(crate) fn post_once<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(
            Entry {
                runnable: Runnable::Once(Box::new(f)),
                tag: None,
            },
            false,
        )
    }

    fn post_tracked(&self, tag: &Tag, job: MainJob, front: bool) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.track(tag, &job, false);
        let entry = Entry {
            runnable: Runnable::Main(job),
            tag: Some(tag.clone()),
        };
        if front {
            state.ready.push_front(entry);
        } else {
            state.ready.push_back(entry);
        }
        self.shared.wakeup.notify_one();
    }

    /// Queues `job` at the tail and tracks it under `tag`.
    pub fn post_tagged(&self, tag: &Tag, job: MainJob) {
        self.post_tracked(tag, job, false);
    }

    /// Queues `job` at the head and tracks it under `tag`.
    pub fn post_front(&self, tag: &Tag, job: MainJob) {
        self.post_tracked(tag, job, true);
    }

    /// Queues `job` once `delay` has elapsed. A job already tracked under
    /// `tag` is scheduled again but tracked once.
    pub fn post_delayed(&self, tag: &Tag, job: MainJob, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return Err(Error::invalid_argument("delay must be > 0"));
        }
        let due = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| Error::invalid_argument("delay too large"))?;

        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Error::ShutDown);
        }
        state.track(tag, &job, true);
        state.seq += 1;
        let seq = state.seq;
        state.delayed.push(Reverse(Delayed {
            due,
            seq,
            entry: Entry {
                runnable: Runnable::Main(job),
                tag: Some(tag.clone()),
            },
        }));
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Stops `job` from running under `tag`. A job that already ran, or was
    /// never posted under `tag`, is left alone.
    pub fn cancel(&self, tag: &Tag, job: &MainJob) {
        let mut state = self.shared.state.lock();
        let tracked = state
            .tracked
            .get(tag)
            .map_or(false, |jobs| jobs.contains(job));
        if !tracked {
            return;
        }

        let removed = state.remove_pending(|e| e.is(tag, job));
        state.untrack(tag, job);
        trace!(%tag, removed, "main job cancelled");
    }

    /// Cancels every job tracked under `tag`.
    pub fn cancel_all(&self, tag: &Tag) {
        let mut state = self.shared.state.lock();
        if state.tracked.remove(tag).is_none() {
            return;
        }
        let removed = state.remove_pending(|e| e.has_tag(tag));
        debug!(%tag, removed, "main jobs cancelled");
    }

    /// Number of jobs tracked under `tag`.
    pub fn tracked(&self, tag: &Tag) -> usize {
        self.shared
            .state
            .lock()
            .tracked
            .get(tag)
            .map_or(0, |jobs| jobs.len())
    }

    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.ready.len() + state.delayed.len()
    }

    /// Whether the caller is running on the dispatch thread.
    pub fn is_dispatch_thread(&self) -> bool {
        self.shared.thread.get() == Some(&thread::current().id())
    }

    /// Stops the loop after the job it is running, dropping everything
    /// still queued.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.ready.clear();
        state.delayed.clear();
        state.tracked.clear();
        self.shared.wakeup.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread", &self.shared.thread.get())
            .finish()
    }
}

/// The receiving end of a [`Dispatcher`]; run it on the callback thread.
pub struct DispatchLoop {
    shared: Arc<DispatchShared>,
}

impl DispatchLoop {
    /// Binds the current thread and runs jobs until the dispatcher shuts
    /// down.
    pub fn run(self) {
        let _ = self.shared.thread.set(thread::current().id());
        debug!(
            thread = thread::current().name().unwrap_or("unnamed"),
            "dispatch loop started"
        );

        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            state.promote_due(Instant::now());

            if let Some(entry) = state.ready.pop_front() {
                if let (Runnable::Main(job), Some(tag)) = (&entry.runnable, &entry.tag) {
                    if !state.is_pending(tag, job) {
                        state.untrack(tag, job);
                    }
                }
                drop(state);
                self.execute(entry.runnable);
                state = self.shared.state.lock();
                continue;
            }

            let next_due = state.delayed.peek().map(|Reverse(next)| next.due);
            match next_due {
                Some(due) => {
                    self.shared.wakeup.wait_until(&mut state, due);
                }
                None => self.shared.wakeup.wait(&mut state),
            }
        }

        debug!("dispatch loop stopped");
    }

    fn execute(&self, runnable: Runnable) {
        let _ = self.shared.panic_handler.execute("dispatch", move || match runnable {
            Runnable::Main(job) => job.call(),
            Runnable::Once(f) => f(),
        });
    }
}

impl fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLoop").finish()
    }
}

/// A dispatcher running on a thread it owns. Dropping it stops and joins
/// the thread.
#[derive(Debug)]
pub struct DispatchThread {
    dispatcher: Dispatcher,
    handle: Option<JoinHandle<()>>,
}

impl DispatchThread {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.dispatcher.shutdown();
        if let Some(handle) = self.handle.take() {
            if !self.dispatcher.is_dispatch_thread() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recording(tx: &mpsc::Sender<&'static str>, label: &'static str) -> MainJob {
        let tx = Mutex::new(tx.clone());
        MainJob::new(move || {
            let _ = tx.lock().send(label);
        })
    }

    #[test]
    fn test_fifo_and_front() {
        let (dispatcher, dispatch_loop) = Dispatcher::new();
        let (tx, rx) = mpsc::channel();
        let tag = Tag::new();

        dispatcher.post_tagged(&tag, recording(&tx, "a"));
        dispatcher.post_tagged(&tag, recording(&tx, "b"));
        dispatcher.post_front(&tag, recording(&tx, "urgent"));

        let _thread = thread::spawn(move || dispatch_loop.run());

        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec!["urgent", "a", "b"]);

        dispatcher.shutdown();
    }

    #[test]
    fn test_delayed_cancel_prevents_run() {
        let worker = Dispatcher::spawn("test-dispatch").unwrap();
        let dispatcher = worker.dispatcher();
        let (tx, rx) = mpsc::channel();
        let tag = Tag::labeled("Y");
        let job = recording(&tx, "delayed");

        dispatcher
            .post_delayed(&tag, job.clone(), Duration::from_millis(100))
            .unwrap();
        assert_eq!(dispatcher.tracked(&tag), 1);
        dispatcher.cancel(&tag, &job);
        assert_eq!(dispatcher.tracked(&tag), 0);

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_delayed_dedup_tracks_once() {
        let (dispatcher, _loop) = Dispatcher::new();
        let tag = Tag::new();
        let job = MainJob::new(|| {});

        dispatcher
            .post_delayed(&tag, job.clone(), Duration::from_secs(10))
            .unwrap();
        dispatcher
            .post_delayed(&tag, job.clone(), Duration::from_secs(10))
            .unwrap();

        assert_eq!(dispatcher.tracked(&tag), 1);
        assert_eq!(dispatcher.pending(), 2);
    }

    #[test]
    fn test_zero_delay_is_invalid() {
        let (dispatcher, _loop) = Dispatcher::new();
        let result = dispatcher.post_delayed(&Tag::new(), MainJob::new(|| {}), Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_overflowing_delay_is_invalid() {
        let (dispatcher, _loop) = Dispatcher::new();
        let tag = Tag::new();
        let result = dispatcher.post_delayed(
            &tag,
            MainJob::new(|| {}),
            Duration::from_secs(u64::MAX),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(dispatcher.tracked(&tag), 0);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_cancel_after_delivery_is_noop() {
        let worker = Dispatcher::spawn("test-dispatch").unwrap();
        let dispatcher = worker.dispatcher();
        let (tx, rx) = mpsc::channel();
        let tag = Tag::new();
        let first = recording(&tx, "first");

        dispatcher.post_tagged(&tag, first.clone());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");
        assert_eq!(dispatcher.tracked(&tag), 0);

        dispatcher.cancel(&tag, &first);
        dispatcher.post_tagged(&tag, recording(&tx, "second"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "second");
    }

    #[test]
    fn test_cancel_all_drops_tag() {
        let (dispatcher, dispatch_loop) = Dispatcher::new();
        let (tx, rx) = mpsc::channel();
        let doomed = Tag::new();
        let kept = Tag::new();

        dispatcher.post_tagged(&doomed, recording(&tx, "doomed-1"));
        dispatcher
            .post_delayed(&doomed, recording(&tx, "doomed-2"), Duration::from_millis(10))
            .unwrap();
        dispatcher.post_tagged(&kept, recording(&tx, "kept"));

        dispatcher.cancel_all(&doomed);
        assert_eq!(dispatcher.tracked(&doomed), 0);

        let _thread = thread::spawn(move || dispatch_loop.run());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "kept");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        dispatcher.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_stop_loop() {
        let worker = Dispatcher::spawn("test-dispatch").unwrap();
        let dispatcher = worker.dispatcher();
        let (tx, rx) = mpsc::channel();

        dispatcher.post(MainJob::new(|| panic!("callback failed")));
        dispatcher.post(recording(&tx, "after"));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "after");
    }

    #[test]
    fn test_runs_on_dispatch_thread() {
        let worker = Dispatcher::spawn("test-dispatch").unwrap();
        let dispatcher = worker.dispatcher().clone();
        let (tx, rx) = mpsc::channel();

        let handle = dispatcher.clone();
        assert!(dispatcher.post_once(move || {
            tx.send(handle.is_dispatch_thread()).unwrap();
        }));

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!dispatcher.is_dispatch_thread());
    }
}
