#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, Sender};
use errand::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Pre,
    Progress(Vec<u32>),
    Finish,
    Success(u32),
    Error(String),
    Cancelled,
}

type Body = dyn Fn(&TaskContext<'_, Scripted>) -> Result<u32, TaskError> + Send + Sync;

/// Task that records every callback it receives.
pub struct Scripted {
    body: Box<Body>,
    events: Arc<Mutex<Vec<Event>>>,
    done: Sender<()>,
    dispatcher: Dispatcher,
    off_dispatch: Arc<AtomicBool>,
    ran: Arc<AtomicBool>,
}

/// Test-side view of a [`Scripted`].
pub struct Recorder {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub done: Receiver<()>,
    pub off_dispatch: Arc<AtomicBool>,
    pub ran: Arc<AtomicBool>,
}

impl Scripted {
    pub fn new<F>(cx: &Context, body: F) -> (TaskHandle<Scripted>, Recorder)
    where
        F: Fn(&TaskContext<'_, Scripted>) -> Result<u32, TaskError> + Send + Sync + 'static,
    {
        let (done_tx, done_rx) = unbounded();
        let events = Arc::new(Mutex::new(Vec::new()));
        let off_dispatch = Arc::new(AtomicBool::new(false));
        let ran = Arc::new(AtomicBool::new(false));

        let scripted = Scripted {
            body: Box::new(body),
            events: events.clone(),
            done: done_tx,
            dispatcher: cx.dispatcher().clone(),
            off_dispatch: off_dispatch.clone(),
            ran: ran.clone(),
        };
        let recorder = Recorder {
            events,
            done: done_rx,
            off_dispatch,
            ran,
        };
        (TaskHandle::new(scripted), recorder)
    }

    fn record(&self, event: Event) {
        if !self.dispatcher.is_dispatch_thread() {
            self.off_dispatch.store(true, Ordering::SeqCst);
        }
        self.events.lock().push(event);
    }
}

impl Task for Scripted {
    type Params = ();
    type Progress = u32;
    type Output = u32;

    fn execute(&self, _params: Vec<()>, cx: &TaskContext<'_, Self>) -> Result<u32, TaskError> {
        self.ran.store(true, Ordering::SeqCst);
        (self.body)(cx)
    }

    fn on_pre_task(&self) {
        self.events.lock().push(Event::Pre);
    }

    fn on_progress_update(&self, values: Vec<u32>) {
        self.record(Event::Progress(values));
    }

    fn on_task_finish(&self) {
        self.record(Event::Finish);
    }

    fn on_task_success(&self, output: u32) {
        self.record(Event::Success(output));
        let _ = self.done.send(());
    }

    fn on_task_error(&self, error: TaskError) -> Result<(), TaskError> {
        self.record(Event::Error(error.to_string()));
        let _ = self.done.send(());
        Err(error)
    }

    fn on_cancelled(&self) {
        self.record(Event::Cancelled);
        let _ = self.done.send(());
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl Recorder {
    /// Waits for the terminal callback and returns everything recorded.
    pub fn wait(&self) -> Vec<Event> {
        self.done
            .recv_timeout(WAIT)
            .expect("task never reached a terminal callback");
        self.events.lock().clone()
    }

    /// Waits long enough for stray callbacks to arrive, then snapshots.
    pub fn settle(&self) -> Vec<Event> {
        std::thread::sleep(Duration::from_millis(150));
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

/// A gate tasks can block on until the test opens it.
pub fn gate() -> (Sender<()>, Receiver<()>) {
    unbounded()
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Routes library logs to the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn context() -> Context {
    context_with(Config::default())
}

pub fn context_with(config: Config) -> Context {
    init_tracing();
    Context::with_dispatch_thread(config).unwrap()
}
