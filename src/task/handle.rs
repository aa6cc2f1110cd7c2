use super::{Cancellable, Task, TaskContext, TaskEnv, TaskId, TaskState};
use crate::error::{Error, Result, TaskError};
use crate::executor::panic_handler;
use crate::executor::{Job, PoolClass, WorkerPoolRegistry};
use crate::tag::Tag;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, trace};

enum Message<T: Task> {
    Progress(Vec<T::Progress>),
    PostExecute(std::result::Result<T::Output, TaskError>),
    Cancelled,
}

pub(crate) struct TaskCore<T: Task> {
    id: TaskId,
    task: T,
    params: Mutex<Option<Vec<T::Params>>>,
    state: AtomicU8,
    cancelled: AtomicBool,
    interrupted: AtomicBool,
    submitted: AtomicBool,
    released: AtomicBool,
    tag: OnceLock<Tag>,
    thread: OnceLock<ThreadId>,
    env: OnceLock<TaskEnv>,
}

impl<T: Task> TaskCore<T> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn cancel(&self, interrupt: bool) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if interrupt && !self.interrupted.swap(true, Ordering::AcqRel) {
            self.task.close_resources();
        }
        trace!(task = %self.id, interrupt, "task cancelled");
    }

    fn post(self: &Arc<Self>, message: Message<T>) {
        let Some(env) = self.env.get() else {
            return;
        };
        let terminal = !matches!(message, Message::Progress(_));
        let core = self.clone();
        if env.dispatcher.post_once(move || core.handle_message(message)) {
            return;
        }

        debug!(task = %self.id, terminal, "dispatcher shut down, dropping task message");
        // Nothing will deliver the outcome, so end the submission here.
        if terminal {
            self.release();
            self.set_state(TaskState::Finished);
        }
    }

    pub(crate) fn publish_progress(self: &Arc<Self>, values: Vec<T::Progress>) {
        if !self.is_cancelled() {
            self.post(Message::Progress(values));
        }
    }

    /// Drops the tag bookkeeping. Returns `false` if it was already dropped.
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let (Some(env), Some(tag)) = (self.env.get(), self.tag.get()) {
            env.registry.unregister(tag, self.id);
        }
        true
    }

    /// Ends a submission without a result: deregisters and queues the
    /// cancelled notification, at most once.
    fn finish_cancelled(self: &Arc<Self>) {
        if self.env.get().is_none() || !self.release() {
            return;
        }
        self.set_state(TaskState::Cancelled);
        self.post(Message::Cancelled);
    }

    fn run(self: Arc<Self>) {
        let debug = self.env.get().map_or(false, |env| env.debug);
        trace!(
            task = %self.id,
            name = self.task.name(),
            thread = thread::current().name().unwrap_or("unnamed"),
            "task run"
        );

        if self.is_interrupted() || self.is_cancelled() {
            self.finish_cancelled();
            return;
        }

        self.set_state(TaskState::Running);
        let _ = self.thread.set(thread::current().id());
        let params = self.params.lock().take().unwrap_or_default();
        let start = Instant::now();

        let cx = TaskContext {
            core: &self,
            id: self.id,
        };
        let result = panic_handler::catch(|| self.task.execute(params, &cx))
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic.message)));

        if debug {
            debug!(
                task = %self.id,
                name = self.task.name(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "task executed"
            );
        }

        if self.is_interrupted() {
            if debug {
                debug!(task = %self.id, "task interrupted during execution");
            }
            self.finish_cancelled();
            return;
        }

        self.post(Message::PostExecute(result));
    }

    fn handle_message(self: &Arc<Self>, message: Message<T>) {
        match message {
            Message::Progress(values) => {
                if !self.is_interrupted() {
                    self.task.on_progress_update(values);
                }
            }
            Message::PostExecute(result) => {
                if self.is_interrupted() {
                    self.finish_cancelled();
                } else if self.release() {
                    self.post_execute(result);
                }
            }
            Message::Cancelled => {
                self.task.on_cancelled();
                self.set_state(TaskState::Finished);
            }
        }
    }

    fn post_execute(&self, result: std::result::Result<T::Output, TaskError>) {
        self.set_state(if result.is_ok() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        });
        self.task.on_task_finish();

        match result {
            Ok(output) => self.task.on_task_success(output),
            Err(error) => {
                if let Err(error) = self.task.on_task_error(error) {
                    if let Some(env) = self.env.get() {
                        env.errors.report(self.task.name(), &error);
                    }
                }
            }
        }
        self.set_state(TaskState::Finished);
    }
}

impl<T: Task> Cancellable for TaskCore<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn cancel(&self, interrupt: bool) {
        TaskCore::cancel(self, interrupt);
    }
}

struct TaskJob<T: Task> {
    core: Arc<TaskCore<T>>,
}

impl<T: Task> Job for TaskJob<T> {
    fn run(self: Box<Self>) {
        self.core.run();
    }

    fn abandon(self: Box<Self>) {
        self.core.cancel(true);
        self.core.finish_cancelled();
    }

    fn name(&self) -> &str {
        self.core.task.name()
    }
}

/// Shared handle to a task.
///
/// A handle can be submitted once; clones refer to the same task.
pub struct TaskHandle<T: Task> {
    core: Arc<TaskCore<T>>,
}

impl<T: Task> TaskHandle<T> {
    pub fn new(task: T) -> Self {
        Self::with_params(task, Vec::new())
    }

    pub fn with_params(task: T, params: Vec<T::Params>) -> Self {
        Self {
            core: Arc::new(TaskCore {
                id: TaskId::next(),
                task,
                params: Mutex::new(Some(params)),
                state: AtomicU8::new(TaskState::Created as u8),
                cancelled: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                submitted: AtomicBool::new(false),
                released: AtomicBool::new(false),
                tag: OnceLock::new(),
                thread: OnceLock::new(),
                env: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.core.id
    }

    pub fn task(&self) -> &T {
        &self.core.task
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.core.state.load(Ordering::Acquire))
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    pub fn is_interrupted(&self) -> bool {
        self.core.is_interrupted()
    }

    /// The tag the task was submitted under.
    pub fn tag(&self) -> Option<&Tag> {
        self.core.tag.get()
    }

    /// The worker thread the body ran on, once it has started.
    pub fn executed_on(&self) -> Option<ThreadId> {
        self.core.thread.get().copied()
    }

    /// Marks the task cancelled; with `interrupt`, also suppresses its result
    /// in favour of [`Task::on_cancelled`]. Never stops a running body.
    /// Only the first call has any effect.
    pub fn cancel(&self, interrupt: bool) {
        self.core.cancel(interrupt);
    }
}

impl<T: Task> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Task> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.core.id)
            .field("name", &self.core.task.name())
            .field("state", &self.state())
            .field("tag", &self.core.tag.get())
            .finish()
    }
}

/// Runs `on_pre_task`, registers the task under `tag` and hands it to the
/// pool for `class`.
pub(crate) fn submit<T: Task>(
    env: &TaskEnv,
    pools: &WorkerPoolRegistry,
    tag: &Tag,
    handle: &TaskHandle<T>,
    class: PoolClass,
) -> Result<()> {
    let core = &handle.core;
    if core.submitted.swap(true, Ordering::AcqRel) {
        return Err(Error::invalid_argument(format!(
            "task {} already submitted",
            core.id
        )));
    }

    core.set_state(TaskState::Pre);
    core.task.on_pre_task();

    let _ = core.tag.set(tag.clone());
    let _ = core.env.set(env.clone());

    if env.debug {
        debug!(
            task = %core.id,
            name = core.task.name(),
            %tag,
            pool = %class,
            thread = thread::current().name().unwrap_or("unnamed"),
            "task submitted"
        );
    }

    env.registry.register(tag, core.clone());
    pools.submit(class, Box::new(TaskJob { core: core.clone() }))
}
