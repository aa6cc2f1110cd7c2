//! Tagged, cancellable tasks.
//!
//! A [`Task`] body runs on a pool worker; everything the caller observes
//! (progress, result, cancellation) is delivered on the dispatch thread in
//! the order it was produced. Cancellation is cooperative: the framework
//! checks the interrupt flag right before and right after the body runs,
//! and long bodies should poll [`TaskContext::is_cancelled`] themselves.

mod handle;
pub mod registry;

pub use handle::TaskHandle;
pub use registry::{Cancellable, TaskRegistry};

pub(crate) use handle::submit;

use crate::dispatch::Dispatcher;
use crate::error::TaskError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Pre = 1,
    Running = 2,
    Succeeded = 3,
    Failed = 4,
    Cancelled = 5,
    Finished = 6,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Pre,
            2 => TaskState::Running,
            3 => TaskState::Succeeded,
            4 => TaskState::Failed,
            5 => TaskState::Cancelled,
            _ => TaskState::Finished,
        }
    }
}

/// A unit of background work with callbacks on the dispatch thread.
///
/// Only [`execute`](Task::execute) runs on a worker. `on_pre_task` runs on
/// the submitting thread; every other hook runs on the dispatch thread.
pub trait Task: Sized + Send + Sync + 'static {
    type Params: Send + 'static;
    type Progress: Send + 'static;
    type Output: Send + 'static;

    fn execute(
        &self,
        params: Vec<Self::Params>,
        cx: &TaskContext<'_, Self>,
    ) -> Result<Self::Output, TaskError>;

    fn on_pre_task(&self) {}

    fn on_progress_update(&self, _values: Vec<Self::Progress>) {}

    /// Runs before the success or error callback.
    fn on_task_finish(&self) {}

    fn on_task_success(&self, _output: Self::Output) {}

    /// Handles a failure. Returning the error hands it on to the context's
    /// task error processor.
    fn on_task_error(&self, error: TaskError) -> Result<(), TaskError> {
        Err(error)
    }

    fn on_cancelled(&self) {}

    /// Called once when the task is cancelled with interruption, from the
    /// cancelling thread. Release sockets or other in-flight resources here.
    fn close_resources(&self) {}

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// View of the running task handed to [`Task::execute`].
pub struct TaskContext<'a, T: Task> {
    core: &'a Arc<handle::TaskCore<T>>,
    id: TaskId,
}

impl<'a, T: Task> TaskContext<'a, T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Sends progress to [`Task::on_progress_update`]. Dropped once the task
    /// is cancelled.
    pub fn publish_progress(&self, values: Vec<T::Progress>) {
        self.core.publish_progress(values);
    }
}

impl<'a, T: Task> fmt::Debug for TaskContext<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext").field("id", &self.id).finish()
    }
}

/// Receives task failures that the task itself did not handle.
pub trait TaskErrorProcessor: Send + Sync {
    fn process_task_error(&self, task: &str, error: &TaskError);
}

impl<F> TaskErrorProcessor for F
where
    F: Fn(&str, &TaskError) + Send + Sync,
{
    fn process_task_error(&self, task: &str, error: &TaskError) {
        self(task, error)
    }
}

/// Single slot holding the installed error processor.
#[derive(Default)]
pub(crate) struct ErrorProcessorSlot {
    processor: RwLock<Option<Arc<dyn TaskErrorProcessor>>>,
}

impl ErrorProcessorSlot {
    pub(crate) fn set(&self, processor: Option<Arc<dyn TaskErrorProcessor>>) {
        *self.processor.write() = processor;
    }

    pub(crate) fn report(&self, task: &str, error: &TaskError) {
        let processor = self.processor.read().clone();
        match processor {
            Some(processor) => processor.process_task_error(task, error),
            None => warn!(task, %error, "unhandled task error"),
        }
    }
}

/// What a submitted task needs from its context.
#[derive(Clone)]
pub(crate) struct TaskEnv {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) errors: Arc<ErrorProcessorSlot>,
    pub(crate) debug: bool,
}
