use crate::config::Config;
use crate::delayed::{DelayedJobId, DelayedTaskRegistry};
use crate::dispatch::{DispatchThread, Dispatcher, MainJob};
use crate::error::{Error, Result};
use crate::executor::{FnJob, PoolClass, PoolStats, WorkerPoolRegistry};
use crate::scope::TagScope;
use crate::tag::Tag;
use crate::task::{
    self, ErrorProcessorSlot, Task, TaskEnv, TaskErrorProcessor, TaskHandle, TaskRegistry,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything tasks and main-thread jobs share: configuration, the
/// dispatcher, both worker pools and the tag registries.
///
/// Contexts are independent of each other, so tests can run several side by
/// side. An application usually installs one with [`crate::init`].
pub struct Context {
    config: Arc<Config>,
    dispatcher: Dispatcher,
    dispatch_thread: Option<DispatchThread>,
    pools: WorkerPoolRegistry,
    tasks: Arc<TaskRegistry>,
    delayed: DelayedTaskRegistry,
    errors: Arc<ErrorProcessorSlot>,
    shut_down: AtomicBool,
}

impl Context {
    /// Builds a context whose callbacks go to `dispatcher`. The host is
    /// responsible for running the matching dispatch loop.
    pub fn new(config: Config, dispatcher: Dispatcher) -> Result<Self> {
        Self::build(config, dispatcher, None)
    }

    /// Builds a context with its own dispatch thread.
    pub fn with_dispatch_thread(config: Config) -> Result<Self> {
        let thread = Dispatcher::spawn(format!("{}-dispatch", config.thread_name_prefix))?;
        let dispatcher = thread.dispatcher().clone();
        Self::build(config, dispatcher, Some(thread))
    }

    fn build(
        config: Config,
        dispatcher: Dispatcher,
        dispatch_thread: Option<DispatchThread>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        Ok(Self {
            pools: WorkerPoolRegistry::new(config.clone()),
            delayed: DelayedTaskRegistry::new(config.thread_name_prefix.clone()),
            config,
            dispatcher,
            dispatch_thread,
            tasks: Arc::new(TaskRegistry::new()),
            errors: Arc::new(ErrorProcessorSlot::default()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn task_registry(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn delayed_registry(&self) -> &DelayedTaskRegistry {
        &self.delayed
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        Ok(())
    }

    fn task_env(&self) -> TaskEnv {
        TaskEnv {
            dispatcher: self.dispatcher.clone(),
            registry: self.tasks.clone(),
            errors: self.errors.clone(),
            debug: self.config.debug,
        }
    }

    /// Submits `task` under `tag` to the pool for `class`.
    ///
    /// `on_pre_task` runs before this returns. If the pool rejects the task
    /// it is cancelled, still receives `on_cancelled`, and
    /// [`Error::PoolSaturated`] is returned.
    pub fn submit_task<T: Task>(
        &self,
        tag: &Tag,
        handle: &TaskHandle<T>,
        class: PoolClass,
    ) -> Result<()> {
        self.ensure_running()?;
        task::submit(&self.task_env(), &self.pools, tag, handle, class)
    }

    pub fn submit_interactive<T: Task>(&self, tag: &Tag, task: &TaskHandle<T>) -> Result<()> {
        self.submit_task(tag, task, PoolClass::Interactive)
    }

    pub fn submit_background<T: Task>(&self, tag: &Tag, task: &TaskHandle<T>) -> Result<()> {
        self.submit_task(tag, task, PoolClass::Background)
    }

    /// Runs a closure on a pool with no callbacks and no tag.
    pub fn execute<F>(&self, class: PoolClass, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        self.pools.submit(class, FnJob::boxed(f))
    }

    /// Cancels one task with interruption and stops tracking it.
    pub fn cancel_task<T: Task>(&self, tag: &Tag, task: &TaskHandle<T>) {
        task.cancel(true);
        self.tasks.unregister(tag, task.id());
    }

    /// Cancels, with interruption, every task registered under `tag`.
    ///
    /// Called on the dispatch thread, no success or error callback for those
    /// tasks runs afterwards. Called from another thread, a result that the
    /// dispatch thread is already delivering can still complete.
    pub fn cancel_all_tasks_for_tag(&self, tag: &Tag) -> usize {
        self.tasks.cancel_all(tag)
    }

    pub fn post_on_main_thread(&self, job: MainJob) {
        self.dispatcher.post(job);
    }

    pub fn post_on_main_thread_tagged(&self, tag: &Tag, job: MainJob) {
        self.dispatcher.post_tagged(tag, job);
    }

    pub fn post_on_main_thread_front(&self, tag: &Tag, job: MainJob) {
        self.dispatcher.post_front(tag, job);
    }

    pub fn post_on_main_thread_delayed(
        &self,
        tag: &Tag,
        job: MainJob,
        delay: Duration,
    ) -> Result<()> {
        self.dispatcher.post_delayed(tag, job, delay)
    }

    pub fn cancel_main_thread_job(&self, tag: &Tag, job: &MainJob) {
        self.dispatcher.cancel(tag, job);
    }

    pub fn cancel_all_main_thread_jobs_for_tag(&self, tag: &Tag) {
        self.dispatcher.cancel_all(tag);
    }

    /// Runs `job` off the dispatch thread once `delay` has elapsed.
    pub fn schedule_delayed_task<F>(
        &self,
        tag: &Tag,
        job: F,
        delay: Duration,
    ) -> Result<DelayedJobId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        self.delayed.schedule(tag, job, delay)
    }

    pub fn cancel_delayed_task(&self, tag: &Tag, id: DelayedJobId) -> bool {
        self.delayed.cancel(tag, id)
    }

    pub fn cancel_all_delayed_tasks(&self, tag: &Tag) -> usize {
        self.delayed.cancel_all(tag)
    }

    /// Shuts down both pools, discarding queued tasks (each is cancelled and
    /// notified). The next submission creates fresh pools.
    pub fn reset_all_worker_pools(&self) -> usize {
        self.pools.reset_all()
    }

    pub fn pool_stats(&self, class: PoolClass) -> Option<PoolStats> {
        self.pools.stats(class)
    }

    /// Installs the processor for task errors that tasks do not handle.
    pub fn set_task_error_processor<P>(&self, processor: P)
    where
        P: TaskErrorProcessor + 'static,
    {
        self.errors.set(Some(Arc::new(processor)));
    }

    pub fn clear_task_error_processor(&self) {
        self.errors.set(None);
    }

    /// Ties `tag` to a scope: when the returned guard drops, every task,
    /// main-thread job and delayed job under the tag is cancelled.
    pub fn scope(&self, tag: Tag) -> TagScope<'_> {
        TagScope::new(self, tag)
    }

    /// Cancels everything under `tag` across all registries.
    pub fn release_tag(&self, tag: &Tag) {
        self.cancel_all_tasks_for_tag(tag);
        self.cancel_all_main_thread_jobs_for_tag(tag);
        self.cancel_all_delayed_tasks(tag);
    }

    /// Stops accepting work, stops waiting delayed jobs, shuts the pools
    /// down and waits up to `timeout` for their workers. A dispatch thread
    /// owned by this context is stopped when the context drops.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        let stopped = self.delayed.cancel_everything();
        let terminated = self.pools.shutdown(timeout);
        info!(delayed_stopped = stopped, terminated, "context shut down");
        terminated
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("owns_dispatch_thread", &self.dispatch_thread.is_some())
            .field("tasks", &self.tasks)
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}
