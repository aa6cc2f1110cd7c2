//! Process-wide context behind the free-function API.

use crate::config::Config;
use crate::context::Context;
use crate::delayed::DelayedJobId;
use crate::dispatch::MainJob;
use crate::error::{Error, Result};
use crate::executor::PoolClass;
use crate::tag::Tag;
use crate::task::{Task, TaskErrorProcessor, TaskHandle};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long [`shutdown`] waits for pool workers to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

static GLOBAL_CONTEXT: RwLock<Option<Arc<Context>>> = RwLock::new(None);

/// Installs a default context with its own dispatch thread.
pub fn init() -> Result<()> {
    init_with_config(Config::default())
}

pub fn init_with_config(config: Config) -> Result<()> {
    let mut global = GLOBAL_CONTEXT.write();
    if global.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let context = Context::with_dispatch_thread(config)?;
    *global = Some(Arc::new(context));
    info!("global context initialized");
    Ok(())
}

/// Installs a context the caller built, e.g. one bound to the host's own
/// dispatch loop.
pub fn install(context: Context) -> Result<Arc<Context>> {
    let mut global = GLOBAL_CONTEXT.write();
    if global.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let context = Arc::new(context);
    *global = Some(context.clone());
    Ok(context)
}

/// The installed context.
pub fn current() -> Result<Arc<Context>> {
    GLOBAL_CONTEXT
        .read()
        .as_ref()
        .cloned()
        .ok_or(Error::NotInitialized)
}

fn with_current<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&Context) -> R,
{
    let context = current()?;
    Ok(f(&context))
}

/// Removes the installed context and shuts it down. A no-op when nothing is
/// installed.
pub fn shutdown() {
    let context = GLOBAL_CONTEXT.write().take();
    if let Some(context) = context {
        context.shutdown(SHUTDOWN_GRACE);
    }
}

pub fn submit_task<T: Task>(tag: &Tag, task: &TaskHandle<T>, class: PoolClass) -> Result<()> {
    current()?.submit_task(tag, task, class)
}

pub fn cancel_task<T: Task>(tag: &Tag, task: &TaskHandle<T>) -> Result<()> {
    with_current(|cx| cx.cancel_task(tag, task))
}

pub fn cancel_all_tasks_for_tag(tag: &Tag) -> Result<usize> {
    with_current(|cx| cx.cancel_all_tasks_for_tag(tag))
}

pub fn execute<F>(class: PoolClass, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    current()?.execute(class, f)
}

pub fn post_on_main_thread(job: MainJob) -> Result<()> {
    with_current(|cx| cx.post_on_main_thread(job))
}

pub fn post_on_main_thread_delayed(tag: &Tag, job: MainJob, delay: Duration) -> Result<()> {
    current()?.post_on_main_thread_delayed(tag, job, delay)
}

pub fn cancel_main_thread_job(tag: &Tag, job: &MainJob) -> Result<()> {
    with_current(|cx| cx.cancel_main_thread_job(tag, job))
}

pub fn cancel_all_main_thread_jobs_for_tag(tag: &Tag) -> Result<()> {
    with_current(|cx| cx.cancel_all_main_thread_jobs_for_tag(tag))
}

pub fn schedule_delayed_task<F>(tag: &Tag, job: F, delay: Duration) -> Result<DelayedJobId>
where
    F: FnOnce() + Send + 'static,
{
    current()?.schedule_delayed_task(tag, job, delay)
}

pub fn cancel_delayed_task(tag: &Tag, id: DelayedJobId) -> Result<bool> {
    with_current(|cx| cx.cancel_delayed_task(tag, id))
}

pub fn cancel_all_delayed_tasks(tag: &Tag) -> Result<usize> {
    with_current(|cx| cx.cancel_all_delayed_tasks(tag))
}

pub fn reset_all_worker_pools() -> Result<usize> {
    with_current(|cx| cx.reset_all_worker_pools())
}

pub fn set_task_error_processor<P>(processor: P) -> Result<()>
where
    P: TaskErrorProcessor + 'static,
{
    with_current(|cx| cx.set_task_error_processor(processor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Tests in this module share the global slot.
    static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_init_twice_fails() {
        let _guard = GLOBAL_LOCK.lock();
        shutdown();

        init().unwrap();
        assert!(matches!(init(), Err(Error::AlreadyInitialized)));

        shutdown();
        assert!(matches!(current(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_custom_config() {
        let _guard = GLOBAL_LOCK.lock();
        shutdown();

        let config = Config::builder()
            .workers(PoolClass::Background, 1, 2)
            .thread_name_prefix("custom")
            .build()
            .unwrap();
        init_with_config(config).unwrap();

        let context = current().unwrap();
        assert_eq!(context.config().background.max_workers, 2);
        assert_eq!(context.config().thread_name_prefix, "custom");

        shutdown();
    }

    #[test]
    fn test_calls_without_context_fail() {
        let _guard = GLOBAL_LOCK.lock();
        shutdown();

        let tag = Tag::new();
        assert!(matches!(
            execute(PoolClass::Background, || {}),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            cancel_all_tasks_for_tag(&tag),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let _guard = GLOBAL_LOCK.lock();
        shutdown();

        init().unwrap();
        let context = current().unwrap();
        shutdown();

        assert!(context.is_shut_down());
        assert!(matches!(
            context.execute(PoolClass::Interactive, || {}),
            Err(Error::ShutDown)
        ));
    }
}
