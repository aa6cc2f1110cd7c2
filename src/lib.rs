//! errand - tagged, cancellable background tasks
//!
//! Tasks run on one of two worker pools and report back on a single
//! dispatch thread. Every submission carries a [`Tag`]; cancelling a tag
//! cancels everything registered under it.
//!
//! # Quick Start
//!
//! ```no_run
//! use errand::prelude::*;
//!
//! struct Fetch;
//!
//! impl Task for Fetch {
//!     type Params = String;
//!     type Progress = u32;
//!     type Output = usize;
//!
//!     fn execute(&self, urls: Vec<String>, cx: &TaskContext<'_, Self>) -> Result<usize, TaskError> {
//!         cx.publish_progress(vec![50]);
//!         Ok(urls.len())
//!     }
//!
//!     fn on_task_success(&self, count: usize) {
//!         println!("fetched {count}");
//!     }
//! }
//!
//! errand::init().unwrap();
//!
//! let screen = Tag::labeled("screen");
//! let task = TaskHandle::with_params(Fetch, vec!["a".into(), "b".into()]);
//! errand::submit_task(&screen, &task, PoolClass::Interactive).unwrap();
//!
//! // Leaving the screen:
//! errand::cancel_all_tasks_for_tag(&screen).unwrap();
//! errand::shutdown();
//! ```
//!
//! # Pools
//!
//! - **Background**: 1 to 3 low-priority workers over an unbounded FIFO.
//! - **Interactive**: 10 to 50 high-priority workers with direct hand-off;
//!   submissions beyond that are rejected.
//!
//! Callbacks never run on a worker. Hosts that own their event loop build a
//! [`Context`] around their own [`Dispatcher`]; everyone else calls
//! [`init`] and gets a dedicated dispatch thread.

#![warn(missing_debug_implementations)]

pub mod config;
pub mod context;
pub mod delayed;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod runtime;
pub mod scope;
pub mod tag;
pub mod task;

pub use config::{Config, ConfigBuilder, OverloadPolicy, PoolConfig};
pub use context::Context;
pub use delayed::{DelayedJobId, DelayedTaskRegistry};
pub use dispatch::{DispatchLoop, DispatchThread, Dispatcher, MainJob};
pub use error::{Error, Result, TaskError};
pub use executor::{PoolClass, PoolStats};
pub use runtime::{
    cancel_all_delayed_tasks, cancel_all_main_thread_jobs_for_tag, cancel_all_tasks_for_tag,
    cancel_delayed_task, cancel_main_thread_job, cancel_task, current, execute, init,
    init_with_config, install, post_on_main_thread, post_on_main_thread_delayed,
    reset_all_worker_pools, schedule_delayed_task, set_task_error_processor, shutdown,
    submit_task,
};
pub use scope::TagScope;
pub use tag::Tag;
pub use task::{Task, TaskContext, TaskErrorProcessor, TaskHandle, TaskId, TaskState};
