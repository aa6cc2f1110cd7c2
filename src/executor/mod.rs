//! Worker pools.
//!
//! Two pools with fixed scheduling classes back all task execution: a small
//! queued background pool and a large interactive pool that hands work
//! straight to a worker or rejects it.

pub mod job;
pub mod panic_handler;
pub mod pool;
pub mod registry;
pub mod worker;

pub use job::{BoxedJob, Job};
pub use panic_handler::{PanicHandler, PanicInfo};
pub use pool::{PoolClass, PoolStats, QueueDiscipline, ThreadPriority, WorkerPool};
pub use registry::WorkerPoolRegistry;

pub(crate) use job::FnJob;
