//! Units of work accepted by the worker pools.

/// Work a pool can run.
///
/// A pool calls exactly one of `run` or `abandon` for every job it is
/// handed: `abandon` when the job is rejected at admission or discarded from
/// the queue by a shutdown.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>);

    fn abandon(self: Box<Self>) {}

    fn name(&self) -> &str {
        "job"
    }
}

pub type BoxedJob = Box<dyn Job>;

/// Adapts a closure into a [`Job`] that ignores abandonment.
pub(crate) struct FnJob<F> {
    func: F,
}

impl<F> FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    pub(crate) fn boxed(func: F) -> BoxedJob {
        Box::new(FnJob { func })
    }
}

impl<F> Job for FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (self.func)();
    }

    fn name(&self) -> &str {
        "closure"
    }
}
