use std::fmt;
use std::sync::Arc;

/// A reusable callback for the dispatch thread.
///
/// Identity is the allocation: clones of one `MainJob` are the same job, so
/// a clone can be used to cancel what was posted. Two jobs built from equal
/// closures are distinct.
#[derive(Clone)]
pub struct MainJob {
    func: Arc<dyn Fn() + Send + Sync + 'static>,
}

impl MainJob {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    pub(crate) fn call(&self) {
        (self.func)()
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.func) as *const ()
    }
}

impl PartialEq for MainJob {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for MainJob {}

impl fmt::Debug for MainJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MainJob").field(&self.addr()).finish()
    }
}
