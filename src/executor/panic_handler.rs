use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::error;

/// Contains panics from jobs and callbacks so the thread running them
/// survives. Each caught panic is logged and counted.
#[derive(Debug, Default)]
pub struct PanicHandler {
    panic_count: AtomicUsize,
}

impl PanicHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute<F, R>(&self, context: &str, f: F) -> Result<R, PanicInfo>
    where
        F: FnOnce() -> R,
    {
        catch(f).map_err(|panic_info| {
            self.panic_count.fetch_add(1, Ordering::Relaxed);
            error!(context, panic = %panic_info.message, "caught panic");
            panic_info
        })
    }

    pub fn panic_count(&self) -> usize {
        self.panic_count.load(Ordering::Relaxed)
    }
}

/// Runs `f`, turning an unwinding panic into a [`PanicInfo`].
pub fn catch<F, R>(f: F) -> Result<R, PanicInfo>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(PanicInfo::from_payload)
}

#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        Self { message }
    }
}
