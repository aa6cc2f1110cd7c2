use crate::executor::PoolClass;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error carried by a failed task body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{class} pool saturated: all {max_workers} workers busy")]
    PoolSaturated { class: PoolClass, max_workers: usize },

    #[error("{class} pool overloaded: {active} active workers (threshold {threshold})")]
    Overloaded {
        class: PoolClass,
        active: usize,
        threshold: usize,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("context not initialized")]
    NotInitialized,

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("context has been shut down")]
    ShutDown,

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

/// Failure produced by a task body, delivered to `on_task_error` on the
/// dispatch thread.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(#[source] BoxError),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TaskError::Failed(Box::new(err))
    }

    pub fn msg<S: Into<String>>(msg: S) -> Self {
        TaskError::Failed(msg.into().into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::new(err)
    }
}

impl From<BoxError> for TaskError {
    fn from(err: BoxError) -> Self {
        TaskError::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_message() {
        let err = Error::PoolSaturated {
            class: PoolClass::Interactive,
            max_workers: 50,
        };
        assert_eq!(
            err.to_string(),
            "interactive pool saturated: all 50 workers busy"
        );
    }

    #[test]
    fn test_task_error_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = TaskError::from(io);
        assert!(!err.is_panic());
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk gone".into()));

        let err = TaskError::msg("bad input");
        assert_eq!(err.to_string(), "task failed: bad input");
    }
}
