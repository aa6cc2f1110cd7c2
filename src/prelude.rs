pub use crate::config::{Config, ConfigBuilder, OverloadPolicy};
pub use crate::context::Context;
pub use crate::dispatch::{Dispatcher, MainJob};
pub use crate::error::{Error, Result, TaskError};
pub use crate::executor::PoolClass;
pub use crate::scope::TagScope;
pub use crate::tag::Tag;
pub use crate::task::{Task, TaskContext, TaskHandle, TaskState};

pub use crate::{init, init_with_config, shutdown};
