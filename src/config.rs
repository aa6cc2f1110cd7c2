use crate::error::{Error, Result};
use crate::executor::{PoolClass, QueueDiscipline, ThreadPriority};
use std::time::Duration;

/// What happens when an interactive pool crosses its saturation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadPolicy {
    /// Log the condition at error level and keep going.
    Report,
    /// Return [`Error::Overloaded`] to the submitter. The task that tripped
    /// the check has already been admitted and still runs.
    Fail,
    /// Treat it as a fatal invariant violation and abort the process.
    Abort,
}

impl Default for OverloadPolicy {
    fn default() -> Self {
        OverloadPolicy::Report
    }
}

/// Sizing and scheduling of one worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue: QueueDiscipline,
    pub keep_alive: Duration,
    pub priority: ThreadPriority,
    /// Active-worker count above which the overload policy fires.
    pub overload_threshold: Option<usize>,
}

impl PoolConfig {
    pub fn background() -> Self {
        Self {
            min_workers: 1,
            max_workers: 3,
            queue: QueueDiscipline::Unbounded,
            keep_alive: Duration::from_secs(60),
            priority: ThreadPriority::Min,
            overload_threshold: None,
        }
    }

    pub fn interactive() -> Self {
        Self {
            min_workers: 10,
            max_workers: 50,
            queue: QueueDiscipline::Handoff,
            keep_alive: Duration::from_secs(60),
            priority: ThreadPriority::Max,
            overload_threshold: Some(45),
        }
    }

    fn validate(&self, class: PoolClass) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config(format!("{class} pool: max_workers must be > 0")));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::config(format!(
                "{class} pool: min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.keep_alive.is_zero() {
            return Err(Error::config(format!("{class} pool: keep_alive must be > 0")));
        }
        if let Some(threshold) = self.overload_threshold {
            if threshold > self.max_workers {
                return Err(Error::config(format!(
                    "{class} pool: overload_threshold ({threshold}) exceeds max_workers ({})",
                    self.max_workers
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub background: PoolConfig,
    pub interactive: PoolConfig,
    pub overload_policy: OverloadPolicy,
    /// Emit verbose timing and pool-size diagnostics.
    pub debug: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            background: PoolConfig::background(),
            interactive: PoolConfig::interactive(),
            overload_policy: OverloadPolicy::default(),
            debug: false,
            stack_size: None,
            thread_name_prefix: "errand".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        self.background.validate(PoolClass::Background)?;
        self.interactive.validate(PoolClass::Interactive)?;

        if let Some(size) = self.stack_size {
            if size < 16 * 1024 {
                return Err(Error::config("stack_size too small (min 16 KiB)"));
            }
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    pub fn pool(&self, class: PoolClass) -> &PoolConfig {
        match class {
            PoolClass::Background => &self.background,
            PoolClass::Interactive => &self.interactive,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn background(mut self, pool: PoolConfig) -> Self {
        self.config.background = pool;
        self
    }

    pub fn interactive(mut self, pool: PoolConfig) -> Self {
        self.config.interactive = pool;
        self
    }

    pub fn workers(mut self, class: PoolClass, min: usize, max: usize) -> Self {
        let pool = match class {
            PoolClass::Background => &mut self.config.background,
            PoolClass::Interactive => &mut self.config.interactive,
        };
        pool.min_workers = min;
        pool.max_workers = max;
        if let Some(threshold) = pool.overload_threshold {
            pool.overload_threshold = Some(threshold.min(max));
        }
        self
    }

    pub fn overload_threshold(mut self, class: PoolClass, threshold: Option<usize>) -> Self {
        match class {
            PoolClass::Background => self.config.background.overload_threshold = threshold,
            PoolClass::Interactive => self.config.interactive.overload_threshold = threshold,
        }
        self
    }

    pub fn overload_policy(mut self, policy: OverloadPolicy) -> Self {
        self.config.overload_policy = policy;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pools() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.background.min_workers, 1);
        assert_eq!(config.background.max_workers, 3);
        assert_eq!(config.background.queue, QueueDiscipline::Unbounded);
        assert_eq!(config.background.priority, ThreadPriority::Min);

        assert_eq!(config.interactive.min_workers, 10);
        assert_eq!(config.interactive.max_workers, 50);
        assert_eq!(config.interactive.queue, QueueDiscipline::Handoff);
        assert_eq!(config.interactive.priority, ThreadPriority::Max);
        assert_eq!(config.interactive.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_builder_rejects_inverted_bounds() {
        let result = Config::builder()
            .workers(PoolClass::Background, 4, 2)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_clamps_threshold_to_max() {
        let config = Config::builder()
            .workers(PoolClass::Interactive, 1, 4)
            .build()
            .unwrap();
        assert_eq!(config.interactive.overload_threshold, Some(4));
    }

    #[test]
    fn test_threshold_above_max_is_invalid() {
        let result = Config::builder()
            .overload_threshold(PoolClass::Background, Some(10))
            .build();
        assert!(result.is_err());
    }
}
