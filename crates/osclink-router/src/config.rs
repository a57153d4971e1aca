//! Router configuration

use std::time::Duration;

/// What happens to per-binding validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    /// Log each failure and carry on
    #[default]
    Log,
    /// Deliver to every binding, then return the failures to the caller
    Propagate,
}

/// Bundle scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on a single wait, so wall-clock adjustments are noticed
    pub max_wait: Duration,
    /// Name of the worker thread
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(50),
            thread_name: "osclink-scheduler".to_string(),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum bundle nesting processed inline
    pub max_bundle_depth: usize,
    pub validation: ValidationPolicy,
    pub scheduler: SchedulerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_bundle_depth: 64,
            validation: ValidationPolicy::Log,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Configuration that returns validation failures from `dispatch`
    pub fn propagating() -> Self {
        Self {
            validation: ValidationPolicy::Propagate,
            ..Default::default()
        }
    }
}
