//! Process-wide configuration, read once at startup.
//!
//! Mirrors the teacher's pattern of small, `Default`-able option structs
//! (`lib::log::ProcessorInfo`, `lib::scheduler::ProcessorLog::new`) rather
//! than a global mutable singleton.

const DEFAULT_MAX_ACTIVITY_POOL_SIZE: usize = 20;
const DEFAULT_MAX_ACTIVITY_RETRY: u32 = 5;

/// Recognised configuration options (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Cap on parallel workers in the priority pool.
    pub max_activity_pool_size: usize,
    /// Retry cap inside `Task::execute`.
    pub max_activity_retry: u32,
    /// Enables verbose tracing and DOT-graph dumps before each pass.
    pub debug_operations_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_activity_pool_size: DEFAULT_MAX_ACTIVITY_POOL_SIZE,
            max_activity_retry: DEFAULT_MAX_ACTIVITY_RETRY,
            debug_operations_enabled: false,
        }
    }
}

impl SchedulerConfig {
    /// Reads `ACTIVITY_SCHEDULER_MAX_POOL_SIZE`, `ACTIVITY_SCHEDULER_MAX_RETRY`
    /// and `ACTIVITY_SCHEDULER_DEBUG` from the environment, falling back to
    /// the documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_activity_pool_size: std::env::var("ACTIVITY_SCHEDULER_MAX_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_activity_pool_size),
            max_activity_retry: std::env::var("ACTIVITY_SCHEDULER_MAX_RETRY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_activity_retry),
            debug_operations_enabled: std::env::var("ACTIVITY_SCHEDULER_DEBUG")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.debug_operations_enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_spec() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_activity_pool_size, 20);
        assert_eq!(config.max_activity_retry, 5);
        assert!(!config.debug_operations_enabled);
    }
}
