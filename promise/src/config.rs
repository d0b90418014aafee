use serde::{Deserialize, Serialize};

/// Tuning knobs for a [`PromiseRuntime`](crate::PromiseRuntime).
///
/// # Example
///
/// ```
/// use redlilium_promise::{PromiseRuntime, RuntimeConfig};
///
/// let runtime = PromiseRuntime::with_config(
///     RuntimeConfig::default().with_pass_through_pool_capacity(1024),
/// );
/// assert_eq!(runtime.config().pass_through_pool_capacity, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of idle pass-through bridges kept for reuse.
    pub pass_through_pool_capacity: usize,
    /// Number of promise slots reserved up front.
    pub slot_capacity_hint: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pass_through_pool_capacity: 256,
            slot_capacity_hint: 64,
        }
    }
}

impl RuntimeConfig {
    /// Sets [`pass_through_pool_capacity`](Self::pass_through_pool_capacity).
    pub fn with_pass_through_pool_capacity(mut self, capacity: usize) -> Self {
        self.pass_through_pool_capacity = capacity;
        self
    }

    /// Sets [`slot_capacity_hint`](Self::slot_capacity_hint).
    pub fn with_slot_capacity_hint(mut self, hint: usize) -> Self {
        self.slot_capacity_hint = hint;
        self
    }
}

/// Tuning knobs for a [`FrameScheduler`](crate::FrameScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity each of a processor's three buffers starts with.
    pub initial_queue_capacity: usize,
    /// Number of yield-instruction runner slots reserved up front.
    pub runner_pool_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_queue_capacity: 16,
            runner_pool_capacity: 32,
        }
    }
}

impl SchedulerConfig {
    /// Sets [`initial_queue_capacity`](Self::initial_queue_capacity).
    pub fn with_initial_queue_capacity(mut self, capacity: usize) -> Self {
        self.initial_queue_capacity = capacity;
        self
    }

    /// Sets [`runner_pool_capacity`](Self::runner_pool_capacity).
    pub fn with_runner_pool_capacity(mut self, capacity: usize) -> Self {
        self.runner_pool_capacity = capacity;
        self
    }
}
