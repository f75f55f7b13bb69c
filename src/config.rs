//! Serializable description of a ring buffer.

use crate::error::{Error, Result};
use crate::wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Whether one or many threads publish to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerType {
    Single,
    #[default]
    Multi,
}

/// Which [`WaitStrategy`] consumers idle with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitStrategyKind {
    BusySpin,
    Yielding,
    Sleeping,
    #[default]
    Blocking,
    /// Blocking, but waits give up after `timeout_micros`.
    Timeout { timeout_micros: u64 },
}

impl WaitStrategyKind {
    pub fn build(&self) -> Arc<dyn WaitStrategy> {
        match *self {
            WaitStrategyKind::BusySpin => Arc::new(BusySpinWaitStrategy),
            WaitStrategyKind::Yielding => Arc::new(YieldingWaitStrategy::default()),
            WaitStrategyKind::Sleeping => Arc::new(SleepingWaitStrategy::default()),
            WaitStrategyKind::Blocking => Arc::new(BlockingWaitStrategy::new()),
            WaitStrategyKind::Timeout { timeout_micros } => Arc::new(
                TimeoutBlockingWaitStrategy::new(Duration::from_micros(timeout_micros)),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufferConfig {
    /// Number of slots. Must be a power of two.
    pub capacity: usize,
    pub producer_type: ProducerType,
    pub wait_strategy: WaitStrategyKind,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            producer_type: ProducerType::default(),
            wait_strategy: WaitStrategyKind::default(),
        }
    }
}

impl RingBufferConfig {
    /// Checks everything that construction would reject.
    pub fn validate(&self) -> Result<()> {
        if !self.capacity.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "capacity must be a power of 2, got {}",
                self.capacity
            )));
        }
        if let WaitStrategyKind::Timeout { timeout_micros: 0 } = self.wait_strategy {
            return Err(Error::invalid_argument("timeout must be greater than zero"));
        }
        Ok(())
    }
}
