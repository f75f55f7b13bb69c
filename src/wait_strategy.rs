//! Strategies a consumer uses to idle until a sequence becomes available.
//!
//! Every strategy runs the same two phases: wait until the producer cursor
//! reaches the target, then wait until the dependent sequence (the cursor
//! itself, or the slowest upstream stage) reaches it. They differ only in how
//! they pass the time between checks, trading latency against CPU:
//!
//! | strategy                        | latency  | cpu      |
//! |---------------------------------|----------|----------|
//! | [`BusySpinWaitStrategy`]        | lowest   | highest  |
//! | [`YieldingWaitStrategy`]        | low      | high     |
//! | [`SleepingWaitStrategy`]        | moderate | low      |
//! | [`BlockingWaitStrategy`]        | highest  | lowest   |
//! | [`TimeoutBlockingWaitStrategy`] | highest  | lowest   |
//!
//! Each idle step re-checks the barrier's alert flag, so a halted consumer
//! stops waiting without having to be woken by a publish.

use crate::error::{Error, Result};
use crate::sequence::{Sequence, SequenceView};
use crate::sequence_barrier::SequenceBarrier;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::hint;
use std::thread;
use std::time::{Duration, Instant};

/// Policy for idling while a consumer waits for a sequence.
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Waits until `sequence` is available and returns the highest sequence
    /// seen on `dependent`, which may be greater than `sequence`.
    ///
    /// Fails with [`Error::Alert`] as soon as the barrier is alerted, and
    /// with [`Error::Timeout`] if the strategy bounds its wait.
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceView,
        barrier: &SequenceBarrier,
    ) -> Result<i64>;

    /// Wakes every consumer parked in this strategy. A no-op for strategies
    /// that never park.
    fn signal_all_when_blocking(&self);
}

/// Spins on the dependent sequence until it reaches `sequence`, running
/// `idle` between checks.
#[inline]
fn spin_until(
    sequence: i64,
    dependent: &dyn SequenceView,
    barrier: &SequenceBarrier,
    mut idle: impl FnMut(),
) -> Result<i64> {
    loop {
        let available = dependent.get();
        if available >= sequence {
            return Ok(available);
        }
        barrier.check_alert()?;
        idle();
    }
}

/// Pure busy spin with a CPU spin-loop hint.
///
/// Use only when consumers have cores to themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &dyn SequenceView,
        barrier: &SequenceBarrier,
    ) -> Result<i64> {
        spin_until(sequence, dependent, barrier, hint::spin_loop)
    }

    fn signal_all_when_blocking(&self) {}
}

const YIELD_SPIN_TRIES: u32 = 100;

/// Spins for a while, then yields the thread on every further check.
#[derive(Debug, Clone, Copy)]
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    pub const fn new(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new(YIELD_SPIN_TRIES)
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &dyn SequenceView,
        barrier: &SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = self.spin_tries;
        spin_until(sequence, dependent, barrier, || {
            if counter == 0 {
                thread::yield_now();
            } else {
                counter -= 1;
                hint::spin_loop();
            }
        })
    }

    fn signal_all_when_blocking(&self) {}
}

const SLEEP_RETRIES: u32 = 200;
const SLEEP_TIME: Duration = Duration::from_nanos(100);

/// Spins, then yields, then backs off to short sleeps.
///
/// A good compromise when consumers share cores with other work and latency
/// spikes are acceptable.
#[derive(Debug, Clone, Copy)]
pub struct SleepingWaitStrategy {
    retries: u32,
    sleep_time: Duration,
}

impl SleepingWaitStrategy {
    pub const fn new(retries: u32, sleep_time: Duration) -> Self {
        Self {
            retries,
            sleep_time,
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new(SLEEP_RETRIES, SLEEP_TIME)
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &dyn SequenceView,
        barrier: &SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = self.retries;
        let spin_threshold = self.retries / 2;
        spin_until(sequence, dependent, barrier, || {
            if counter > spin_threshold {
                counter -= 1;
                hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                thread::yield_now();
            } else {
                thread::sleep(self.sleep_time);
            }
        })
    }

    fn signal_all_when_blocking(&self) {}
}

/// Parks consumers on a condition variable until a producer publishes.
///
/// Lowest CPU use of all strategies; every publish pays for a lock and a
/// notify.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceView,
        barrier: &SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                self.condvar.wait(&mut guard);
            }
        }

        spin_until(sequence, dependent, barrier, hint::spin_loop)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// A [`BlockingWaitStrategy`] that fails with [`Error::Timeout`] when the
/// cursor does not reach the target within `timeout`.
#[derive(Debug)]
pub struct TimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &dyn SequenceView,
        barrier: &SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let deadline = Instant::now() + self.timeout;
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                if self.condvar.wait_until(&mut guard, deadline).timed_out()
                    && cursor.get() < sequence
                {
                    return Err(Error::Timeout);
                }
            }
        }

        spin_until(sequence, dependent, barrier, hint::spin_loop)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}
