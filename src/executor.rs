//! Where processors run.
//!
//! Processors are plain blocking loops; an [`Executor`] decides which thread
//! each one gets. [`ThreadExecutor`] starts a dedicated OS thread per
//! processor, [`TokioExecutor`] borrows threads from a tokio runtime's
//! blocking pool.

use crate::error::{Error, Result};
use crate::event_processor::{EventProcessor, ProcessorHandle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use tokio::runtime::Handle;
use tracing::{error, warn};

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks concurrently with the caller.
pub trait Executor: Send + Sync {
    /// Starts `task` and returns without waiting for it.
    fn execute(&self, task: Task) -> Result<()>;
}

/// Runs every task on a new, named OS thread.
#[derive(Debug)]
pub struct ThreadExecutor {
    name_prefix: String,
    spawned: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadExecutor {
    /// Threads are named `{name_prefix}-{n}`.
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            spawned: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Waits for every thread started so far. Returns how many of them
    /// panicked.
    pub fn join_all(&self) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut panicked = 0;
        for handle in handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_owned();
            if handle.join().is_err() {
                warn!(thread = %name, "processor thread panicked");
                panicked += 1;
            }
        }
        panicked
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("spindle-processor")
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("{}-{n}", self.name_prefix))
            .spawn(task)?;
        self.handles.lock().push(handle);
        Ok(())
    }
}

/// Runs every task on the blocking pool of a tokio runtime.
///
/// Processors block their thread for as long as they run, so they go to
/// `spawn_blocking` rather than to the async workers. Make sure the runtime's
/// blocking pool is large enough for every processor at once.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running in.
    ///
    /// Fails with [`Error::InvalidArgument`] outside a tokio runtime.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::invalid_argument(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(handle))
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        // detached: processors report through their handles
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}

/// Moves `processor` onto a thread from `executor` and returns its handle.
///
/// If the processor's run loop ends with an error, it is logged.
pub fn spawn_processor<P>(executor: &dyn Executor, mut processor: P) -> Result<ProcessorHandle>
where
    P: EventProcessor + 'static,
{
    let handle = processor.handle();
    executor.execute(Box::new(move || {
        if let Err(error) = processor.run() {
            error!(%error, "processor stopped with an error");
        }
    }))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_thread_executor_names_and_joins() {
        let executor = ThreadExecutor::new("stage");
        let names = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for _ in 0..2 {
            let names = Arc::clone(&names);
            executor
                .execute(Box::new(move || {
                    let name = thread::current().name().map(str::to_owned);
                    names.lock().push(name);
                }))
                .unwrap();
        }
        assert_eq!(executor.join_all(), 0);

        let mut names = names.lock().clone();
        names.sort();
        assert_eq!(
            names,
            vec![Some("stage-0".to_owned()), Some("stage-1".to_owned())]
        );
    }

    #[test]
    fn test_thread_executor_counts_panics() {
        let executor = ThreadExecutor::default();
        executor.execute(Box::new(|| panic!("boom"))).unwrap();
        executor.execute(Box::new(|| {})).unwrap();
        assert_eq!(executor.join_all(), 1);
        assert_eq!(executor.join_all(), 0);
    }

    #[test]
    fn test_tokio_executor_requires_runtime() {
        assert!(matches!(
            TokioExecutor::current(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokio_executor_runs_task() {
        let executor = TokioExecutor::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            executor
                .execute(Box::new(move || ran.store(true, Ordering::Release)))
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while !ran.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("task should run on the blocking pool");
    }
}
