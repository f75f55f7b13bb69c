use spindle::{
    FatalExceptionHandler, HandlerError, IgnoreExceptionHandler, RingBuffer, SequenceGroup,
    ThreadExecutor, TokioExecutor, WorkHandler, WorkerPool, YieldingWaitStrategy,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Job {
    id: i64,
}

/// Remembers which worker handled which job.
struct Tally {
    worker: usize,
    handled: Arc<Mutex<HashMap<i64, Vec<usize>>>>,
}

impl WorkHandler<Job> for Tally {
    fn on_event(&mut self, job: &Job) -> Result<(), HandlerError> {
        self.handled
            .lock()
            .unwrap()
            .entry(job.id)
            .or_default()
            .push(self.worker);
        Ok(())
    }
}

fn tally_handlers(
    workers: usize,
    handled: &Arc<Mutex<HashMap<i64, Vec<usize>>>>,
) -> Vec<Box<dyn WorkHandler<Job>>> {
    (0..workers)
        .map(|worker| {
            Box::new(Tally {
                worker,
                handled: Arc::clone(handled),
            }) as Box<dyn WorkHandler<Job>>
        })
        .collect()
}

#[test]
fn every_event_is_handled_exactly_once() {
    const WORKERS: usize = 4;
    const EVENTS: i64 = 10_000;

    let handled = Arc::new(Mutex::new(HashMap::new()));
    let pool = WorkerPool::with_event_factory(
        Job::default,
        Arc::new(FatalExceptionHandler),
        tally_handlers(WORKERS, &handled),
    )
    .unwrap();

    let executor = ThreadExecutor::new("worker");
    let ring = pool.start(&executor).unwrap();

    let producers: Vec<_> = (0..2)
        .map(|p| {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0..EVENTS / 2 {
                    ring.publish_event(|job, _| job.id = p * (EVENTS / 2) + i).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    pool.drain_and_halt();
    assert_eq!(executor.join_all(), 0);
    assert!(!pool.is_running());

    let handled = handled.lock().unwrap();
    assert_eq!(handled.len(), EVENTS as usize);
    for id in 0..EVENTS {
        let workers = &handled[&id];
        assert_eq!(workers.len(), 1, "job {id} handled by {workers:?}");
    }
}

#[test]
fn pool_over_caller_ring_respects_gating() {
    const EVENTS: i64 = 2_000;

    let ring = Arc::new(
        RingBuffer::new_single_producer(Job::default, 16, Arc::new(YieldingWaitStrategy::default()))
            .unwrap(),
    );
    let handled = Arc::new(Mutex::new(HashMap::new()));
    let pool = WorkerPool::new(
        Arc::clone(&ring),
        ring.new_barrier(&[]),
        Arc::new(IgnoreExceptionHandler),
        tally_handlers(3, &handled),
    );
    ring.add_gating_sequences(&pool.worker_sequences());

    let executor = ThreadExecutor::default();
    pool.start(&executor).unwrap();

    // the ring is far smaller than the number of jobs, so the producer is
    // repeatedly held back by the slowest worker
    let gating = SequenceGroup::new();
    for sequence in pool.worker_sequences() {
        gating.add(sequence);
    }
    for id in 0..EVENTS {
        let sequence = ring.publish_event(|job, _| job.id = id).unwrap();
        assert!(sequence - gating.get() <= ring.capacity() as i64);
    }

    pool.drain_and_halt();
    executor.join_all();
    assert_eq!(handled.lock().unwrap().len(), EVENTS as usize);
}

struct Flaky {
    failures: Arc<AtomicU64>,
    done: Arc<AtomicU64>,
}

impl WorkHandler<Job> for Flaky {
    fn on_event(&mut self, job: &Job) -> Result<(), HandlerError> {
        if job.id % 10 == 0 {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(format!("job {} failed", job.id).into());
        }
        self.done.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ignored_failures_do_not_stop_the_pool() {
    let failures = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicU64::new(0));
    let handlers: Vec<Box<dyn WorkHandler<Job>>> = (0..2)
        .map(|_| {
            Box::new(Flaky {
                failures: failures.clone(),
                done: done.clone(),
            }) as Box<dyn WorkHandler<Job>>
        })
        .collect();
    let pool = Arc::new(
        WorkerPool::with_event_factory(Job::default, Arc::new(IgnoreExceptionHandler), handlers)
            .unwrap(),
    );

    let ring = pool.start(&TokioExecutor::current().unwrap()).unwrap();
    for id in 0..100 {
        ring.publish_event(|job, _| job.id = id).unwrap();
    }

    let drained = {
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || pool.drain_and_halt())
    };
    tokio::time::timeout(Duration::from_secs(10), drained)
        .await
        .expect("pool should drain")
        .unwrap();

    assert_eq!(failures.load(Ordering::Relaxed), 10);
    assert_eq!(done.load(Ordering::Relaxed), 90);
}
