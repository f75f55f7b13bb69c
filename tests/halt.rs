use spindle::{
    BatchEventProcessor, BlockingWaitStrategy, BusySpinWaitStrategy, EventHandler, EventProcessor,
    HandlerError, ProcessorState, RingBuffer, SleepingWaitStrategy, ThreadExecutor,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy, spawn_processor,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;

struct Counter(Arc<AtomicU64>);

impl EventHandler<u64> for Counter {
    fn on_event(&mut self, _: &u64, _: i64, _: bool) -> Result<(), HandlerError> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn strategies() -> Vec<Arc<dyn WaitStrategy>> {
    vec![
        Arc::new(BusySpinWaitStrategy),
        Arc::new(YieldingWaitStrategy::default()),
        Arc::new(SleepingWaitStrategy::default()),
        Arc::new(BlockingWaitStrategy::new()),
        Arc::new(TimeoutBlockingWaitStrategy::new(Duration::from_millis(2))),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn halt_unblocks_a_waiting_processor() {
    for strategy in strategies() {
        let ring = Arc::new(RingBuffer::new_single_producer(|| 0u64, 8, strategy).unwrap());
        let handled = Arc::new(AtomicU64::new(0));
        let mut processor =
            BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), Counter(handled.clone()));
        let handle = processor.handle();

        let worker = tokio::task::spawn_blocking(move || processor.run());
        timeout(Duration::from_secs(5), async {
            while !handle.is_running() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        // nothing is published: the processor is parked in its wait strategy
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.halt();

        timeout(Duration::from_secs(5), worker)
            .await
            .expect("halt should wake the processor")
            .unwrap()
            .unwrap();
        assert_eq!(handle.state(), ProcessorState::Halted);
        assert_eq!(handled.load(Ordering::Relaxed), 0);
    }
}

#[test]
fn halt_and_clear_alert_are_idempotent() {
    let ring = Arc::new(
        RingBuffer::new_multi_producer(|| 0u64, 8, Arc::new(BlockingWaitStrategy::new())).unwrap(),
    );
    let barrier = ring.new_barrier(&[]);
    barrier.clear_alert();
    barrier.clear_alert();
    assert!(!barrier.is_alerted());

    let handled = Arc::new(AtomicU64::new(0));
    let processor = BatchEventProcessor::new(ring.clone(), barrier, Counter(handled.clone()));
    let executor = ThreadExecutor::default();
    let handle = spawn_processor(&executor, processor).unwrap();

    handle.halt();
    handle.halt();
    assert_eq!(executor.join_all(), 0);
    handle.halt();
    assert_eq!(handle.state(), ProcessorState::Halted);
    assert!(!handle.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn halted_processor_handles_no_further_events() {
    let ring = Arc::new(
        RingBuffer::new_single_producer(|| 0u64, 16, Arc::new(BlockingWaitStrategy::new())).unwrap(),
    );
    let handled = Arc::new(AtomicU64::new(0));
    let processor =
        BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), Counter(handled.clone()));
    ring.add_gating_sequences(&[processor.sequence()]);

    let executor = ThreadExecutor::default();
    let handle = spawn_processor(&executor, processor).unwrap();

    ring.publish_event(|event, _| *event = 1).unwrap();
    timeout(Duration::from_secs(5), async {
        while handled.load(Ordering::Relaxed) < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    handle.halt();
    executor.join_all();

    ring.publish_event(|event, _| *event = 2).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handled.load(Ordering::Relaxed), 1);
    assert_eq!(handle.sequence().get(), 0);
}
