use spindle::{
    BatchEventProcessor, EventHandler, EventProcessor, HandlerError, RingBuffer, TokioExecutor,
    WaitStrategyKind, spawn_processor,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Trade {
    price: u64,
    quantity: u64,
    /// Filled in by the pricer stage.
    notional: AtomicU64,
}

struct Pricer;

impl EventHandler<Trade> for Pricer {
    fn on_event(&mut self, trade: &Trade, _: i64, _: bool) -> Result<(), HandlerError> {
        trade
            .notional
            .store(trade.price * trade.quantity, Ordering::Relaxed);
        Ok(())
    }
}

struct Printer;

impl EventHandler<Trade> for Printer {
    fn on_event(
        &mut self,
        trade: &Trade,
        sequence: i64,
        end_of_batch: bool,
    ) -> Result<(), HandlerError> {
        println!("{sequence}: {trade:?} (end of batch: {end_of_batch})");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> spindle::Result<()> {
    let ring = Arc::new(RingBuffer::new_multi_producer(
        Trade::default,
        8,
        WaitStrategyKind::Blocking.build(),
    )?);

    // the printer only sees trades the pricer has finished with
    let pricer = BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), Pricer);
    let printer =
        BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[pricer.sequence()]), Printer);
    ring.add_gating_sequences(&[printer.sequence()]);

    let executor = TokioExecutor::current()?;
    let pricer = spawn_processor(&executor, pricer)?;
    let printer = spawn_processor(&executor, printer)?;

    let producers: Vec<_> = (0..2u64)
        .map(|p| {
            let ring = ring.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..16 {
                    ring.publish_event(|trade, _| {
                        trade.price = 100 + p;
                        trade.quantity = i;
                    })?;
                }
                spindle::Result::<()>::Ok(())
            })
        })
        .collect();
    for producer in producers {
        producer.await.expect("producer panicked")?;
    }

    while printer.sequence().get() < ring.cursor() {
        tokio::task::yield_now().await;
    }
    pricer.halt();
    printer.halt();
    Ok(())
}
