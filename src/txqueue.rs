//! Process-wide FIFO serialization for wallet-bound work.
//!
//! Withdrawals debit a local balance and then broadcast an external
//! transfer; those two steps must happen in process-global order so one
//! in-flight withdrawal's failure handling can never race another
//! withdrawal's balance check. Units run strictly one at a time in
//! arrival order; a failing unit rejects only its own caller and the
//! queue moves on.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

pub struct SerializedTransactionQueue {
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl SerializedTransactionQueue {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();

        tokio::spawn(async move {
            while let Some(unit) = rx.recv().await {
                // A panicking unit must not take the worker (and with it
                // every future withdrawal) down.
                let _ = AssertUnwindSafe(unit).catch_unwind().await;
            }
        });

        Self { tx }
    }

    /// Append a unit of work and wait for its result. The unit does not
    /// start until every previously enqueued unit has finished.
    pub async fn enqueue<T, F>(&self, unit: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done, result) = oneshot::channel();
        let boxed: BoxFuture<'static, ()> = Box::pin(async move {
            let _ = done.send(unit.await);
        });

        // The worker task holds the receiver for the process lifetime.
        let _ = self.tx.send(boxed);

        match result.await {
            Ok(value) => value,
            Err(_) => panic!("serialized transaction unit panicked"),
        }
    }
}

impl Default for SerializedTransactionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn units_run_in_arrival_order_without_overlap() {
        let queue = Arc::new(SerializedTransactionQueue::new());
        let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let slow = {
            let trace = Arc::clone(&trace);
            queue.enqueue(async move {
                trace.lock().unwrap().push("slow-start");
                tokio::time::sleep(Duration::from_millis(50)).await;
                trace.lock().unwrap().push("slow-end");
            })
        };
        let fast = {
            let trace = Arc::clone(&trace);
            queue.enqueue(async move {
                trace.lock().unwrap().push("fast");
            })
        };

        tokio::join!(slow, fast);

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["slow-start", "slow-end", "fast"]
        );
    }

    #[tokio::test]
    async fn a_failing_unit_does_not_block_the_queue() {
        let queue = SerializedTransactionQueue::new();

        let failed: Result<(), &'static str> = queue.enqueue(async { Err("wallet down") }).await;
        assert!(failed.is_err());

        let ok: Result<u32, &'static str> = queue.enqueue(async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test]
    async fn results_propagate_to_their_own_caller() {
        let queue = SerializedTransactionQueue::new();
        assert_eq!(queue.enqueue(async { 1 + 1 }).await, 2);
    }
}
