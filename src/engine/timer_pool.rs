//! Keyed registry of at-most-once, cancelable delayed callbacks.
//!
//! Each key holds at most one live handle: arming a key again cancels the
//! previous handle before the new one is scheduled. A handle's callback
//! runs at most once however the handle ends. The `fired` flag is claimed
//! with an atomic swap, so a natural fire can never race a cancellation
//! into a double run.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::engine::types::PlayerId;

/// Identity of a timer slot: one per player plus one round-wide slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Player(PlayerId),
    Round,
}

type Callback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct TimerEntry {
    fired: Arc<AtomicBool>,
    callback: Callback,
    task: JoinHandle<()>,
}

impl TimerEntry {
    /// Claim the entry for cancellation. Returns false when the callback
    /// already ran (or is running), in which case the task is left alone.
    fn cancel(&self) -> bool {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.task.abort();
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
pub struct TimerPool {
    entries: DashMap<TimerKey, TimerEntry>,
}

impl TimerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run after `delay`. An existing handle for
    /// the same key is cancelled first.
    pub fn arm<F, Fut>(&self, key: TimerKey, delay: Duration, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: Callback = Arc::new(move || Box::pin(callback()) as BoxFuture<'static, ()>);
        let fired = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let fired = Arc::clone(&fired);
            let callback = Arc::clone(&callback);
            async move {
                tokio::time::sleep(delay).await;
                if !fired.swap(true, Ordering::SeqCst) {
                    callback().await;
                }
            }
        });

        if let Some(previous) = self.entries.insert(
            key,
            TimerEntry {
                fired,
                callback,
                task,
            },
        ) {
            previous.cancel();
        }
    }

    /// If `key` holds a live, unfired handle, cancel its timer and run the
    /// callback immediately.
    pub async fn fire_now(&self, key: TimerKey) {
        if let Some((_, entry)) = self.entries.remove(&key) {
            if entry.cancel() {
                (entry.callback)().await;
            }
        }
    }

    /// Cancel every outstanding handle without invoking callbacks. Round
    /// boundaries call this so no stale timer fires into the next round.
    pub fn clear(&self) {
        self.entries.retain(|_, entry| {
            entry.cancel();
            false
        });
    }

    pub fn armed_count(&self) -> usize {
        self.entries.len()
    }
}
