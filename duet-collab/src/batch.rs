//! Delayed delivery stack: coalesces pushed items per destination.
//!
//! Items buffer until either the configured delay elapses or the
//! buffer reaches `max_batch_size`, then the whole batch is handed to
//! the delivery callback in push order. One stack exists per peer plus
//! one for broadcast, so a burst of small engine operations becomes a
//! single wire payload.
//!
//! Flush policy:
//! 1. first push arms a timer for `delay`;
//! 2. a push that fills the buffer to `max_batch_size` while the timer
//!    is armed flushes synchronously and cancels the timer;
//! 3. `destroy` discards buffered items without delivery and detaches
//!    the callback for good.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

type DeliverFn<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;

struct Shared<T> {
    buffer: Vec<T>,
    deliver: Option<DeliverFn<T>>,
    timer: Option<JoinHandle<()>>,
}

/// A timer-and-threshold driven batch queue.
///
/// `push` must run inside a Tokio runtime; the automatic flush rides a
/// spawned sleep task.
pub struct DelayedStack<T> {
    shared: Arc<Mutex<Shared<T>>>,
    delay: Duration,
    max_batch_size: usize,
}

impl<T: Send + 'static> DelayedStack<T> {
    /// Create a stack delivering to `deliver`. A `max_batch_size` of 0
    /// disables size-triggered flushing.
    pub fn new(
        delay: Duration,
        max_batch_size: usize,
        deliver: impl Fn(Vec<T>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                buffer: Vec::new(),
                deliver: Some(Arc::new(deliver)),
                timer: None,
            })),
            delay,
            max_batch_size,
        }
    }

    /// Append `item`, arming the delayed flush or triggering the
    /// size-based one. No-op after `destroy`.
    pub fn push(&self, item: T) {
        let mut shared = self.shared.lock().unwrap();
        if shared.deliver.is_none() {
            return;
        }
        shared.buffer.push(item);

        if shared.timer.is_none() {
            let weak = Arc::downgrade(&self.shared);
            let delay = self.delay;
            shared.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(shared) = weak.upgrade() {
                    deliver_batch(&shared, false);
                }
            }));
        } else if self.max_batch_size > 0 && shared.buffer.len() >= self.max_batch_size {
            drop(shared);
            deliver_batch(&self.shared, true);
        }
    }

    /// Deliver the buffered items now, in push order, and cancel any
    /// armed timer. No-op after `destroy`.
    pub fn flush(&self) {
        deliver_batch(&self.shared, true);
    }

    /// Drop buffered items without delivering them and detach the
    /// callback permanently. Later `push`/`flush` calls do nothing.
    pub fn destroy(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.buffer.clear();
        shared.deliver = None;
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
    }

    /// Number of items waiting for the next flush.
    pub fn len(&self) -> usize {
        self.shared.lock().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().unwrap().buffer.is_empty()
    }

    /// Whether a delayed flush is currently armed.
    pub fn is_pending(&self) -> bool {
        self.shared.lock().unwrap().timer.is_some()
    }
}

/// Take the buffer and hand it to the callback, outside the lock. The
/// timer path passes `even_if_empty = false` so a timer that lost the
/// race to a size-triggered flush delivers nothing.
fn deliver_batch<T>(shared: &Arc<Mutex<Shared<T>>>, even_if_empty: bool) {
    let (deliver, batch) = {
        let mut shared = shared.lock().unwrap();
        let Some(deliver) = shared.deliver.clone() else {
            return;
        };
        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if !even_if_empty && shared.buffer.is_empty() {
            return;
        }
        (deliver, std::mem::take(&mut shared.buffer))
    };
    deliver(batch);
}
