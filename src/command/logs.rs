//! Trailing-debounce batching for engine log pushes.
//!
//! Log pushes can arrive far faster than a UI should redraw. Each push lands
//! in a pending buffer and (re)arms a single-shot flush timer `delay` from
//! now. Bursts that arrive closer together than `delay` therefore coalesce
//! into one flush, and the visible list only ever grows by whole batches.
//!
//! ```text
//! push ─┐ push ─┐ push ─┐                 push ─┐
//!       ▼       ▼       ▼                       ▼
//! timer ├───x   ├───x   ├──────── flush         ├──────── flush
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::types::LogLine;

/// Receives each flushed batch, oldest line first.
type FlushSink = Box<dyn Fn(Vec<LogLine>) + Send + Sync>;

/// Coalesces log pushes into debounced batches.
///
/// Must be used from within a tokio runtime: [`LogBatcher::push`] spawns the
/// flush timer.
pub struct LogBatcher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LogBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBatcher")
            .field("delay", &self.shared.delay)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

struct Shared {
    delay: Duration,
    sink: FlushSink,
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    lines: Vec<LogLine>,
    /// Bumped on every reschedule; a timer only flushes if it is still current.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl LogBatcher {
    /// Create a batcher that hands each batch to `sink` after `delay` of quiet.
    pub fn new(delay: Duration, sink: impl Fn(Vec<LogLine>) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                delay,
                sink: Box::new(sink),
                pending: Mutex::new(Pending::default()),
            }),
        }
    }

    /// Buffer `lines` and restart the flush timer.
    pub fn push(&self, lines: Vec<LogLine>) {
        if lines.is_empty() {
            return;
        }
        let mut pending = self.shared.pending.lock().expect("log batcher mutex poisoned");
        pending.lines.extend(lines);
        pending.generation = pending.generation.wrapping_add(1);
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }

        let generation = pending.generation;
        let shared = Arc::clone(&self.shared);
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.delay).await;
            shared.flush(Some(generation));
        }));
    }

    /// Flush whatever is pending right now and disarm the timer.
    pub fn flush(&self) {
        self.shared.flush(None);
    }

    /// Drop pending lines without delivering them.
    pub fn discard(&self) {
        let mut pending = self.shared.pending.lock().expect("log batcher mutex poisoned");
        pending.lines.clear();
        pending.generation = pending.generation.wrapping_add(1);
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
    }

    /// Number of lines waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.shared
            .pending
            .lock()
            .expect("log batcher mutex poisoned")
            .lines
            .len()
    }
}

impl Drop for LogBatcher {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
        }
    }
}

impl Shared {
    /// Deliver the pending batch. `generation` is `Some` when called from a
    /// timer; a stale timer does nothing.
    fn flush(&self, generation: Option<u64>) {
        let mut pending = self.pending.lock().expect("log batcher mutex poisoned");
        if let Some(generation) = generation {
            if generation != pending.generation {
                return;
            }
            // The running timer is this task; dropping the handle detaches it.
            pending.timer = None;
        } else if let Some(timer) = pending.timer.take() {
            timer.abort();
        }

        if pending.lines.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut pending.lines);
        // Sink runs under the lock so batches reach it in order.
        (self.sink)(batch);
    }
}

/// Append `batch` to `visible` in one step, then trim the front to `cap`.
pub fn append_capped(visible: &mut VecDeque<LogLine>, batch: Vec<LogLine>, cap: usize) {
    visible.extend(batch);
    if visible.len() > cap {
        let excess = visible.len() - cap;
        visible.drain(..excess);
    }
}
