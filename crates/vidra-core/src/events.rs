//! Ordered event delivery for upload and playback observers.
//!
//! Every subscriber owns an unbounded channel, so events arrive in emission order and
//! are never dropped or coalesced (a terminal state is always observed). Once the
//! reporter is closed it emits nothing further.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

/// Monotonic event emitter shared by the upload orchestrator and the playback engine.
#[derive(Debug)]
pub struct ProgressReporter<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
    percent: AtomicU8,
    closed: AtomicBool,
}

impl<E: Clone> Default for ProgressReporter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> ProgressReporter<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            percent: AtomicU8::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to all future events. A subscriber added after `close` receives nothing.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.lock().push(tx);
        }
        rx
    }

    /// Deliver an event to every live subscriber. Returns false once closed.
    pub fn emit(&self, event: E) -> bool {
        let mut subscribers = self.lock();
        // checked under the lock so an emit racing `close` cannot slip through after it
        if self.is_closed() {
            return false;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        true
    }

    /// Raise the progress high-water mark. Returns the new percentage only when it
    /// increased; regressions (e.g. a transfer restarting at byte 0) return `None`.
    pub fn advance(&self, transferred: u64, total: u64) -> Option<u8> {
        if self.is_closed() {
            return None;
        }
        let percent = percent_of(transferred, total);
        let previous = self.percent.fetch_max(percent, Ordering::AcqRel);
        (percent > previous).then_some(percent)
    }

    /// Current progress high-water mark (0..=100).
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    /// Reset the progress high-water mark for a new session.
    pub fn reset_progress(&self) {
        self.percent.store(0, Ordering::Release);
    }

    /// Emit a final event and stop delivering anything afterwards.
    pub fn close_with(&self, event: E) {
        let mut subscribers = self.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for tx in subscribers.iter() {
            let _ = tx.send(event.clone());
        }
        subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<E>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn percent_of(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (transferred.min(total) as u128 * 100) / total as u128;
    pct as u8
}
