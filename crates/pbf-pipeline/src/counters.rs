use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline-wide progress counters (§4.8). Each field is touched from a
/// different thread (the tokenizer increments `created`/`dispatched`; a
/// worker increments `received`/`finished`), so plain atomics are enough —
/// nothing here needs a lock.
#[derive(Debug, Default)]
pub struct Counters {
    created: AtomicU64,
    dispatched: AtomicU64,
    received: AtomicU64,
    finished: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }

    /// Every blob that was created has also finished processing: no worker
    /// has outstanding work and the tokenizer has nothing more to dispatch.
    pub fn quiescent(&self) -> bool {
        self.created() == self.finished()
    }

    pub fn reset(&self) {
        self.created.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
        self.finished.store(0, Ordering::Relaxed);
    }
}
