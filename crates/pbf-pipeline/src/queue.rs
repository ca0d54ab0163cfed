use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// A single worker's inbox (§4.8: "N worker queues").
///
/// `capacity == 0` means unbounded (the default): `enqueue` never blocks.
/// A nonzero capacity makes `enqueue` block on `slot_free` until there is
/// room, giving the producer real backpressure instead of growing without
/// bound ahead of a slow worker (DESIGN.md Open Question 3). `close` wakes
/// any producer blocked on a full queue so shutdown can't deadlock.
pub struct WorkerQueue<T> {
    items: Mutex<VecDeque<T>>,
    slot_free: Condvar,
    capacity: usize,
    closed: AtomicBool,
}

impl<T> WorkerQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self { items: Mutex::new(VecDeque::new()), slot_free: Condvar::new(), capacity, closed: AtomicBool::new(false) }
    }

    /// Blocks while the queue is full and open; returns `false` without
    /// enqueuing if the queue is closed.
    pub fn enqueue(&self, item: T) -> bool {
        let mut items = self.items.lock();
        if self.capacity > 0 {
            while items.len() >= self.capacity && !self.closed.load(Ordering::Acquire) {
                self.slot_free.wait(&mut items);
            }
        }
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        items.push_back(item);
        true
    }

    pub fn try_dequeue(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front();
        if item.is_some() {
            self.slot_free.notify_one();
        }
        item
    }

    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        let mut items = self.items.lock();
        items.clear();
        self.slot_free.notify_all();
    }

    /// Marks the queue closed and wakes any producer blocked in `enqueue`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.slot_free.notify_all();
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }
}
