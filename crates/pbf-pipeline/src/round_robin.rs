use parking_lot::Mutex;

struct State {
    current: usize,
    worker_count: usize,
}

/// Dispatches blobs to workers in round-robin order (§4.8). A plain
/// `Mutex<State>` is enough: this is touched once per blob, never on a hot
/// per-byte path.
pub struct RoundRobin {
    state: Mutex<State>,
}

impl RoundRobin {
    pub fn new(worker_count: usize) -> Self {
        Self { state: Mutex::new(State { current: 0, worker_count: worker_count.max(1) }) }
    }

    /// The worker index that `next()` will return without advancing.
    pub fn preview(&self) -> usize {
        self.state.lock().current
    }

    /// Returns the current worker index and advances to the next one.
    pub fn next(&self) -> usize {
        let mut state = self.state.lock();
        let worker = state.current;
        state.current = (state.current + 1) % state.worker_count;
        worker
    }

    pub fn reset(&self, worker_count: usize) {
        let mut state = self.state.lock();
        state.current = 0;
        state.worker_count = worker_count.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_workers_in_order() {
        let rr = RoundRobin::new(3);
        assert_eq!(rr.next(), 0);
        assert_eq!(rr.next(), 1);
        assert_eq!(rr.next(), 2);
        assert_eq!(rr.next(), 0);
    }

    #[test]
    fn preview_does_not_advance() {
        let rr = RoundRobin::new(2);
        assert_eq!(rr.preview(), 0);
        assert_eq!(rr.preview(), 0);
        assert_eq!(rr.next(), 0);
        assert_eq!(rr.preview(), 1);
    }

    #[test]
    fn reset_restarts_at_zero_with_new_worker_count() {
        let rr = RoundRobin::new(2);
        rr.next();
        rr.reset(5);
        assert_eq!(rr.preview(), 0);
        for i in 0..5 {
            assert_eq!(rr.next(), i);
        }
        assert_eq!(rr.next(), 0);
    }
}
