use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use pbf_core::{CacheOptions, StreamAdapter, StreamBuffer};

use crate::blob::PbfBlobData;
use crate::config::Config;
use crate::decoder::{DecoderOptions, PbfDecoder};
use crate::element::OsmElement;
use crate::error::{Error, Result};
use crate::queue::WorkerQueue;
use crate::round_robin::RoundRobin;
use crate::tokenizer::Tokenizer;
use crate::counters::Counters;

/// Outcome of a scan, reported to `on_scan_started`/`on_scan_finished` and
/// returned by `start`/`stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Processing,
    Stopped,
    Errored,
}

type ScanCallback = Mutex<Option<Box<dyn FnMut(StreamState) + Send>>>;
type RawBlobCallback = Mutex<Option<Box<dyn FnMut(&PbfBlobData) + Send>>>;
type ElementCallback = Mutex<Option<Box<dyn FnMut(OsmElement) + Send>>>;

struct Flags {
    is_run: bool,
    should_stop: bool,
    all_threads_created: bool,
    already_joined: bool,
    initialized_thread_count: usize,
    expected_thread_count: usize,
}

/// The control-plane lock plus the barrier/processing/drain condition
/// variables described in §4.8. Deliberately does *not* guard the hot
/// per-blob bookkeeping path (counters are atomics, each queue and the
/// round-robin dispatcher carry their own lock) — only start/stop
/// transitions and the three synchronization points below take it.
struct ControlState {
    flags: Mutex<Flags>,
    all_ready: Condvar,
    processing: Condvar,
    drain: Condvar,
}

impl ControlState {
    fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                is_run: false,
                should_stop: false,
                all_threads_created: false,
                already_joined: true,
                initialized_thread_count: 0,
                expected_thread_count: 0,
            }),
            all_ready: Condvar::new(),
            processing: Condvar::new(),
            drain: Condvar::new(),
        }
    }

    /// Blocks a freshly spawned task until every other task (N workers + 1
    /// producer) has also reached this point, so callbacks are registered
    /// on the tokenizer before any data flows.
    fn mark_thread_ready(&self) {
        let mut flags = self.flags.lock();
        flags.initialized_thread_count += 1;
        if flags.initialized_thread_count >= flags.expected_thread_count {
            flags.all_threads_created = true;
            self.all_ready.notify_all();
        } else {
            while !flags.all_threads_created {
                self.all_ready.wait(&mut flags);
            }
        }
    }

    fn should_stop(&self) -> bool {
        self.flags.lock().should_stop
    }

    fn notify_processing(&self) {
        self.processing.notify_all();
    }

    fn wait_processing_timeout(&self, timeout: Duration) {
        let mut flags = self.flags.lock();
        self.processing.wait_for(&mut flags, timeout);
    }

    fn notify_drain(&self) {
        self.drain.notify_all();
    }

    /// The producer's drain loop: wait for `counters` to report
    /// `created == finished`, logging progress every second instead of
    /// hanging silently if a worker is stuck. Also breaks on `should_stop`
    /// — `stop()` closes every queue before a concurrent `on_data_ready`
    /// might run, and a blob that fails to enqueue because of that is never
    /// counted as created (see `producer_loop`), but this remains a
    /// deadlock backstop rather than relying solely on that invariant.
    fn wait_until_quiescent(&self, counters: &Counters, timeout: Duration) {
        let mut flags = self.flags.lock();
        while !counters.quiescent() && !flags.should_stop {
            let result = self.drain.wait_for(&mut flags, timeout);
            if result.timed_out() {
                debug!("reader: draining, created={} finished={}", counters.created(), counters.finished());
            }
        }
    }

    fn begin_stop(&self) {
        let mut flags = self.flags.lock();
        flags.should_stop = true;
        self.processing.notify_all();
    }
}

fn producer_loop(
    stream: Arc<StreamBuffer>,
    queues: Vec<Arc<WorkerQueue<PbfBlobData>>>,
    round_robin: Arc<RoundRobin>,
    counters: Arc<Counters>,
    control: Arc<ControlState>,
    on_scan_started: Arc<ScanCallback>,
    on_raw_blob: Arc<RawBlobCallback>,
    on_scan_finished: Arc<ScanCallback>,
    max_blob_bytes: u64,
) {
    control.mark_thread_ready();

    let mut tokenizer = Tokenizer::new(&*stream, max_blob_bytes);

    let started_cb = Arc::clone(&on_scan_started);
    tokenizer.on_start(move || {
        if let Some(cb) = started_cb.lock().as_mut() {
            cb(StreamState::Processing);
        }
    });

    let raw_cb = Arc::clone(&on_raw_blob);
    let queues_for_dispatch = queues.clone();
    let round_robin_for_dispatch = Arc::clone(&round_robin);
    let counters_for_dispatch = Arc::clone(&counters);
    let control_for_dispatch = Arc::clone(&control);
    tokenizer.on_data_ready(move |blob| {
        if let Some(cb) = raw_cb.lock().as_mut() {
            cb(&blob);
        }
        let worker = round_robin_for_dispatch.next();
        // A closed queue (stop() was called mid-scan) refuses the blob
        // without pushing it; don't count it as created in that case, or
        // `created` would permanently exceed `finished` and the drain
        // wait below would never observe quiescence.
        if queues_for_dispatch[worker].enqueue(blob) {
            counters_for_dispatch.record_created();
            counters_for_dispatch.record_dispatched();
            control_for_dispatch.notify_processing();
        } else {
            debug!("producer: queue {worker} closed mid-scan, dropping blob");
        }
    });

    let result = tokenizer.split();

    control.wait_until_quiescent(&counters, Duration::from_secs(1));
    control.begin_stop();

    let state = match &result {
        Ok(()) => StreamState::Stopped,
        Err(_) => StreamState::Errored,
    };
    if let Some(cb) = on_scan_finished.lock().as_mut() {
        cb(state);
    }
}

fn worker_loop(
    id: usize,
    queue: Arc<WorkerQueue<PbfBlobData>>,
    control: Arc<ControlState>,
    counters: Arc<Counters>,
    decoder: PbfDecoder,
    on_osm_element: Arc<ElementCallback>,
) {
    control.mark_thread_ready();

    loop {
        let Some(blob) = queue.try_dequeue() else {
            if control.should_stop() {
                break;
            }
            control.wait_processing_timeout(Duration::from_millis(50));
            continue;
        };

        counters.record_received();
        match decoder.decode(blob) {
            Ok(elements) => {
                for element in elements {
                    if let Some(cb) = on_osm_element.lock().as_mut() {
                        cb(element);
                    }
                }
            }
            Err(err) => warn!("worker {id}: failed to decode blob: {err}"),
        }
        counters.record_finished();
        control.notify_drain();
    }
}

/// C9: orchestrates the Tokenizer, the Stream Buffer, and the worker pool
/// that runs the Decoder. One producer thread drives the tokenizer; each of
/// `config.workers` worker threads owns one queue and one decoder.
pub struct OsmPbfReader {
    config: Config,
    stream: Arc<StreamBuffer>,
    queues: Vec<Arc<WorkerQueue<PbfBlobData>>>,
    round_robin: Arc<RoundRobin>,
    counters: Arc<Counters>,
    control: Arc<ControlState>,
    producer: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    on_scan_started: Arc<ScanCallback>,
    on_raw_blob: Arc<RawBlobCallback>,
    on_osm_element: Arc<ElementCallback>,
    on_scan_finished: Arc<ScanCallback>,
}

impl OsmPbfReader {
    pub fn new(config: Config) -> Result<Self> {
        let stream = StreamBuffer::new(config.cache_page_bytes, config.cache_max_bytes, config.cache_options, config.max_alloc_bytes)?;
        let queues = (0..config.workers.max(1)).map(|_| Arc::new(WorkerQueue::new(config.max_pending_processing))).collect();

        Ok(Self {
            stream: Arc::new(stream),
            queues,
            round_robin: Arc::new(RoundRobin::new(config.workers.max(1))),
            counters: Arc::new(Counters::new()),
            control: Arc::new(ControlState::new()),
            producer: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            on_scan_started: Arc::new(Mutex::new(None)),
            on_raw_blob: Arc::new(Mutex::new(None)),
            on_osm_element: Arc::new(Mutex::new(None)),
            on_scan_finished: Arc::new(Mutex::new(None)),
            config,
        })
    }

    pub fn on_scan_started(&self, handler: impl FnMut(StreamState) + Send + 'static) {
        *self.on_scan_started.lock() = Some(Box::new(handler));
    }

    pub fn on_raw_blob(&self, handler: impl FnMut(&PbfBlobData) + Send + 'static) {
        *self.on_raw_blob.lock() = Some(Box::new(handler));
    }

    pub fn on_osm_element(&self, handler: impl FnMut(OsmElement) + Send + 'static) {
        *self.on_osm_element.lock() = Some(Box::new(handler));
    }

    pub fn on_scan_finished(&self, handler: impl FnMut(StreamState) + Send + 'static) {
        *self.on_scan_finished.lock() = Some(Box::new(handler));
    }

    pub fn start(&self, path: impl AsRef<Path>) -> Result<StreamState> {
        {
            let mut flags = self.control.flags.lock();
            if flags.is_run {
                return Ok(StreamState::Processing);
            }
            flags.is_run = true;
            flags.should_stop = false;
            flags.all_threads_created = false;
            flags.already_joined = false;
            flags.initialized_thread_count = 0;
            flags.expected_thread_count = self.config.workers.max(1) + 1;
        }
        self.counters.reset();
        for queue in &self.queues {
            queue.clear();
            queue.reopen();
        }
        self.round_robin.reset(self.config.workers.max(1));

        if let Err(err) = self.stream.open(path) {
            self.control.flags.lock().is_run = false;
            return Err(Error::from(err));
        }

        let mut worker_handles = Vec::with_capacity(self.queues.len());
        for (id, queue) in self.queues.iter().cloned().enumerate() {
            let control = Arc::clone(&self.control);
            let counters = Arc::clone(&self.counters);
            let decoder = PbfDecoder::new(DecoderOptions {
                skip: self.config.skip_options,
                strict_required_features: self.config.strict_required_features,
                max_alloc_bytes: self.config.max_alloc_bytes,
            });
            let on_osm_element = Arc::clone(&self.on_osm_element);
            worker_handles.push(thread::spawn(move || worker_loop(id, queue, control, counters, decoder, on_osm_element)));
        }
        *self.workers.lock() = worker_handles;

        let stream = Arc::clone(&self.stream);
        let queues = self.queues.clone();
        let round_robin = Arc::clone(&self.round_robin);
        let counters = Arc::clone(&self.counters);
        let control = Arc::clone(&self.control);
        let on_scan_started = Arc::clone(&self.on_scan_started);
        let on_raw_blob = Arc::clone(&self.on_raw_blob);
        let on_scan_finished = Arc::clone(&self.on_scan_finished);
        let max_blob_bytes = self.config.max_blob_bytes;
        let producer_handle = thread::spawn(move || {
            producer_loop(stream, queues, round_robin, counters, control, on_scan_started, on_raw_blob, on_scan_finished, max_blob_bytes)
        });
        *self.producer.lock() = Some(producer_handle);

        Ok(StreamState::Processing)
    }

    /// Joins the producer task only. Idempotent: a second call is a no-op.
    pub fn join(&self) {
        let mut already_joined = self.control.flags.lock();
        if already_joined.already_joined {
            return;
        }
        already_joined.already_joined = true;
        drop(already_joined);

        if let Some(handle) = self.producer.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn stop(&self) -> StreamState {
        {
            let mut flags = self.control.flags.lock();
            if !flags.is_run {
                return StreamState::Stopped;
            }
            flags.should_stop = true;
            flags.is_run = false;
        }
        self.control.processing.notify_all();
        self.control.drain.notify_all();
        for queue in &self.queues {
            queue.close();
        }

        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        for queue in &self.queues {
            while queue.try_dequeue().is_some() {}
        }

        self.join();
        self.stream.close();

        StreamState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The end-to-end scan/stop/quiescence scenario exercises only the
    // public API and lives in `tests/reader.rs` instead, alongside the
    // teacher's convention of black-box integration suites per crate.

    #[test]
    fn stop_is_idempotent_and_leaves_queues_empty() {
        let config = Config { workers: 1, ..Config::default() };
        let reader = OsmPbfReader::new(config).unwrap();
        assert_eq!(reader.stop(), StreamState::Stopped);
        assert_eq!(reader.stop(), StreamState::Stopped);
        for queue in &reader.queues {
            assert!(queue.is_empty());
        }
    }
}
