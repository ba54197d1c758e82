//! Chunked producer/consumer buffering with a single in-flight job.
//!
//! A [`BufferPipeline`] accumulates written values into fixed-capacity
//! [`ChunkBuffer`]s. Whenever the current chunk fills up it is handed to the
//! sink on the rayon pool, or queued if a job is already running. Chunks live
//! in an arena of slots that only grows; a slot holds its chunk while the
//! chunk is free and is vacated while the chunk is being written, queued or
//! processed.

pub mod chunk;

use std::collections::VecDeque;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{CoreError, CoreResult};
pub use chunk::ChunkBuffer;

/// Consumer of full chunks. Runs on a background thread, one chunk at a time.
pub trait ChunkSink<T>: Send + 'static {
    fn consume(&mut self, chunk: &mut [T]) -> anyhow::Result<()>;
}

impl<T, F> ChunkSink<T> for F
where
    F: FnMut(&mut [T]) -> anyhow::Result<()> + Send + 'static,
{
    fn consume(&mut self, chunk: &mut [T]) -> anyhow::Result<()> {
        self(chunk)
    }
}

/// A chunk checked out of its arena slot.
struct Job<T> {
    slot: usize,
    chunk: ChunkBuffer<T>,
}

struct Dispatch<T> {
    slots: Vec<Option<ChunkBuffer<T>>>,
    pending: VecDeque<Job<T>>,
    /// Admission gate: set while a worker loop owns the sink.
    running: bool,
    processed: u64,
    failure: Option<String>,
}

impl<T: Copy + Default> Dispatch<T> {
    /// First free chunk in slot order, or a freshly allocated one.
    fn checkout(&mut self, capacity: usize) -> Job<T> {
        if let Some(slot) = self.slots.iter().position(Option::is_some) {
            if let Some(chunk) = self.slots[slot].take() {
                return Job { slot, chunk };
            }
        }
        self.slots.push(None);
        log::trace!("pool grew to {} chunks", self.slots.len());
        Job {
            slot: self.slots.len() - 1,
            chunk: ChunkBuffer::new(capacity),
        }
    }
}

struct Shared<T, S> {
    capacity: usize,
    dispatch: Mutex<Dispatch<T>>,
    idle: Condvar,
    sink: Mutex<Option<S>>,
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T, S> Shared<T, S>
where
    T: Copy + Default + Send + 'static,
    S: ChunkSink<T>,
{
    /// Worker loop: processes `job`, then keeps pulling queued chunks until
    /// the queue is empty and the gate can be released.
    fn run(self: Arc<Self>, mut job: Job<T>) {
        loop {
            let outcome = self.process(&mut job.chunk);

            let mut dispatch = lock(&self.dispatch);
            dispatch.slots[job.slot] = Some(job.chunk);
            dispatch.processed += 1;
            if let Err(message) = outcome {
                log::error!("chunk processing failed: {}", message);
                dispatch.failure.get_or_insert(message);
            }
            log::debug!(
                "{:p}: 1 chunk processed, {} queued",
                Arc::as_ptr(&self),
                dispatch.pending.len()
            );

            match dispatch.pending.pop_front() {
                Some(next) => job = next,
                None => {
                    dispatch.running = false;
                    self.idle.notify_all();
                    return;
                }
            }
        }
    }

    fn process(&self, chunk: &mut ChunkBuffer<T>) -> Result<(), String> {
        let mut sink = lock(&self.sink);
        let Some(sink) = sink.as_mut() else {
            chunk.clear();
            return Err(CoreError::SinkUnavailable.to_string());
        };

        match panic::catch_unwind(AssertUnwindSafe(|| chunk.process(|data| sink.consume(data)))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{:#}", err)),
            Err(payload) => {
                chunk.clear();
                Err(panic_message(&*payload))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("sink panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("sink panicked: {}", s)
    } else {
        "sink panicked".to_string()
    }
}

/// Serializes a producer's writes into chunks and drives at most one
/// processing job at a time, queueing the backlog in fill order.
pub struct BufferPipeline<T, S> {
    shared: Arc<Shared<T, S>>,
    current: Mutex<Job<T>>,
}

impl<T, S> BufferPipeline<T, S>
where
    T: Copy + Default + Send + 'static,
    S: ChunkSink<T>,
{
    pub fn new(capacity: usize, sink: S) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::InvalidCapacity);
        }
        let mut dispatch = Dispatch {
            slots: Vec::new(),
            pending: VecDeque::new(),
            running: false,
            processed: 0,
            failure: None,
        };
        let current = dispatch.checkout(capacity);
        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                dispatch: Mutex::new(dispatch),
                idle: Condvar::new(),
                sink: Mutex::new(Some(sink)),
            }),
            current: Mutex::new(current),
        })
    }

    /// Appends one value. Never waits for processing.
    pub fn write(&self, value: T) {
        let mut current = lock(&self.current);
        current.chunk.write(value);
        if current.chunk.is_full() {
            self.submit(&mut current);
        }
    }

    /// Appends every value of `values` in order.
    #[allow(dead_code)]
    pub fn write_all(&self, values: &[T]) {
        for &value in values {
            self.write(value);
        }
    }

    /// Zero-pads the current chunk and submits it if it holds any values.
    /// Returns whether a chunk was submitted.
    pub fn flush_partial(&self) -> bool {
        let mut current = lock(&self.current);
        if current.chunk.is_empty() {
            return false;
        }
        current.chunk.pad();
        self.submit(&mut current);
        true
    }

    fn submit(&self, current: &mut Job<T>) {
        let mut dispatch = lock(&self.shared.dispatch);
        let next = dispatch.checkout(self.shared.capacity);
        let full = mem::replace(current, next);

        if dispatch.running {
            dispatch.pending.push_back(full);
            return;
        }
        dispatch.running = true;
        drop(dispatch);

        let shared = Arc::clone(&self.shared);
        rayon::spawn(move || shared.run(full));
    }

    /// Blocks until no job is running or queued. Returns the first sink
    /// failure recorded since the previous drain, clearing it.
    pub fn await_drain(&self) -> CoreResult<()> {
        let mut dispatch = lock(&self.shared.dispatch);
        while dispatch.running || !dispatch.pending.is_empty() {
            dispatch = self
                .shared
                .idle
                .wait(dispatch)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match dispatch.failure.take() {
            Some(message) => Err(CoreError::Sink(message)),
            None => Ok(()),
        }
    }

    /// Drains and hands the sink back. Values still sitting in a partially
    /// filled chunk are discarded.
    pub fn finish(self) -> CoreResult<S> {
        self.await_drain()?;
        lock(&self.shared.sink)
            .take()
            .ok_or(CoreError::SinkUnavailable)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Chunks ever allocated. Never decreases.
    pub fn pool_size(&self) -> usize {
        lock(&self.shared.dispatch).slots.len()
    }

    pub fn chunks_processed(&self) -> u64 {
        lock(&self.shared.dispatch).processed
    }

    #[allow(dead_code)]
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.dispatch).pending.len()
    }

    /// Values written into the current, not yet full, chunk.
    #[allow(dead_code)]
    pub fn buffered(&self) -> usize {
        lock(&self.current).chunk.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_rejected() {
        let result = BufferPipeline::new(0, |_: &mut [f32]| -> anyhow::Result<()> { Ok(()) });
        assert!(matches!(result, Err(CoreError::InvalidCapacity)));
    }

    #[test]
    fn drain_returns_immediately_when_idle() {
        let pipeline = BufferPipeline::new(8, |_: &mut [f32]| -> anyhow::Result<()> { Ok(()) }).unwrap();
        pipeline.await_drain().unwrap();
        pipeline.write(1.0);
        pipeline.await_drain().unwrap();
        assert_eq!(pipeline.chunks_processed(), 0);
        assert_eq!(pipeline.buffered(), 1);
    }

    #[test]
    fn queued_chunks_run_in_fill_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let pipeline = BufferPipeline::new(4, move |chunk: &mut [u32]| -> anyhow::Result<()> {
            thread::sleep(Duration::from_micros(200));
            sink_seen.lock().unwrap().push(chunk[0]);
            Ok(())
        })
        .unwrap();

        for v in 0..80u32 {
            pipeline.write(v);
        }
        pipeline.await_drain().unwrap();

        let expected: Vec<u32> = (0..20).map(|i| i * 4).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(pipeline.chunks_processed(), 20);
        assert_eq!(pipeline.pending_len(), 0);
    }

    #[test]
    fn at_most_one_job_is_active() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let pipeline = BufferPipeline::new(2, move |_: &mut [f32]| -> anyhow::Result<()> {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(100));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        for v in 0..200 {
            pipeline.write(v as f32);
        }
        pipeline.await_drain().unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.chunks_processed(), 100);
    }

    #[test]
    fn pool_is_bounded_by_outstanding_chunks() {
        let (permits, gate) = mpsc::channel::<()>();
        let pipeline = BufferPipeline::new(4, move |_: &mut [f32]| -> anyhow::Result<()> {
            gate.recv()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(pipeline.pool_size(), 1);

        // Three full chunks while the sink is blocked: one running, two queued.
        for v in 0..12 {
            pipeline.write(v as f32);
        }
        assert_eq!(pipeline.pool_size(), 4);

        for _ in 0..3 {
            permits.send(()).unwrap();
        }
        pipeline.await_drain().unwrap();
        assert_eq!(pipeline.pool_size(), 4);

        // Free chunks are recycled instead of allocating new ones.
        for _ in 0..3 {
            permits.send(()).unwrap();
        }
        for v in 0..12 {
            pipeline.write(v as f32);
        }
        pipeline.await_drain().unwrap();
        assert_eq!(pipeline.pool_size(), 4);
        assert_eq!(pipeline.chunks_processed(), 6);
    }

    #[test]
    fn failing_sink_still_releases_the_gate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let pipeline = BufferPipeline::new(2, move |_: &mut [f32]| -> anyhow::Result<()> {
            if c.fetch_add(1, Ordering::SeqCst) == 1 {
                anyhow::bail!("disk full");
            }
            Ok(())
        })
        .unwrap();

        for v in 0..6 {
            pipeline.write(v as f32);
        }
        let err = pipeline.await_drain().unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // The failure is reported once; the pipeline keeps working.
        pipeline.await_drain().unwrap();
        pipeline.write_all(&[1.0, 2.0]);
        pipeline.await_drain().unwrap();
        assert_eq!(pipeline.chunks_processed(), 4);
    }

    #[test]
    fn panicking_sink_still_releases_the_gate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let pipeline = BufferPipeline::new(1, move |_: &mut [f32]| -> anyhow::Result<()> {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();

        pipeline.write_all(&[1.0, 2.0, 3.0]);
        let err = pipeline.await_drain().unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(pipeline.chunks_processed(), 3);
    }

    struct Collect(Vec<Vec<f32>>);

    impl ChunkSink<f32> for Collect {
        fn consume(&mut self, chunk: &mut [f32]) -> anyhow::Result<()> {
            self.0.push(chunk.to_vec());
            Ok(())
        }
    }

    #[test]
    fn finish_returns_the_sink_and_flush_pads_the_tail() {
        let pipeline = BufferPipeline::new(4, Collect(Vec::new())).unwrap();
        pipeline.write_all(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(pipeline.flush_partial());
        assert!(!pipeline.flush_partial());

        let Collect(chunks) = pipeline.finish().unwrap();
        assert_eq!(chunks, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 0.0, 0.0, 0.0]]);
    }
}
