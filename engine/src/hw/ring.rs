use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::{
    Arc, Mutex, MutexGuard, TryLockError,
    atomic::{AtomicU64, Ordering},
};

/// Counters shared by both ends of a hardware ring.
#[derive(Debug, Default)]
pub struct RingStats {
    written: AtomicU64,
    read: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
}

impl RingStats {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    /// Writes that lost frames because the ring was full.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Reads that came up short and were padded with silence.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn xruns(&self) -> u64 {
        self.overruns() + self.underruns()
    }
}

/// Creates a bounded single-channel sample ring between a hardware
/// callback and the render thread.
pub fn hw_ring(capacity: usize) -> (RingWriter, RingReader) {
    let (producer, consumer) = RingBuffer::new(capacity);
    let stats = Arc::new(RingStats::default());
    (
        RingWriter {
            producer: Arc::new(Mutex::new(producer)),
            stats: stats.clone(),
        },
        RingReader { consumer, stats },
    )
}

/// Writing end. Every write goes through the writer lock, so clones may
/// live on different threads.
#[derive(Debug, Clone)]
pub struct RingWriter {
    producer: Arc<Mutex<Producer<f32>>>,
    stats: Arc<RingStats>,
}

/// Holds the writer lock. Frames written through it become readable as
/// they are pushed; the reader never waits for the guard.
pub struct RingWriteGuard<'a> {
    producer: MutexGuard<'a, Producer<f32>>,
    stats: &'a RingStats,
}

impl RingWriter {
    pub fn lock_writer(&self) -> RingWriteGuard<'_> {
        let producer = match self.producer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        RingWriteGuard {
            producer,
            stats: &self.stats,
        }
    }

    /// Writes `frames`, dropping what does not fit. Returns how many
    /// frames were stored.
    pub fn write(&self, frames: &[f32]) -> usize {
        self.lock_writer().write(frames)
    }

    /// Non-blocking write for the render thread. A writer held elsewhere
    /// counts as an overrun and the frames are dropped.
    pub fn try_write(&self, frames: &[f32]) -> usize {
        match self.producer.try_lock() {
            Ok(producer) => RingWriteGuard {
                producer,
                stats: &self.stats,
            }
            .write(frames),
            Err(TryLockError::Poisoned(poisoned)) => RingWriteGuard {
                producer: poisoned.into_inner(),
                stats: &self.stats,
            }
            .write(frames),
            Err(TryLockError::WouldBlock) => {
                if !frames.is_empty() {
                    self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                }
                0
            }
        }
    }

    pub fn stats(&self) -> Arc<RingStats> {
        self.stats.clone()
    }
}

impl RingWriteGuard<'_> {
    pub fn write(&mut self, frames: &[f32]) -> usize {
        let mut stored = 0;
        for &sample in frames {
            if self.producer.push(sample).is_err() {
                self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                break;
            }
            stored += 1;
        }
        self.stats.written.fetch_add(stored as u64, Ordering::Relaxed);
        stored
    }

    /// Free space in frames.
    pub fn space(&self) -> usize {
        self.producer.slots()
    }
}

/// Reading end, owned by exactly one thread.
#[derive(Debug)]
pub struct RingReader {
    consumer: Consumer<f32>,
    stats: Arc<RingStats>,
}

impl RingReader {
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Fills `out` from the ring. Missing frames become silence and count
    /// as one underrun. Returns how many frames came from the ring.
    pub fn read_into(&mut self, out: &mut [f32]) -> usize {
        let mut got = 0;
        for sample in out.iter_mut() {
            match self.consumer.pop() {
                Ok(value) => {
                    *sample = value;
                    got += 1;
                }
                Err(_) => *sample = 0.0,
            }
        }
        if got < out.len() {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.read.fetch_add(got as u64, Ordering::Relaxed);
        got
    }

    /// Drops everything currently readable.
    pub fn skip_all(&mut self) -> usize {
        let mut count = 0;
        while self.consumer.pop().is_ok() {
            count += 1;
        }
        count
    }

    pub fn stats(&self) -> Arc<RingStats> {
        self.stats.clone()
    }
}
