use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer / single-consumer ring buffer of stereo f32 frames.
///
/// The emulator thread pushes one frame at a time; the host audio callback
/// drains blocks. Both ends are lock-free and coordinate only through the
/// two cursor atomics (release on the writer side, acquire on the reader
/// side). Capacity is rounded up to a power of two so index wrapping is a
/// bitmask.
///
/// The ring is lossy when full: new frames are dropped.
pub struct SampleProducer {
    inner: Arc<Inner>,
}

pub struct SampleConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    buf: Box<[UnsafeCell<[f32; 2]>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Only the producer writes `buf[head]` and only the consumer reads
// `buf[tail]`; the cursors carry the happens-before edges.
unsafe impl Sync for Inner {}
unsafe impl Send for Inner {}

impl Inner {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & self.mask
    }
}

/// Create a connected producer/consumer pair holding at least
/// `capacity_frames` stereo frames.
pub fn sample_ring(capacity_frames: usize) -> (SampleProducer, SampleConsumer) {
    let cap = capacity_frames.saturating_add(1).next_power_of_two().max(2);
    let mut buf = Vec::with_capacity(cap);
    for _ in 0..cap {
        buf.push(UnsafeCell::new([0.0f32; 2]));
    }

    let inner = Arc::new(Inner {
        buf: buf.into_boxed_slice(),
        mask: cap - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        SampleProducer {
            inner: Arc::clone(&inner),
        },
        SampleConsumer { inner },
    )
}

impl SampleProducer {
    /// Push one stereo frame. Returns false (dropping the frame) when the
    /// ring is full.
    #[inline]
    pub fn push_stereo(&self, left: f32, right: f32) -> bool {
        let head = self.inner.head.load(Ordering::Relaxed);
        let next = (head + 1) & self.inner.mask;
        if next == self.inner.tail.load(Ordering::Acquire) {
            return false;
        }

        unsafe {
            *self.inner.buf[head].get() = [left, right];
        }
        self.inner.head.store(next, Ordering::Release);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.inner.mask
    }
}

impl SampleConsumer {
    /// Pop one stereo frame, or None when the ring is empty.
    #[inline]
    pub fn pop_stereo(&self) -> Option<(f32, f32)> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        if tail == self.inner.head.load(Ordering::Acquire) {
            return None;
        }

        let frame = unsafe { *self.inner.buf[tail].get() };
        self.inner
            .tail
            .store((tail + 1) & self.inner.mask, Ordering::Release);
        Some((frame[0], frame[1]))
    }

    /// Fill an interleaved output slice, substituting silence when the ring
    /// runs dry.
    pub fn fill_interleaved(&self, out: &mut [f32]) {
        for frame in out.chunks_exact_mut(2) {
            let (l, r) = self.pop_stereo().unwrap_or((0.0, 0.0));
            frame[0] = l;
            frame[1] = r;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.inner.mask
    }
}
