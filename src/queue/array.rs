//! Bounded ring-buffer queue.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use super::{ObjectSlot, QueueFull, SingleConsumerQueue, Slot};

/// Bounded single-consumer queue backed by a power-of-two ring.
///
/// Nodes are absolute positions (`u64`) so they never alias across wraps.
pub struct ArrayQueue<T, S = ObjectSlot<T>> {
    slots: Box<[S]>,
    mask: u64,
    capacity: u64,
    /// Next position to be read. Written only by the consumer.
    head: CachePadded<AtomicU64>,
    /// Next position to be claimed by a producer.
    tail: CachePadded<AtomicU64>,
    /// Every position below this has been written.
    max_read: CachePadded<AtomicU64>,
    /// Producers' stale view of `head`, refreshed only when the ring looks full.
    cached_head: CachePadded<AtomicU64>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, S: Slot<T>> ArrayQueue<T, S> {
    /// Creates a queue holding at least `capacity` elements.
    ///
    /// The real capacity is rounded up to the next power of two.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| S::empty()).collect();
        Self {
            slots,
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            max_read: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(AtomicU64::new(0)),
            _marker: PhantomData,
        }
    }

    fn slot(&self, pos: u64) -> &S {
        &self.slots[(pos & self.mask) as usize]
    }

    /// Claims the next position, or `None` if the ring is full.
    fn claim(&self) -> Option<u64> {
        loop {
            let t = self.tail.load(Ordering::Acquire);
            if t >= self.cached_head.load(Ordering::Relaxed) + self.capacity {
                let h = self.head.load(Ordering::Acquire);
                self.cached_head.store(h, Ordering::Relaxed);
                if t >= h + self.capacity {
                    return None;
                }
            }
            if self
                .tail
                .compare_exchange_weak(t, t + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(t);
            }
        }
    }

    /// Makes position `t` visible, after every earlier claim.
    fn publish(&self, t: u64) {
        let backoff = Backoff::new();
        while self
            .max_read
            .compare_exchange_weak(t, t + 1, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    fn visible(&self, pos: u64) -> bool {
        pos < self.max_read.load(Ordering::Acquire)
    }
}

impl<T, S> SingleConsumerQueue<T> for ArrayQueue<T, S>
where
    T: Send,
    S: Slot<T>,
{
    type Node = u64;

    fn enqueue(&self, value: T) -> Result<(), QueueFull<T>> {
        let Some(t) = self.claim() else {
            return Err(QueueFull(value));
        };
        self.slot(t).put(value);
        self.publish(t);
        tracing::trace!(position = t, "array queue enqueue");
        Ok(())
    }

    fn peek(&self) -> Option<u64> {
        let h = self.head.load(Ordering::Relaxed);
        self.visible(h).then_some(h)
    }

    fn successor(&self, node: Option<&u64>) -> Option<u64> {
        match node {
            None => self.peek(),
            Some(&n) => {
                let next = n + 1;
                self.visible(next).then_some(next)
            }
        }
    }

    fn value(&self, node: &u64) -> Option<T> {
        self.slot(*node).get()
    }

    fn delete(&self, node: &u64) -> Option<u64> {
        let h = self.head.load(Ordering::Relaxed);
        let n = *node;
        if n == h {
            self.dequeue_up_to(node);
            return None;
        }
        // Shift everything between head and n one slot toward n, freeing the
        // head slot. The slot at n then holds n's predecessor.
        self.slot(n).take();
        let mut i = n;
        while i != h {
            self.slot(i).shift_from(self.slot(i - 1));
            i -= 1;
        }
        self.head.store(h + 1, Ordering::Release);
        Some(n)
    }

    fn dequeue_up_to(&self, node: &u64) {
        let new_head = *node + 1;
        let mut i = self.head.load(Ordering::Relaxed);
        while i < new_head {
            self.slot(i).take();
            i += 1;
        }
        self.head.store(new_head, Ordering::Release);
    }

    fn poll(&self) -> Option<T> {
        let h = self.peek()?;
        let value = self.slot(h).take();
        self.head.store(h + 1, Ordering::Release);
        value
    }

    fn size(&self) -> usize {
        let t = self.tail.load(Ordering::Acquire);
        let h = self.head.load(Ordering::Acquire);
        t.saturating_sub(h) as usize
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity as usize)
    }
}

impl<T, S> fmt::Debug for ArrayQueue<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayQueue")
            .field("capacity", &self.capacity)
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("max_read", &self.max_read.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
