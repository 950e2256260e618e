//! Unbounded queue built from a chain of fixed-size blocks.
//!
//! Producers claim an index inside the current tail block by CAS, write the
//! slot, then publish in claim order through the block's `published` counter.
//! A producer that finds the tail block full links a successor block with a
//! CAS on the block's `next` pointer, then CASes the shared tail pointer
//! forward. Neither step takes a lock; a producer that loses either race
//! simply uses the winner's block.
//!
//! Deleting an element that is not at the head leaves a tombstone bit in its
//! block; traversal skips tombstones and head advancement reclaims them.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;

use super::{ObjectSlot, QueueFull, SingleConsumerQueue, Slot};

/// Elements per block.
pub const BLOCK_SIZE: usize = 10;

struct Block<S> {
    seq: u64,
    slots: [S; BLOCK_SIZE],
    claimed: AtomicUsize,
    published: AtomicUsize,
    deleted: AtomicU16,
    next: ArcSwapOption<Block<S>>,
}

impl<S> Block<S> {
    fn new<T>(seq: u64) -> Self
    where
        S: Slot<T>,
    {
        Self {
            seq,
            slots: std::array::from_fn(|_| S::empty()),
            claimed: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            deleted: AtomicU16::new(0),
            next: ArcSwapOption::empty(),
        }
    }

    fn publish(&self, i: usize) {
        let backoff = Backoff::new();
        while self
            .published
            .compare_exchange_weak(i, i + 1, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    fn is_published(&self, i: usize) -> bool {
        i < self.published.load(Ordering::Acquire)
    }

    fn is_deleted(&self, i: usize) -> bool {
        self.deleted.load(Ordering::Relaxed) & (1 << i) != 0
    }

    fn mark_deleted(&self, i: usize) {
        self.deleted.fetch_or(1 << i, Ordering::Relaxed);
    }

    /// The successor block, linking a fresh one if there is none yet.
    fn next_or_link<T>(&self) -> Arc<Self>
    where
        S: Slot<T>,
    {
        if let Some(next) = self.next.load_full() {
            return next;
        }
        let fresh = Arc::new(Self::new::<T>(self.seq + 1));
        let previous = self
            .next
            .compare_and_swap(&None::<Arc<Self>>, Some(Arc::clone(&fresh)));
        match &*previous {
            Some(winner) => Arc::clone(winner),
            None => fresh,
        }
    }
}

impl<S> Drop for Block<S> {
    fn drop(&mut self) {
        // Unlink iteratively so a long chain cannot overflow the stack.
        let mut next = self.next.swap(None);
        while let Some(block) = next {
            next = match Arc::try_unwrap(block) {
                Ok(b) => b.next.swap(None),
                Err(_) => None,
            };
        }
    }
}

/// Consumer cursor into a [`LinkedArrayQueue`].
pub struct ElementPointer<S> {
    block: Arc<Block<S>>,
    index: usize,
}

impl<S> ElementPointer<S> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block) && self.index == other.index
    }
}

impl<S> Clone for ElementPointer<S> {
    fn clone(&self) -> Self {
        Self {
            block: Arc::clone(&self.block),
            index: self.index,
        }
    }
}

impl<S> fmt::Debug for ElementPointer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementPointer")
            .field("block", &self.block.seq)
            .field("index", &self.index)
            .finish()
    }
}

/// Unbounded single-consumer queue of [`BLOCK_SIZE`]-element blocks.
pub struct LinkedArrayQueue<T, S = ObjectSlot<T>> {
    /// First unconsumed position. Consumer-only; the lock is never contended.
    head: Mutex<ElementPointer<S>>,
    /// Newest block known to producers. Only ever moves forward.
    tail: CachePadded<ArcSwap<Block<S>>>,
    size: CachePadded<AtomicUsize>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, S: Slot<T>> LinkedArrayQueue<T, S> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let first = Arc::new(Block::new::<T>(0));
        Self {
            head: Mutex::new(ElementPointer {
                block: Arc::clone(&first),
                index: 0,
            }),
            tail: CachePadded::new(ArcSwap::new(first)),
            size: CachePadded::new(AtomicUsize::new(0)),
            _marker: PhantomData,
        }
    }

    /// Moves the tail from `current` to `next`. A failed CAS means another
    /// producer already moved it.
    fn advance_tail(&self, current: &Arc<Block<S>>, next: &Arc<Block<S>>) {
        let _ = self.tail.compare_and_swap(current, Arc::clone(next));
    }

    /// First live, published element at or after `(block, index)`.
    fn seek(mut block: Arc<Block<S>>, mut index: usize) -> Option<ElementPointer<S>> {
        loop {
            if index >= BLOCK_SIZE {
                block = block.next.load_full()?;
                index = 0;
                continue;
            }
            if !block.is_published(index) {
                return None;
            }
            if block.is_deleted(index) {
                index += 1;
                continue;
            }
            return Some(ElementPointer { block, index });
        }
    }

    /// Consumes `(from.block, from.index)` up to and including `to`.
    fn consume_range(&self, from: &ElementPointer<S>, to: &ElementPointer<S>) {
        let mut block = Arc::clone(&from.block);
        let mut index = from.index;
        loop {
            if index >= BLOCK_SIZE {
                match block.next.load_full() {
                    Some(next) => {
                        block = next;
                        index = 0;
                        continue;
                    }
                    None => return,
                }
            }
            if !block.is_deleted(index) {
                block.slots[index].take();
                self.size.fetch_sub(1, Ordering::AcqRel);
            }
            if Arc::ptr_eq(&block, &to.block) && index == to.index {
                return;
            }
            index += 1;
        }
    }
}

impl<T, S: Slot<T>> Default for LinkedArrayQueue<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> SingleConsumerQueue<T> for LinkedArrayQueue<T, S>
where
    T: Send,
    S: Slot<T>,
{
    type Node = ElementPointer<S>;

    fn enqueue(&self, value: T) -> Result<(), QueueFull<T>> {
        let backoff = Backoff::new();
        loop {
            let block = self.tail.load_full();
            let i = block.claimed.load(Ordering::Acquire);
            if i >= BLOCK_SIZE {
                let next = block.next_or_link::<T>();
                self.advance_tail(&block, &next);
                continue;
            }
            if block
                .claimed
                .compare_exchange_weak(i, i + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.size.fetch_add(1, Ordering::AcqRel);
                block.slots[i].put(value);
                block.publish(i);
                tracing::trace!(block = block.seq, index = i, "linked queue enqueue");
                return Ok(());
            }
            backoff.spin();
        }
    }

    fn peek(&self) -> Option<ElementPointer<S>> {
        let mut head = self.head.lock();
        // Drop fully consumed blocks eagerly.
        while head.index >= BLOCK_SIZE {
            let Some(next) = head.block.next.load_full() else {
                break;
            };
            head.block = next;
            head.index = 0;
        }
        Self::seek(Arc::clone(&head.block), head.index)
    }

    fn successor(&self, node: Option<&ElementPointer<S>>) -> Option<ElementPointer<S>> {
        match node {
            None => self.peek(),
            Some(n) => Self::seek(Arc::clone(&n.block), n.index + 1),
        }
    }

    fn value(&self, node: &ElementPointer<S>) -> Option<T> {
        node.block.slots[node.index].get()
    }

    fn delete(&self, node: &ElementPointer<S>) -> Option<ElementPointer<S>> {
        let is_head = self.peek().is_some_and(|h| h.same(node));
        if is_head {
            self.dequeue_up_to(node);
            return None;
        }
        node.block.slots[node.index].take();
        node.block.mark_deleted(node.index);
        self.size.fetch_sub(1, Ordering::AcqRel);
        Some(node.clone())
    }

    fn dequeue_up_to(&self, node: &ElementPointer<S>) {
        let mut head = self.head.lock();
        self.consume_range(&head, node);
        head.block = Arc::clone(&node.block);
        head.index = node.index + 1;
    }

    fn poll(&self) -> Option<T> {
        let node = self.peek()?;
        let value = node.block.slots[node.index].take();
        self.dequeue_up_to(&node);
        value
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}

impl<T, S> fmt::Debug for LinkedArrayQueue<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedArrayQueue")
            .field("size", &self.size.load(Ordering::Relaxed))
            .field("tail_block", &self.tail.load().seq)
            .finish_non_exhaustive()
    }
}
