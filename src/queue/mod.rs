//! Single-consumer, multi-producer mailbox queues.
//!
//! Producers only ever call [`SingleConsumerQueue::enqueue`]. Every other
//! operation is consumer-only: the queue does not protect against two
//! consumers, and the mailbox guarantees that only its owning actor drains it.
//!
//! Two shapes are provided:
//!
//! - [`ArrayQueue`]: bounded ring with a power-of-two capacity. A producer
//!   claims a position by CAS on `tail`, writes the slot, then advances a
//!   separate `max_read` index in claim order. The consumer never looks past
//!   `max_read`, so it never observes a claimed-but-unwritten slot.
//! - [`LinkedArrayQueue`]: unbounded chain of fixed-size blocks with the same
//!   per-block publication discipline.
//!
//! Consumer traversal uses opaque [`SingleConsumerQueue::Node`] cursors:
//!
//! ```text
//! let mut cursor = None;
//! while let Some(node) = queue.successor(cursor.as_ref()) {
//!     if wanted(queue.value(&node)) {
//!         cursor = queue.delete(&node);   // None => continue from the head
//!     } else {
//!         cursor = Some(node);            // skip, stays queued
//!     }
//! }
//! ```
//!
//! Values are stored in [`Slot`]s. Object queues keep `Option<T>` in an
//! `AtomicCell`; primitive queues keep raw `u64` bit patterns so numbers are
//! never boxed.

mod array;
mod linked_array;
mod primitive;

pub use array::ArrayQueue;
pub use linked_array::{ElementPointer, LinkedArrayQueue, BLOCK_SIZE};
pub use primitive::{Primitive, PrimitiveSlot};

use crossbeam_utils::atomic::AtomicCell;
use std::fmt;

/// Returned by [`SingleConsumerQueue::enqueue`] when a bounded queue is full.
///
/// Carries the rejected value back to the producer.
#[derive(thiserror::Error)]
#[error("queue is full")]
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    /// Recovers the rejected value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

/// A queue with many producers and one consumer that supports in-place
/// traversal and deletion.
pub trait SingleConsumerQueue<T>: Send + Sync {
    /// Opaque consumer cursor.
    type Node: Clone + fmt::Debug + Send;

    /// Appends a value. Safe from any thread.
    fn enqueue(&self, value: T) -> Result<(), QueueFull<T>>;

    /// The first published node, if any.
    fn peek(&self) -> Option<Self::Node>;

    /// The node after `node`, or the head when `node` is `None`.
    fn successor(&self, node: Option<&Self::Node>) -> Option<Self::Node>;

    /// A copy of the value held at `node`.
    fn value(&self, node: &Self::Node) -> Option<T>;

    /// Removes `node`'s value from the queue.
    ///
    /// Returns the cursor to continue traversal from: passing it to
    /// [`successor`](Self::successor) yields the element that followed the
    /// deleted one. `None` means "continue from the head".
    fn delete(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Removes every element from the head up to and including `node`.
    fn dequeue_up_to(&self, node: &Self::Node);

    /// Removes and returns the head value.
    fn poll(&self) -> Option<T>;

    /// Number of elements claimed by producers and not yet consumed.
    fn size(&self) -> usize;

    /// Fixed capacity, or `None` for unbounded queues.
    fn capacity(&self) -> Option<usize>;

    /// True if the consumer would currently see no element.
    fn is_empty(&self) -> bool {
        self.peek().is_none()
    }

    /// The head value without removing it.
    fn peek_value(&self) -> Option<T> {
        self.peek().and_then(|n| self.value(&n))
    }

    /// All visible values in queue order.
    fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::new();
        let mut cursor = None;
        while let Some(node) = self.successor(cursor.as_ref()) {
            if let Some(v) = self.value(&node) {
                out.push(v);
            }
            cursor = Some(node);
        }
        out
    }
}

/// Storage cell for one queue element.
///
/// A slot is written by exactly one producer before publication and is
/// otherwise only touched by the consumer.
pub trait Slot<T>: Send + Sync {
    /// An empty slot.
    fn empty() -> Self;
    /// Stores `value`, replacing anything present.
    fn put(&self, value: T);
    /// Copies the value out, leaving it in place.
    fn get(&self) -> Option<T>;
    /// Moves the value out, leaving the slot empty.
    fn take(&self) -> Option<T>;

    /// Moves whatever `from` holds into `self`.
    fn shift_from(&self, from: &Self) {
        match from.take() {
            Some(v) => self.put(v),
            None => {
                self.take();
            }
        }
    }
}

/// Slot for arbitrary cloneable values.
pub struct ObjectSlot<T>(AtomicCell<Option<T>>);

impl<T: Clone + Send> Slot<T> for ObjectSlot<T> {
    fn empty() -> Self {
        Self(AtomicCell::new(None))
    }

    fn put(&self, value: T) {
        self.0.store(Some(value));
    }

    fn get(&self) -> Option<T> {
        // Consumer-only, so nobody can observe the brief gap.
        let v = self.0.take()?;
        let copy = v.clone();
        self.0.store(Some(v));
        Some(copy)
    }

    fn take(&self) -> Option<T> {
        self.0.take()
    }
}

impl<T> fmt::Debug for ObjectSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObjectSlot")
    }
}

/// Bounded array queue of objects.
pub type ArrayObjectQueue<T> = ArrayQueue<T, ObjectSlot<T>>;
/// Unbounded linked-array queue of objects.
pub type LinkedArrayObjectQueue<T> = LinkedArrayQueue<T, ObjectSlot<T>>;

/// Bounded array queue of `i32`.
pub type ArrayIntQueue = ArrayQueue<i32, PrimitiveSlot<i32>>;
/// Bounded array queue of `i64`.
pub type ArrayLongQueue = ArrayQueue<i64, PrimitiveSlot<i64>>;
/// Bounded array queue of `u32`.
pub type ArrayU32Queue = ArrayQueue<u32, PrimitiveSlot<u32>>;
/// Bounded array queue of `u64`.
pub type ArrayU64Queue = ArrayQueue<u64, PrimitiveSlot<u64>>;
/// Bounded array queue of `f32`.
pub type ArrayFloatQueue = ArrayQueue<f32, PrimitiveSlot<f32>>;
/// Bounded array queue of `f64`.
pub type ArrayDoubleQueue = ArrayQueue<f64, PrimitiveSlot<f64>>;

/// Unbounded linked-array queue of `i32`.
pub type LinkedArrayIntQueue = LinkedArrayQueue<i32, PrimitiveSlot<i32>>;
/// Unbounded linked-array queue of `i64`.
pub type LinkedArrayLongQueue = LinkedArrayQueue<i64, PrimitiveSlot<i64>>;
/// Unbounded linked-array queue of `u32`.
pub type LinkedArrayU32Queue = LinkedArrayQueue<u32, PrimitiveSlot<u32>>;
/// Unbounded linked-array queue of `u64`.
pub type LinkedArrayU64Queue = LinkedArrayQueue<u64, PrimitiveSlot<u64>>;
/// Unbounded linked-array queue of `f32`.
pub type LinkedArrayFloatQueue = LinkedArrayQueue<f32, PrimitiveSlot<f32>>;
/// Unbounded linked-array queue of `f64`.
pub type LinkedArrayDoubleQueue = LinkedArrayQueue<f64, PrimitiveSlot<f64>>;
