//! Synchronization primitives for state shared outside the actor model.
//!
//! Actor state needs no locking: only the owning actor touches it. These
//! primitives are for the remaining cases, such as caches shared between
//! actors and plain threads.
//!
//! - [`StampedLock`]: read/write lock with optimistic reads and fair queueing

mod stamped_lock;

pub use stamped_lock::{Stamp, StampedLock};
