//! Mailboxes: a single-consumer queue plus owner affinity and wakeup.
//!
//! A [`Mailbox`] is filled by any number of senders and drained only by its
//! owner strand. Every successful enqueue unparks the owner; the owner blocks
//! in [`Mailbox::await_until`] between scans. Because a strand's park permit
//! survives an unpark that arrives early, a scan-then-await loop never misses
//! a message that lands between the scan and the park.
//!
//! Bounded mailboxes use an [`ArrayObjectQueue`]; unbounded ones use a
//! [`LinkedArrayObjectQueue`]. What a sender experiences when a bounded
//! mailbox is full is decided by its [`OverflowPolicy`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use crossbeam_queue::SegQueue;
use crossbeam_utils::Backoff;

use crate::error::{Error, Result};
use crate::queue::{
    ArrayObjectQueue, ElementPointer, LinkedArrayObjectQueue, ObjectSlot, QueueFull,
    SingleConsumerQueue,
};
use crate::strand::Strand;

const BACKOFF_ATTEMPTS: u32 = 10;

/// What happens when a message is sent to a full bounded mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverflowPolicy {
    /// The sender gets a `CapacityExceeded` error.
    #[default]
    Throw,
    /// The message is silently dropped.
    Drop,
    /// The sender blocks until the owner frees a slot (backpressure).
    Block,
    /// The sender retries with backoff, then gets `CapacityExceeded`.
    Backoff,
    /// The message is dropped and the mailbox *owner* is interrupted with
    /// `CapacityExceeded`, which surfaces from its next receive.
    Interrupt,
}

/// Mailbox shape and overflow behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxConfig {
    /// `None` for an unbounded mailbox.
    pub capacity: Option<usize>,
    /// Full-mailbox behavior; ignored when unbounded.
    pub policy: OverflowPolicy,
}

impl MailboxConfig {
    /// An unbounded mailbox.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            policy: OverflowPolicy::Throw,
        }
    }

    /// A bounded mailbox with the given policy.
    #[must_use]
    pub const fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            policy,
        }
    }
}

/// Consumer cursor into a [`Mailbox`].
pub enum MailboxNode<T> {
    /// Position in a bounded mailbox.
    Index(u64),
    /// Position in an unbounded mailbox.
    Pointer(ElementPointer<ObjectSlot<T>>),
}

impl<T> Clone for MailboxNode<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Index(i) => Self::Index(*i),
            Self::Pointer(p) => Self::Pointer(p.clone()),
        }
    }
}

impl<T> fmt::Debug for MailboxNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => f.debug_tuple("Index").field(i).finish(),
            Self::Pointer(p) => f.debug_tuple("Pointer").field(p).finish(),
        }
    }
}

enum Storage<T> {
    Bounded(ArrayObjectQueue<T>),
    Unbounded(LinkedArrayObjectQueue<T>),
}

/// An actor's inbound queue.
pub struct Mailbox<T> {
    storage: Storage<T>,
    policy: OverflowPolicy,
    owner: OnceLock<Strand>,
    blocked_senders: SegQueue<Strand>,
    closed: AtomicBool,
}

impl<T: Clone + Send> Mailbox<T> {
    /// Creates a mailbox with no owner yet.
    #[must_use]
    pub fn new(config: MailboxConfig) -> Self {
        let storage = match config.capacity {
            Some(cap) if cap > 0 => Storage::Bounded(ArrayObjectQueue::new(cap)),
            _ => Storage::Unbounded(LinkedArrayObjectQueue::new()),
        };
        Self {
            storage,
            policy: config.policy,
            owner: OnceLock::new(),
            blocked_senders: SegQueue::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Binds the consuming strand. Returns `false` if a different owner is
    /// already bound.
    pub fn set_owner(&self, strand: Strand) -> bool {
        match self.owner.set(strand) {
            Ok(()) => true,
            Err(strand) => self.owner.get().is_some_and(|o| o.same(&strand)),
        }
    }

    /// The consuming strand, once bound.
    #[must_use]
    pub fn owner(&self) -> Option<&Strand> {
        self.owner.get()
    }

    /// True if the calling strand owns this mailbox.
    #[must_use]
    pub fn is_owned_by_current(&self) -> bool {
        self.owner.get().is_some_and(|o| o.same(&Strand::current()))
    }

    /// Overflow policy in effect.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    fn try_enqueue(&self, value: T) -> std::result::Result<(), QueueFull<T>> {
        match &self.storage {
            Storage::Bounded(q) => q.enqueue(value),
            Storage::Unbounded(q) => q.enqueue(value),
        }
    }

    /// Enqueues `value` and wakes the owner.
    ///
    /// Sending to a closed mailbox, or one whose owner has terminated, drops
    /// the message.
    /// On a full bounded mailbox the outcome follows the [`OverflowPolicy`];
    /// under `Interrupt` the error is returned so the caller can deliver it
    /// to the owner.
    pub fn send(&self, value: T) -> Result<()> {
        let mut value = value;
        let mut attempts = 0;
        let backoff = Backoff::new();
        loop {
            if self.is_closed() {
                tracing::trace!("message to closed mailbox dropped");
                return Ok(());
            }
            match self.try_enqueue(value) {
                Ok(()) => {
                    self.signal();
                    return Ok(());
                }
                Err(QueueFull(rejected)) => value = rejected,
            }
            match self.policy {
                OverflowPolicy::Throw | OverflowPolicy::Interrupt => {
                    return Err(Error::capacity_exceeded()
                        .with_message(format!("mailbox full ({} messages)", self.size())));
                }
                OverflowPolicy::Drop => {
                    tracing::debug!(size = self.size(), "mailbox full, message dropped");
                    return Ok(());
                }
                OverflowPolicy::Backoff => {
                    attempts += 1;
                    if attempts > BACKOFF_ATTEMPTS {
                        return Err(Error::capacity_exceeded()
                            .with_message(format!("mailbox full after {BACKOFF_ATTEMPTS} retries")));
                    }
                    backoff.snooze();
                }
                OverflowPolicy::Block => self.block_sender()?,
            }
        }
    }

    /// Parks the calling sender until the owner consumes something.
    fn block_sender(&self) -> Result<()> {
        let me = Strand::current();
        self.blocked_senders.push(me);
        // Re-check after registering: a slot may have opened in between, and
        // the retry in `send` will see it.
        if self.is_closed() || self.size() < self.capacity().unwrap_or(usize::MAX) {
            return Ok(());
        }
        tracing::trace!(size = self.size(), "sender blocked on full mailbox");
        Strand::park();
        if Strand::interrupted() {
            return Err(Error::interrupted().with_message("blocked on full mailbox"));
        }
        Ok(())
    }

    /// Enqueues `value` once, ignoring the overflow policy.
    ///
    /// Returns `false` if the mailbox is full. A closed mailbox accepts and
    /// drops.
    pub fn offer(&self, value: T) -> bool {
        if self.is_closed() {
            return true;
        }
        match self.try_enqueue(value) {
            Ok(()) => {
                self.signal();
                true
            }
            Err(_) => false,
        }
    }

    /// Stops accepting messages and releases blocked senders.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake_blocked_senders();
    }

    /// True once closed, or once the owner has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.owner.get().is_some_and(Strand::is_done)
    }

    /// Like [`send`](Self::send) but yields afterwards so the owner can run.
    pub fn send_sync(&self, value: T) -> Result<()> {
        self.send(value)?;
        Strand::yield_now();
        Ok(())
    }

    /// Wakes the owner.
    pub fn signal(&self) {
        if let Some(owner) = self.owner.get() {
            owner.unpark();
        }
    }

    pub(crate) fn wake_blocked_senders(&self) {
        while let Some(sender) = self.blocked_senders.pop() {
            sender.unpark();
        }
    }

    /// Blocks the owner until woken, interrupted or `deadline` passes.
    ///
    /// Returns `Interrupted` if the strand's interrupt flag was set; the
    /// flag is cleared.
    pub fn await_until(&self, deadline: Option<Instant>) -> Result<()> {
        if Strand::interrupted() {
            return Err(Error::interrupted());
        }
        match deadline {
            Some(d) => Strand::park_until(d),
            None => Strand::park(),
        }
        if Strand::interrupted() {
            return Err(Error::interrupted());
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Consumer-only operations
    // ---------------------------------------------------------------------

    /// The node after `node`, or the head for `None`.
    pub fn successor(&self, node: Option<&MailboxNode<T>>) -> Option<MailboxNode<T>> {
        match (&self.storage, node) {
            (Storage::Bounded(q), None) => q.successor(None).map(MailboxNode::Index),
            (Storage::Bounded(q), Some(MailboxNode::Index(i))) => {
                q.successor(Some(i)).map(MailboxNode::Index)
            }
            (Storage::Unbounded(q), None) => q.successor(None).map(MailboxNode::Pointer),
            (Storage::Unbounded(q), Some(MailboxNode::Pointer(p))) => {
                q.successor(Some(p)).map(MailboxNode::Pointer)
            }
            _ => None,
        }
    }

    /// The value at `node`.
    pub fn value(&self, node: &MailboxNode<T>) -> Option<T> {
        match (&self.storage, node) {
            (Storage::Bounded(q), MailboxNode::Index(i)) => q.value(i),
            (Storage::Unbounded(q), MailboxNode::Pointer(p)) => q.value(p),
            _ => None,
        }
    }

    /// Deletes `node`; see [`SingleConsumerQueue::delete`].
    pub fn delete(&self, node: &MailboxNode<T>) -> Option<MailboxNode<T>> {
        let next = match (&self.storage, node) {
            (Storage::Bounded(q), MailboxNode::Index(i)) => q.delete(i).map(MailboxNode::Index),
            (Storage::Unbounded(q), MailboxNode::Pointer(p)) => {
                q.delete(p).map(MailboxNode::Pointer)
            }
            _ => None,
        };
        self.wake_blocked_senders();
        next
    }

    /// Removes and returns the head message.
    pub fn poll(&self) -> Option<T> {
        let value = match &self.storage {
            Storage::Bounded(q) => q.poll(),
            Storage::Unbounded(q) => q.poll(),
        };
        if value.is_some() {
            self.wake_blocked_senders();
        }
        value
    }

    /// Queued message count.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.storage {
            Storage::Bounded(q) => q.size(),
            Storage::Unbounded(q) => q.size(),
        }
    }

    /// Capacity, or `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match &self.storage {
            Storage::Bounded(q) => q.capacity(),
            Storage::Unbounded(q) => q.capacity(),
        }
    }

    /// True if no message is visible to the owner.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.storage {
            Storage::Bounded(q) => q.is_empty(),
            Storage::Unbounded(q) => q.is_empty(),
        }
    }

    /// Queued messages in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        match &self.storage {
            Storage::Bounded(q) => q.snapshot(),
            Storage::Unbounded(q) => q.snapshot(),
        }
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match &self.storage {
            Storage::Bounded(q) => format!("{q:?}"),
            Storage::Unbounded(q) => format!("{q:?}"),
        };
        f.debug_struct("Mailbox")
            .field("storage", &shape)
            .field("policy", &self.policy)
            .field("owner", &self.owner.get().map(Strand::id))
            .finish()
    }
}
