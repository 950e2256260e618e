//! A capability-based read/write lock with optimistic reads.
//!
//! Every acquisition returns a [`Stamp`] that must be handed back to release
//! or convert the lock. There are three modes:
//!
//! - **write**: exclusive;
//! - **read**: shared, any number of holders;
//! - **optimistic read**: no lock at all, just a version snapshot checked
//!   later with [`StampedLock::validate`].
//!
//! The lock word packs a version and a reader count. Releasing a write lock
//! advances the version, which invalidates every optimistic stamp taken
//! before it. Reader counts beyond what the word holds spill into a side
//! counter.
//!
//! Blocking acquisitions queue in FIFO order. A waiter spins briefly before
//! parking. When the lock is released the waiter at the head of the queue is
//! woken, or the whole run of readers at the head if it starts with a reader.
//! The non-blocking `try_*` methods never queue and succeed whenever the
//! current holders allow it.
//!
//! # Example
//!
//! ```
//! use actorcore::sync::StampedLock;
//!
//! let lock = StampedLock::new();
//! let stamp = lock.try_optimistic_read();
//! // ... read shared state ...
//! if !lock.validate(stamp) {
//!     let stamp = lock.read_lock();
//!     // ... read again under the lock ...
//!     lock.unlock_read(stamp).unwrap();
//! }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::runtime::ActorSystemConfig;
use crate::strand::Strand;

// Lock word layout: low 7 bits reader count, bit 7 writer, the rest version.
const LG_READERS: u32 = 7;
const RUNIT: u64 = 1;
const WBIT: u64 = 1 << LG_READERS;
const RBITS: u64 = WBIT - 1;
const RFULL: u64 = RBITS - 1;
const ABITS: u64 = RBITS | WBIT;
const SBITS: u64 = !RBITS;
const ORIGIN: u64 = WBIT << 1;

/// Token returned by lock acquisitions. The zero stamp means failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[must_use]
pub struct Stamp(u64);

impl Stamp {
    /// The stamp every failed attempt returns.
    pub const FAILED: Self = Self(0);

    /// True unless this is [`Stamp::FAILED`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The raw stamp value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stamp-{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

struct Waiter {
    mode: Mode,
    strand: Strand,
}

/// A read/write lock whose acquisitions return stamps.
pub struct StampedLock {
    state: AtomicU64,
    reader_overflow: AtomicU64,
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
    queued: AtomicUsize,
    spins: u32,
}

impl StampedLock {
    /// An unlocked lock using the default spin budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_spins(ActorSystemConfig::default_lock_spins())
    }

    /// An unlocked lock that spins `spins` times before parking a waiter.
    #[must_use]
    pub fn with_spins(spins: u32) -> Self {
        Self {
            state: AtomicU64::new(ORIGIN),
            reader_overflow: AtomicU64::new(0),
            waiters: Mutex::new(VecDeque::new()),
            queued: AtomicUsize::new(0),
            spins,
        }
    }

    // ------------------------------------------------------------------
    // Write mode
    // ------------------------------------------------------------------

    /// Acquires the write lock, waiting as long as needed.
    pub fn write_lock(&self) -> Stamp {
        if self.queued.load(Ordering::SeqCst) == 0 {
            let stamp = self.try_write_lock();
            if stamp.is_valid() {
                return stamp;
            }
        }
        self.acquire_queued(Mode::Write, None)
    }

    /// Acquires the write lock if it is free right now.
    pub fn try_write_lock(&self) -> Stamp {
        let s = self.state.load(Ordering::SeqCst);
        if s & ABITS != 0 {
            return Stamp::FAILED;
        }
        let next = s + WBIT;
        match self
            .state
            .compare_exchange(s, next, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Stamp(next),
            Err(_) => Stamp::FAILED,
        }
    }

    /// Acquires the write lock, waiting at most `timeout`.
    pub fn try_write_lock_for(&self, timeout: Duration) -> Stamp {
        let stamp = self.try_write_lock();
        if stamp.is_valid() || timeout.is_zero() {
            return stamp;
        }
        self.acquire_queued(Mode::Write, Some(Instant::now() + timeout))
    }

    /// Releases the write lock taken with `stamp`.
    pub fn unlock_write(&self, stamp: Stamp) -> Result<()> {
        let s = self.state.load(Ordering::SeqCst);
        if s != stamp.0 || stamp.0 & WBIT == 0 {
            return Err(Error::illegal_lock_state(format!(
                "{stamp} does not hold the write lock"
            )));
        }
        self.release_write(s);
        Ok(())
    }

    /// Releases the write lock if it is held, whoever holds it.
    pub fn try_unlock_write(&self) -> bool {
        let s = self.state.load(Ordering::SeqCst);
        if s & WBIT == 0 {
            return false;
        }
        self.release_write(s);
        true
    }

    fn release_write(&self, s: u64) {
        self.state.store(next_version(s), Ordering::SeqCst);
        self.wake_head();
    }

    // ------------------------------------------------------------------
    // Read mode
    // ------------------------------------------------------------------

    /// Acquires a read lock, waiting as long as needed.
    pub fn read_lock(&self) -> Stamp {
        if self.queued.load(Ordering::SeqCst) == 0 {
            let stamp = self.try_read_lock();
            if stamp.is_valid() {
                return stamp;
            }
        }
        self.acquire_queued(Mode::Read, None)
    }

    /// Acquires a read lock unless a writer holds the lock.
    pub fn try_read_lock(&self) -> Stamp {
        let backoff = Backoff::new();
        loop {
            let s = self.state.load(Ordering::SeqCst);
            let m = s & ABITS;
            if m == WBIT {
                return Stamp::FAILED;
            }
            if m < RFULL {
                let next = s + RUNIT;
                if self
                    .state
                    .compare_exchange(s, next, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Stamp(next);
                }
            } else if let Some(next) = self.inc_reader_overflow(s) {
                return Stamp(next);
            }
            backoff.snooze();
        }
    }

    /// Acquires a read lock, waiting at most `timeout`.
    pub fn try_read_lock_for(&self, timeout: Duration) -> Stamp {
        let stamp = self.try_read_lock();
        if stamp.is_valid() || timeout.is_zero() {
            return stamp;
        }
        self.acquire_queued(Mode::Read, Some(Instant::now() + timeout))
    }

    /// Releases a read lock taken with `stamp`.
    pub fn unlock_read(&self, stamp: Stamp) -> Result<()> {
        let backoff = Backoff::new();
        loop {
            let s = self.state.load(Ordering::SeqCst);
            let m = s & ABITS;
            if s & SBITS != stamp.0 & SBITS || stamp.0 & ABITS == 0 || m == 0 || m == WBIT {
                return Err(Error::illegal_lock_state(format!(
                    "{stamp} does not hold a read lock"
                )));
            }
            if self.release_read(s) {
                return Ok(());
            }
            backoff.snooze();
        }
    }

    /// Releases one read hold if any is held, whoever holds it.
    pub fn try_unlock_read(&self) -> bool {
        let backoff = Backoff::new();
        loop {
            let s = self.state.load(Ordering::SeqCst);
            let m = s & ABITS;
            if m == 0 || m >= WBIT {
                return false;
            }
            if self.release_read(s) {
                return true;
            }
            backoff.snooze();
        }
    }

    /// One attempt at dropping a reader from state `s`.
    fn release_read(&self, s: u64) -> bool {
        let m = s & ABITS;
        if m < RFULL {
            if self
                .state
                .compare_exchange(s, s - RUNIT, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if m == RUNIT {
                    self.wake_head();
                }
                return true;
            }
            return false;
        }
        self.dec_reader_overflow(s).is_some()
    }

    /// Bumps the side counter when the word's reader bits are full.
    fn inc_reader_overflow(&self, s: u64) -> Option<u64> {
        if s & ABITS != RFULL {
            Strand::yield_now();
            return None;
        }
        // RBITS in the word marks the side counter as busy.
        self.state
            .compare_exchange(s, s | RBITS, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.reader_overflow.fetch_add(1, Ordering::SeqCst);
        self.state.store(s, Ordering::SeqCst);
        Some(s)
    }

    fn dec_reader_overflow(&self, s: u64) -> Option<u64> {
        if s & ABITS != RFULL {
            Strand::yield_now();
            return None;
        }
        self.state
            .compare_exchange(s, s | RBITS, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let next = if self.reader_overflow.load(Ordering::SeqCst) > 0 {
            self.reader_overflow.fetch_sub(1, Ordering::SeqCst);
            s
        } else {
            s - RUNIT
        };
        self.state.store(next, Ordering::SeqCst);
        Some(next)
    }

    // ------------------------------------------------------------------
    // Optimistic mode
    // ------------------------------------------------------------------

    /// A stamp to validate later, or [`Stamp::FAILED`] if write-locked.
    pub fn try_optimistic_read(&self) -> Stamp {
        let s = self.state.load(Ordering::SeqCst);
        if s & WBIT == 0 {
            Stamp(s & SBITS)
        } else {
            Stamp::FAILED
        }
    }

    /// True if no write lock was taken since `stamp` was issued.
    ///
    /// Always true for a stamp of a lock still held; always false for
    /// [`Stamp::FAILED`].
    #[must_use]
    pub fn validate(&self, stamp: Stamp) -> bool {
        fence(Ordering::Acquire);
        stamp.0 & SBITS == self.state.load(Ordering::SeqCst) & SBITS
    }

    // ------------------------------------------------------------------
    // Mode-agnostic release and conversions
    // ------------------------------------------------------------------

    /// Releases whichever lock `stamp` holds.
    pub fn unlock(&self, stamp: Stamp) -> Result<()> {
        if stamp.0 & ABITS == WBIT {
            self.unlock_write(stamp)
        } else {
            self.unlock_read(stamp)
        }
    }

    /// Upgrades `stamp` to a write stamp without releasing it.
    ///
    /// Works from the write lock (no-op), from an optimistic stamp if the
    /// lock is free, and from a read lock if it is the only reader.
    pub fn try_convert_to_write_lock(&self, stamp: Stamp) -> Stamp {
        let a = stamp.0 & ABITS;
        loop {
            let s = self.state.load(Ordering::SeqCst);
            if s & SBITS != stamp.0 & SBITS {
                return Stamp::FAILED;
            }
            let m = s & ABITS;
            let next = if m == 0 {
                if a != 0 {
                    return Stamp::FAILED;
                }
                s + WBIT
            } else if m == WBIT {
                return if a == m { stamp } else { Stamp::FAILED };
            } else if m == RUNIT && a != 0 {
                s - RUNIT + WBIT
            } else {
                return Stamp::FAILED;
            };
            if self
                .state
                .compare_exchange(s, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Stamp(next);
            }
        }
    }

    /// Converts `stamp` to a read stamp.
    ///
    /// A write lock is downgraded and the readers waiting behind it are
    /// woken; an optimistic stamp acquires a read lock if still valid.
    pub fn try_convert_to_read_lock(&self, stamp: Stamp) -> Stamp {
        let a = stamp.0 & ABITS;
        let backoff = Backoff::new();
        loop {
            let s = self.state.load(Ordering::SeqCst);
            if s & SBITS != stamp.0 & SBITS {
                return Stamp::FAILED;
            }
            let m = s & ABITS;
            if m == 0 {
                if a != 0 {
                    return Stamp::FAILED;
                }
                if self
                    .state
                    .compare_exchange(s, s + RUNIT, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Stamp(s + RUNIT);
                }
            } else if m == WBIT {
                if a != m {
                    return Stamp::FAILED;
                }
                let next = s + WBIT + RUNIT;
                self.state.store(next, Ordering::SeqCst);
                self.wake_head();
                return Stamp(next);
            } else if a != 0 && a < WBIT {
                return stamp;
            } else {
                return Stamp::FAILED;
            }
            backoff.spin();
        }
    }

    /// Releases whatever `stamp` holds and returns an optimistic stamp
    /// valid from this point on.
    pub fn try_convert_to_optimistic_read(&self, stamp: Stamp) -> Stamp {
        let a = stamp.0 & ABITS;
        let backoff = Backoff::new();
        loop {
            let s = self.state.load(Ordering::SeqCst);
            if s & SBITS != stamp.0 & SBITS {
                return Stamp::FAILED;
            }
            let m = s & ABITS;
            if m == 0 {
                return if a == 0 { Stamp(s) } else { Stamp::FAILED };
            }
            if m == WBIT {
                if a != m {
                    return Stamp::FAILED;
                }
                let next = next_version(s);
                self.state.store(next, Ordering::SeqCst);
                self.wake_head();
                return Stamp(next);
            }
            if a == 0 || a >= WBIT {
                return Stamp::FAILED;
            }
            if self.release_read(s) {
                return Stamp(s & SBITS);
            }
            backoff.snooze();
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// True while a writer holds the lock.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) & WBIT != 0
    }

    /// True while at least one reader holds the lock.
    #[must_use]
    pub fn is_read_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) & RBITS != 0
    }

    /// Number of read holds, including those in the side counter.
    #[must_use]
    pub fn read_lock_count(&self) -> u64 {
        let m = self.state.load(Ordering::SeqCst) & RBITS;
        if m >= RFULL {
            RFULL + self.reader_overflow.load(Ordering::SeqCst)
        } else {
            m
        }
    }

    /// Number of callers waiting in the queue.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Wait queue
    // ------------------------------------------------------------------

    fn try_acquire(&self, mode: Mode) -> Stamp {
        match mode {
            Mode::Read => self.try_read_lock(),
            Mode::Write => self.try_write_lock(),
        }
    }

    /// Queues the caller and waits for its turn. `None` deadline waits forever.
    fn acquire_queued(&self, mode: Mode, deadline: Option<Instant>) -> Stamp {
        let waiter = Arc::new(Waiter {
            mode,
            strand: Strand::current(),
        });
        {
            let mut waiters = self.waiters.lock();
            waiters.push_back(Arc::clone(&waiter));
            self.queued.fetch_add(1, Ordering::SeqCst);
        }
        tracing::trace!(?mode, strand = %waiter.strand.id(), "lock waiter queued");

        let backoff = Backoff::new();
        let mut spins = self.spins;
        loop {
            if self.is_eligible(&waiter) {
                let stamp = self.try_acquire(mode);
                if stamp.is_valid() {
                    self.dequeue(&waiter);
                    return stamp;
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.dequeue(&waiter);
                    // Our departure may have put someone else at the head.
                    self.wake_head();
                    tracing::trace!(?mode, "lock wait timed out");
                    return Stamp::FAILED;
                }
            }
            if spins > 0 {
                spins -= 1;
                backoff.spin();
                continue;
            }
            if waiter.strand.is_interrupted() {
                // Parking returns at once for an interrupted strand.
                Strand::yield_now();
            }
            match deadline {
                Some(d) => Strand::park_until(d),
                None => Strand::park(),
            }
        }
    }

    /// The head waiter, or any reader in the run of readers at the head.
    fn is_eligible(&self, waiter: &Arc<Waiter>) -> bool {
        let waiters = self.waiters.lock();
        for w in waiters.iter() {
            if Arc::ptr_eq(w, waiter) {
                return true;
            }
            if w.mode == Mode::Write || waiter.mode == Mode::Write {
                return false;
            }
        }
        false
    }

    fn dequeue(&self, waiter: &Arc<Waiter>) {
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            waiters.remove(pos);
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wakes the head writer, or every reader up to the first writer.
    fn wake_head(&self) {
        if self.queued.load(Ordering::SeqCst) == 0 {
            return;
        }
        let waiters = self.waiters.lock();
        match waiters.front() {
            Some(head) if head.mode == Mode::Write => head.strand.unpark(),
            Some(_) => {
                for w in waiters.iter().take_while(|w| w.mode == Mode::Read) {
                    w.strand.unpark();
                }
            }
            None => {}
        }
    }
}

/// State after a write release: the next version with no holders.
const fn next_version(s: u64) -> u64 {
    let next = s.wrapping_add(WBIT);
    if next == 0 {
        ORIGIN
    } else {
        next
    }
}

impl Default for StampedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StampedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.load(Ordering::SeqCst);
        let status = if s & WBIT != 0 {
            "write-locked".to_string()
        } else if s & RBITS != 0 {
            format!("read-locked({})", self.read_lock_count())
        } else {
            "unlocked".to_string()
        };
        f.debug_struct("StampedLock")
            .field("state", &status)
            .field("queued", &self.queue_length())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::wait_until;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn write_excludes_everything() {
        init_test("write_excludes_everything");
        let lock = StampedLock::new();
        let w = lock.write_lock();
        crate::assert_with_log!(w.is_valid(), "write acquired", true, w);
        crate::assert_with_log!(lock.is_write_locked(), "write locked", true, lock);
        let r = lock.try_read_lock();
        crate::assert_with_log!(!r.is_valid(), "no reader", false, r);
        let w2 = lock.try_write_lock();
        crate::assert_with_log!(!w2.is_valid(), "no second writer", false, w2);
        let o = lock.try_optimistic_read();
        crate::assert_with_log!(!o.is_valid(), "no optimistic", false, o);
        lock.unlock_write(w).unwrap();
        crate::assert_with_log!(!lock.is_write_locked(), "released", false, lock);
        crate::test_complete!("write_excludes_everything");
    }

    #[test]
    fn readers_share_and_block_writers() {
        init_test("readers_share_and_block_writers");
        let lock = StampedLock::new();
        let a = lock.read_lock();
        let b = lock.try_read_lock();
        crate::assert_with_log!(b.is_valid(), "second reader", true, b);
        crate::assert_with_log!(lock.read_lock_count() == 2, "two readers", 2, lock.read_lock_count());
        let w = lock.try_write_lock_for(Duration::from_millis(20));
        crate::assert_with_log!(!w.is_valid(), "writer timed out", false, w);
        crate::assert_with_log!(lock.queue_length() == 0, "queue empty", 0, lock.queue_length());
        lock.unlock_read(a).unwrap();
        lock.unlock(b).unwrap();
        crate::assert_with_log!(!lock.is_read_locked(), "released", false, lock);
        let w = lock.try_write_lock();
        crate::assert_with_log!(w.is_valid(), "writer after readers", true, w);
    }

    #[test]
    fn optimistic_stamp_invalidated_by_write() {
        init_test("optimistic_stamp_invalidated_by_write");
        let lock = StampedLock::new();
        let o = lock.try_optimistic_read();
        crate::assert_with_log!(lock.validate(o), "fresh stamp valid", true, o);
        let r = lock.read_lock();
        crate::assert_with_log!(lock.validate(o), "readers keep it valid", true, o);
        lock.unlock_read(r).unwrap();
        let w = lock.write_lock();
        crate::assert_with_log!(!lock.validate(o), "writer invalidates", false, o);
        lock.unlock_write(w).unwrap();
        crate::assert_with_log!(!lock.validate(o), "stays invalid", false, o);
        crate::assert_with_log!(!lock.validate(Stamp::FAILED), "zero never valid", false, 0);
    }

    #[test]
    fn mismatched_unlock_is_illegal() {
        init_test("mismatched_unlock_is_illegal");
        let lock = StampedLock::new();
        let err = lock.unlock_write(Stamp(12345)).unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::IllegalLockState,
            "bad write unlock",
            ErrorKind::IllegalLockState,
            err.kind()
        );
        let r = lock.read_lock();
        let err = lock.unlock_write(r).unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::IllegalLockState,
            "read stamp on write unlock",
            ErrorKind::IllegalLockState,
            err.kind()
        );
        lock.unlock_read(r).unwrap();
        let err = lock.unlock_read(r).unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::IllegalLockState,
            "double read unlock",
            ErrorKind::IllegalLockState,
            err.kind()
        );
        let ok = lock.try_unlock_write() || lock.try_unlock_read();
        crate::assert_with_log!(!ok, "nothing to force-release", false, ok);
    }

    #[test]
    fn conversions() {
        init_test("conversions");
        let lock = StampedLock::new();

        let r = lock.read_lock();
        let w = lock.try_convert_to_write_lock(r);
        crate::assert_with_log!(w.is_valid(), "sole reader upgrades", true, w);
        crate::assert_with_log!(lock.is_write_locked(), "now writing", true, lock);

        let r = lock.try_convert_to_read_lock(w);
        crate::assert_with_log!(r.is_valid(), "downgrade", true, r);
        crate::assert_with_log!(
            lock.is_read_locked() && !lock.is_write_locked(),
            "now reading",
            "read-locked",
            lock
        );

        let other = lock.read_lock();
        let up = lock.try_convert_to_write_lock(r);
        crate::assert_with_log!(!up.is_valid(), "no upgrade with two readers", false, up);
        lock.unlock_read(other).unwrap();

        let o = lock.try_convert_to_optimistic_read(r);
        crate::assert_with_log!(lock.validate(o), "optimistic after read", true, o);
        crate::assert_with_log!(!lock.is_read_locked(), "read released", false, lock);

        let w = lock.try_convert_to_write_lock(o);
        crate::assert_with_log!(w.is_valid(), "optimistic upgrades when free", true, w);
        let o2 = lock.try_convert_to_optimistic_read(w);
        crate::assert_with_log!(o2.is_valid() && !lock.is_write_locked(), "write released", true, o2);
        crate::assert_with_log!(!lock.validate(o), "old optimistic stale", false, o);
        crate::test_complete!("conversions");
    }

    #[test]
    fn reader_count_overflows_into_side_counter() {
        init_test("reader_count_overflows_into_side_counter");
        let lock = StampedLock::new();
        let stamps: Vec<Stamp> = (0..300).map(|_| lock.read_lock()).collect();
        crate::assert_with_log!(
            lock.read_lock_count() == 300,
            "all holds counted",
            300,
            lock.read_lock_count()
        );
        for stamp in &stamps {
            lock.unlock_read(*stamp).unwrap();
        }
        crate::assert_with_log!(!lock.is_read_locked(), "all released", false, lock);
        let w = lock.try_write_lock();
        crate::assert_with_log!(w.is_valid(), "writer afterwards", true, w);
    }

    #[test]
    fn queued_writer_goes_before_later_reader() {
        init_test("queued_writer_goes_before_later_reader");
        let lock = Arc::new(StampedLock::with_spins(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = lock.read_lock();

        let writer = {
            let (lock, order) = (Arc::clone(&lock), Arc::clone(&order));
            std::thread::spawn(move || {
                let w = lock.write_lock();
                order.lock().push("writer");
                lock.unlock_write(w).unwrap();
            })
        };
        let queued = wait_until(WAIT, || lock.queue_length() == 1);
        crate::assert_with_log!(queued, "writer queued", 1, lock.queue_length());

        let reader = {
            let (lock, order) = (Arc::clone(&lock), Arc::clone(&order));
            std::thread::spawn(move || {
                let r = lock.read_lock();
                order.lock().push("reader");
                lock.unlock_read(r).unwrap();
            })
        };
        let queued = wait_until(WAIT, || lock.queue_length() == 2);
        crate::assert_with_log!(queued, "reader queued behind writer", 2, lock.queue_length());

        lock.unlock_read(first).unwrap();
        writer.join().unwrap();
        reader.join().unwrap();
        let got = order.lock().clone();
        crate::assert_with_log!(got == ["writer", "reader"], "fifo", ["writer", "reader"], got);
        crate::test_complete!("queued_writer_goes_before_later_reader");
    }

    #[test]
    fn writer_release_wakes_reader_run() {
        init_test("writer_release_wakes_reader_run");
        let lock = Arc::new(StampedLock::with_spins(0));
        let w = lock.write_lock();
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    let r = lock.read_lock();
                    let ok = wait_until(WAIT, || lock.read_lock_count() == 3);
                    lock.unlock_read(r).unwrap();
                    ok
                })
            })
            .collect();
        let queued = wait_until(WAIT, || lock.queue_length() == 3);
        crate::assert_with_log!(queued, "readers queued", 3, lock.queue_length());
        lock.unlock_write(w).unwrap();
        for handle in readers {
            let together = handle.join().unwrap();
            crate::assert_with_log!(together, "readers held together", true, together);
        }
    }
}
