//! Strands: the task substrate actors run on.
//!
//! A [`Strand`] is a handle to a logical thread of execution with the
//! operations the actor layer needs: `start`, `park`/`unpark`, `interrupt`,
//! `join` and `is_alive`. Each strand is backed by one OS thread.
//!
//! Threads that were not spawned as strands (the main thread, test threads)
//! are adopted on first use of [`Strand::current`], so they can park on a
//! mailbox and be unparked by producers like any actor.
//!
//! # Parking
//!
//! Each strand owns a single permit. [`Strand::unpark`] makes the permit
//! available; [`Strand::park`] consumes it or blocks until it appears. An
//! unpark that happens before the matching park is therefore never lost.
//! Parking also returns early when the strand has a pending interrupt.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, ErrorKind, Result};

static STRAND_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Strand>> = const { RefCell::new(None) };
}

/// Unique strand identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrandId(u64);

impl StrandId {
    fn next() -> Self {
        Self(STRAND_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strand-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrandState {
    New,
    Started,
    Terminated,
}

type Body = Box<dyn FnOnce() + Send + 'static>;

struct StrandInner {
    id: StrandId,
    name: String,
    stack_size: Option<usize>,
    permit: Mutex<bool>,
    unparked: Condvar,
    interrupted: AtomicBool,
    state: Mutex<StrandState>,
    terminated: Condvar,
    body: Mutex<Option<Body>>,
}

/// Handle to a strand. Cheap to clone.
#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

/// Marks the strand terminated when the body returns or unwinds.
struct TerminationGuard(Strand);

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        let inner = &self.0.inner;
        *inner.state.lock() = StrandState::Terminated;
        inner.terminated.notify_all();
        CURRENT.with(|c| c.borrow_mut().take());
        tracing::trace!(strand = %inner.id, name = %inner.name, "strand terminated");
    }
}

impl Strand {
    fn with_state(name: String, stack_size: Option<usize>, state: StrandState, body: Option<Body>) -> Self {
        Self {
            inner: Arc::new(StrandInner {
                id: StrandId::next(),
                name,
                stack_size,
                permit: Mutex::new(false),
                unparked: Condvar::new(),
                interrupted: AtomicBool::new(false),
                state: Mutex::new(state),
                terminated: Condvar::new(),
                body: Mutex::new(body),
            }),
        }
    }

    /// Creates an unstarted strand that will run `body`.
    pub fn new<F>(name: impl Into<String>, stack_size: Option<usize>, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_state(name.into(), stack_size, StrandState::New, Some(Box::new(body)))
    }

    /// Creates and starts a strand.
    pub fn spawn<F>(name: impl Into<String>, stack_size: Option<usize>, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let strand = Self::new(name, stack_size, body);
        strand.start()?;
        Ok(strand)
    }

    /// Starts the strand's thread.
    ///
    /// Fails with `AlreadyStarted` on the second call.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != StrandState::New {
                return Err(Error::new(ErrorKind::AlreadyStarted)
                    .with_message(format!("{} already started", self.inner.id)));
            }
            *state = StrandState::Started;
        }
        let Some(body) = self.inner.body.lock().take() else {
            return Err(Error::internal("strand body missing"));
        };

        let me = self.clone();
        let mut builder = thread::Builder::new().name(self.inner.name.clone());
        if let Some(size) = self.inner.stack_size {
            builder = builder.stack_size(size);
        }
        let spawned = builder.spawn(move || {
            let guard = TerminationGuard(me.clone());
            CURRENT.with(|c| *c.borrow_mut() = Some(me));
            body();
            drop(guard);
        });
        match spawned {
            Ok(_) => {
                tracing::trace!(strand = %self.inner.id, name = %self.inner.name, "strand started");
                Ok(())
            }
            Err(e) => {
                *self.inner.state.lock() = StrandState::Terminated;
                self.inner.terminated.notify_all();
                Err(Error::internal(format!("failed to spawn {}", self.inner.name)).with_source(e))
            }
        }
    }

    /// The strand running on the calling thread.
    ///
    /// A thread that was not spawned as a strand is adopted here.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(|c| {
            c.borrow_mut()
                .get_or_insert_with(|| {
                    let name = thread::current()
                        .name()
                        .map_or_else(|| "adopted".to_string(), str::to_string);
                    let strand = Self::with_state(name, None, StrandState::Started, None);
                    tracing::trace!(strand = %strand.inner.id, name = %strand.inner.name, "adopted thread");
                    strand
                })
                .clone()
        })
    }

    /// Returns the strand id.
    #[must_use]
    pub fn id(&self) -> StrandId {
        self.inner.id
    }

    /// Returns the strand name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Blocks the current strand until unparked or interrupted.
    pub fn park() {
        Self::current().park_inner(None);
    }

    /// Blocks the current strand until unparked, interrupted or `timeout` elapses.
    pub fn park_timeout(timeout: Duration) {
        Self::current().park_inner(Some(Instant::now() + timeout));
    }

    /// Blocks the current strand until unparked, interrupted or `deadline` passes.
    pub fn park_until(deadline: Instant) {
        Self::current().park_inner(Some(deadline));
    }

    fn park_inner(&self, deadline: Option<Instant>) {
        let mut permit = self.inner.permit.lock();
        while !*permit && !self.inner.interrupted.load(Ordering::Acquire) {
            match deadline {
                Some(d) => {
                    if self.inner.unparked.wait_until(&mut permit, d).timed_out() {
                        break;
                    }
                }
                None => self.inner.unparked.wait(&mut permit),
            }
        }
        *permit = false;
    }

    /// Makes the park permit available, waking the strand if it is parked.
    pub fn unpark(&self) {
        let mut permit = self.inner.permit.lock();
        *permit = true;
        self.inner.unparked.notify_one();
    }

    /// Yields the current thread's time slice.
    pub fn yield_now() {
        thread::yield_now();
    }

    /// Sets the interrupt flag and wakes the strand.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        tracing::trace!(strand = %self.inner.id, "strand interrupted");
        self.unpark();
    }

    /// Tests and clears the current strand's interrupt flag.
    #[must_use]
    pub fn interrupted() -> bool {
        Self::current().inner.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Returns the interrupt flag without clearing it.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// True between `start` and the body returning.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        *self.inner.state.lock() == StrandState::Started
    }

    /// True once the body has returned (or unwound).
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.inner.state.lock() == StrandState::Terminated
    }

    /// Waits for the strand to terminate. Returns at once if it never started.
    pub fn join(&self) {
        let mut state = self.inner.state.lock();
        while *state == StrandState::Started {
            self.inner.terminated.wait(&mut state);
        }
    }

    /// Waits for the strand to terminate, failing with `Timeout` after `timeout`.
    pub fn join_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while *state == StrandState::Started {
            if self
                .inner
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
                && *state == StrandState::Started
            {
                return Err(Error::timeout().with_message(format!("join {}", self.inner.id)));
            }
        }
        Ok(())
    }

    /// True if both handles name the same strand.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Strand {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Strand {}

impl fmt::Debug for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strand")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn spawn_and_join() {
        init_test("spawn_and_join");
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let strand = Strand::spawn("worker", None, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        strand.join();
        crate::assert_with_log!(strand.is_done(), "terminated", true, strand.is_done());
        crate::assert_with_log!(!strand.is_alive(), "not alive", false, strand.is_alive());
        let n = counter.load(Ordering::SeqCst);
        crate::assert_with_log!(n == 1, "body ran once", 1, n);
        crate::test_complete!("spawn_and_join");
    }

    #[test]
    fn start_twice_fails() {
        init_test("start_twice_fails");
        let strand = Strand::new("once", None, || {});
        strand.start().unwrap();
        let err = strand.start().unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::AlreadyStarted,
            "second start rejected",
            ErrorKind::AlreadyStarted,
            err.kind()
        );
        strand.join();
    }

    #[test]
    fn unpark_before_park_is_not_lost() {
        init_test("unpark_before_park_is_not_lost");
        let me = Strand::current();
        me.unpark();
        let start = Instant::now();
        Strand::park_timeout(Duration::from_secs(5));
        let waited = start.elapsed();
        crate::assert_with_log!(
            waited < Duration::from_secs(1),
            "permit consumed immediately",
            "< 1s",
            waited
        );
    }

    #[test]
    fn interrupt_wakes_parked_strand() {
        init_test("interrupt_wakes_parked_strand");
        let observed = Arc::new(AtomicBool::new(false));
        let o = Arc::clone(&observed);
        let strand = Strand::spawn("sleeper", None, move || {
            while !Strand::interrupted() {
                Strand::park();
            }
            o.store(true, Ordering::SeqCst);
        })
        .unwrap();
        strand.interrupt();
        strand.join_timeout(Duration::from_secs(5)).unwrap();
        let seen = observed.load(Ordering::SeqCst);
        crate::assert_with_log!(seen, "interrupt observed", true, seen);
    }

    #[test]
    fn join_timeout_expires() {
        init_test("join_timeout_expires");
        let strand = Strand::spawn("parked", None, Strand::park).unwrap();
        let err = strand.join_timeout(Duration::from_millis(20)).unwrap_err();
        crate::assert_with_log!(err.is_timeout(), "timeout", true, err.kind());
        strand.unpark();
        strand.join();
        crate::test_complete!("join_timeout_expires");
    }

    #[test]
    fn current_is_stable_on_adopted_thread() {
        init_test("current_is_stable_on_adopted_thread");
        let a = Strand::current();
        let b = Strand::current();
        crate::assert_with_log!(a == b, "same strand", a.id(), b.id());
        crate::assert_with_log!(a.is_alive(), "adopted strand alive", true, a.is_alive());
    }
}
