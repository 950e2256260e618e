//! Actors: identity, mailbox ownership, lifecycle and the receive API.
//!
//! An actor is a body (a closure run once on its own [`Strand`]) plus a
//! mailbox that only the body consumes. Everything else talks to it through
//! references:
//!
//! - [`ActorRef<M>`]: typed, cloneable, send-only. Outlives the actor; sends
//!   to a dead actor are dropped.
//! - [`AnyActorRef`]: the same reference with the message type erased. Used
//!   by lifecycle notifications, supervisors and the registry, and can be
//!   downcast back to `ActorRef<M>`.
//! - [`ActorContext<M>`]: handed to the body; the only way to receive.
//!
//! # Lifecycle
//!
//! ```text
//! created ──spawn──► running ──body returns / fails / panics──► dead
//!                                                   │
//!                                  listeners notified, name released,
//!                                  mailbox accepts and drops
//! ```
//!
//! A body that returns `Err` with kind `Shutdown` (an orderly shutdown
//! observed by a receive) exits normally.
//!
//! # Example
//!
//! ```
//! use actorcore::actor::ActorBuilder;
//!
//! let echo = ActorBuilder::<String>::new()
//!     .spawn(|ctx| {
//!         let msg = ctx.receive()?;
//!         assert_eq!(msg, "hello");
//!         Ok(())
//!     })
//!     .unwrap();
//! echo.send("hello".to_string()).unwrap();
//! assert!(echo.join().is_normal());
//! ```

mod lifecycle;
mod registry;
mod selective;

pub use lifecycle::{ExitMessage, ExitReason, LifecycleMessage, ShutdownMessage, WatchRef};
pub use registry::Registry;
pub use selective::{fallible, Fallible, MessageProcessor};

pub(crate) use lifecycle::LifecycleListener;
pub(crate) use selective::Wait;

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{Error, ErrorKind, Result};
use crate::mailbox::{Mailbox, MailboxConfig, OverflowPolicy};
use crate::request_reply::{CallOutcome, RequestId, ResponseMessage};
use crate::runtime::ActorSystemConfig;
use crate::strand::Strand;

static ACTOR_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Mailbox capacity of the stand-in actor used for calls from plain threads.
const TEMP_MAILBOX_CAPACITY: usize = 5;

thread_local! {
    static CURRENT_ACTOR: RefCell<Option<Arc<dyn ActorHandle>>> = const { RefCell::new(None) };
}

// ============================================================================
// ActorId
// ============================================================================

/// Unique actor identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    fn next() -> Self {
        Self(ACTOR_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// What actually sits in a mailbox.
pub(crate) enum Envelope<M> {
    /// A user message.
    Message(M),
    /// A control message.
    Lifecycle(LifecycleMessage),
    /// The answer to a call made by this actor.
    Response(ResponseMessage),
}

/// A mailbox entry stamped with the actor's arrival ticket.
///
/// Tickets order entries across the user and control lanes: one sender's
/// entries always carry increasing tickets.
pub(crate) struct Queued<M> {
    pub(crate) ticket: u64,
    pub(crate) env: Arc<Envelope<M>>,
}

impl<M> Clone for Queued<M> {
    fn clone(&self) -> Self {
        Self {
            ticket: self.ticket,
            env: Arc::clone(&self.env),
        }
    }
}

// ============================================================================
// Type-erased handle
// ============================================================================

/// Operations every actor supports regardless of its message type.
pub(crate) trait ActorHandle: Send + Sync + 'static {
    fn id(&self) -> ActorId;
    fn name(&self) -> Option<String>;
    fn is_alive(&self) -> bool;
    fn exit_reason(&self) -> Option<ExitReason>;
    fn deliver_lifecycle(&self, msg: LifecycleMessage);
    fn deliver_response(&self, msg: ResponseMessage);
    fn add_listener(&self, listener: LifecycleListener);
    fn remove_listeners(&self, pred: &dyn Fn(&LifecycleListener) -> bool);
    fn interrupt(&self);
    fn throw_in(&self, error: Error);
    fn join_timeout(&self, timeout: Option<Duration>) -> Result<ExitReason>;
    fn begin_call(&self, watch: WatchRef);
    fn end_call(&self, watch: WatchRef);
    fn await_reply(
        &self,
        id: RequestId,
        watch: WatchRef,
        deadline: Option<Instant>,
    ) -> Result<Option<CallOutcome>>;
    fn default_call_timeout(&self) -> Option<Duration>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Untyped actor reference.
#[derive(Clone)]
pub struct AnyActorRef {
    handle: Arc<dyn ActorHandle>,
}

impl AnyActorRef {
    pub(crate) fn from_handle(handle: Arc<dyn ActorHandle>) -> Self {
        Self { handle }
    }

    pub(crate) fn handle(&self) -> &Arc<dyn ActorHandle> {
        &self.handle
    }

    /// The actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.handle.id()
    }

    /// The registered name, if any.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.handle.name()
    }

    /// True until the actor dies.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    /// How the actor died, once it has.
    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.handle.exit_reason()
    }

    /// Recovers the typed reference. `None` if `M` is not the actor's message type.
    #[must_use]
    pub fn downcast<M: Send + Sync + 'static>(&self) -> Option<ActorRef<M>> {
        Arc::clone(&self.handle)
            .into_any()
            .downcast::<ActorCell<M>>()
            .ok()
            .map(|cell| ActorRef { cell })
    }

    /// Asks the actor to stop. Its next receive reports `Shutdown`.
    pub fn shutdown(&self) {
        tracing::debug!(actor = %self.id(), "shutdown requested");
        self.handle
            .deliver_lifecycle(LifecycleMessage::Shutdown(ShutdownMessage::default()));
    }

    pub(crate) fn deliver_lifecycle(&self, msg: LifecycleMessage) {
        self.handle.deliver_lifecycle(msg);
    }

    pub(crate) fn deliver_response(&self, msg: ResponseMessage) {
        self.handle.deliver_response(msg);
    }

    /// Interrupts the actor's strand.
    pub fn interrupt(&self) {
        self.handle.interrupt();
    }

    /// Raises `error` from the actor's next receive.
    pub fn throw_in(&self, error: Error) {
        self.handle.throw_in(error);
    }

    /// Waits for the actor to die; `None` waits forever.
    pub fn join_timeout(&self, timeout: Option<Duration>) -> Result<ExitReason> {
        self.handle.join_timeout(timeout)
    }

    /// Links two actors: whichever dies first notifies the other.
    pub fn link(&self, other: &Self) {
        if self.id() == other.id() {
            return;
        }
        tracing::debug!(actor = %self.id(), peer = %other.id(), "link");
        self.handle.add_listener(LifecycleListener::Link { peer: other.clone() });
        other.handle.add_listener(LifecycleListener::Link { peer: self.clone() });
    }

    /// Removes a link in both directions.
    pub fn unlink(&self, other: &Self) {
        tracing::debug!(actor = %self.id(), peer = %other.id(), "unlink");
        let (me, peer) = (self.id(), other.id());
        self.handle.remove_listeners(&|l| l.is_link_to(peer));
        other.handle.remove_listeners(&|l| l.is_link_to(me));
    }

    /// Makes `self` watch `target`; `self` is told when `target` dies.
    pub fn watch(&self, target: &Self) -> WatchRef {
        let watch = WatchRef::new();
        self.watch_as(target, watch);
        watch
    }

    /// Installs a watch under a reference allocated by the caller.
    pub(crate) fn watch_as(&self, target: &Self, watch: WatchRef) {
        tracing::debug!(watcher = %self.id(), target = %target.id(), watch = %watch, "watch");
        target.handle.add_listener(LifecycleListener::Watch {
            watcher: self.clone(),
            watch,
        });
    }

    /// Cancels a watch on `target`.
    pub fn unwatch(&self, target: &Self, watch: WatchRef) {
        tracing::debug!(watcher = %self.id(), target = %target.id(), watch = %watch, "unwatch");
        target.handle.remove_listeners(&|l| l.is_watch(watch));
    }
}

impl PartialEq for AnyActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AnyActorRef {}

impl Hash for AnyActorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for AnyActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "AnyActorRef({} {name:?})", self.id()),
            None => write!(f, "AnyActorRef({})", self.id()),
        }
    }
}

impl fmt::Display for AnyActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({name})", self.id()),
            None => write!(f, "{}", self.id()),
        }
    }
}

// ============================================================================
// ActorCell
// ============================================================================

type ExitMapper<M> = Arc<dyn Fn(ExitMessage) -> M + Send + Sync>;

#[derive(Default)]
struct LifecycleState {
    listeners: SmallVec<[LifecycleListener; 4]>,
    death: Option<ExitReason>,
}

/// Shared state of one actor.
pub(crate) struct ActorCell<M> {
    id: ActorId,
    name: Mutex<Option<String>>,
    self_ref: Weak<ActorCell<M>>,
    mailbox: Mailbox<Queued<M>>,
    /// Exit notifications, shutdown requests and call responses. Unbounded,
    /// so control traffic never competes with user messages for capacity.
    control: Mailbox<Queued<M>>,
    tickets: AtomicU64,
    strand: OnceLock<Strand>,
    lifecycle: Mutex<LifecycleState>,
    thrown_in: Mutex<Option<Error>>,
    shutdown_requested: AtomicBool,
    shutdown_reported: AtomicBool,
    exit_mapper: Option<ExitMapper<M>>,
    pending_calls: Mutex<SmallVec<[WatchRef; 2]>>,
    /// The message a processor is looking at right now.
    current_message: Mutex<Option<Weak<Envelope<M>>>>,
    /// Bumped on every consumer-side deletion.
    mutations: AtomicU64,
    registry: Option<Registry>,
    call_timeout: Option<Duration>,
}

struct CellOptions<M> {
    mailbox: MailboxConfig,
    exit_mapper: Option<ExitMapper<M>>,
    registry: Option<Registry>,
    call_timeout: Option<Duration>,
}

impl<M: Send + Sync + 'static> ActorCell<M> {
    fn new(options: CellOptions<M>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: ActorId::next(),
            name: Mutex::new(None),
            self_ref: weak.clone(),
            mailbox: Mailbox::new(options.mailbox),
            control: Mailbox::new(MailboxConfig::unbounded()),
            tickets: AtomicU64::new(0),
            strand: OnceLock::new(),
            lifecycle: Mutex::new(LifecycleState::default()),
            thrown_in: Mutex::new(None),
            shutdown_requested: AtomicBool::new(false),
            shutdown_reported: AtomicBool::new(false),
            exit_mapper: options.exit_mapper,
            pending_calls: Mutex::new(SmallVec::new()),
            current_message: Mutex::new(None),
            mutations: AtomicU64::new(0),
            registry: options.registry,
            call_timeout: options.call_timeout,
        })
    }

    fn any_ref(&self) -> Option<AnyActorRef> {
        let cell: Arc<dyn ActorHandle> = self.self_ref.upgrade()?;
        Some(AnyActorRef::from_handle(cell))
    }

    fn is_dead(&self) -> bool {
        self.lifecycle.lock().death.is_some()
    }

    /// Enqueues a user message, applying the `Interrupt` overflow policy.
    fn enqueue(&self, msg: M, sync: bool) -> Result<()> {
        if self.is_dead() {
            tracing::trace!(actor = %self.id, "message to dead actor dropped");
            return Ok(());
        }
        let entry = self.stamp(Envelope::Message(msg));
        let sent = if sync {
            self.mailbox.send_sync(entry)
        } else {
            self.mailbox.send(entry)
        };
        match sent {
            Err(e)
                if e.kind() == ErrorKind::CapacityExceeded
                    && self.mailbox.policy() == OverflowPolicy::Interrupt =>
            {
                tracing::warn!(actor = %self.id, "mailbox full, interrupting owner");
                self.throw_in(e);
                Ok(())
            }
            other => other,
        }
    }

    /// Enqueues a control message. Never blocks and never fails: the
    /// control lane ignores the user mailbox's capacity.
    fn enqueue_control(&self, env: Envelope<M>) {
        if self.is_dead() {
            tracing::trace!(actor = %self.id, "control message to dead actor dropped");
            return;
        }
        if !self.control.offer(self.stamp(env)) {
            tracing::error!(actor = %self.id, "unbounded control lane rejected a message");
        }
    }

    fn stamp(&self, env: Envelope<M>) -> Queued<M> {
        Queued {
            ticket: self.tickets.fetch_add(1, Ordering::Relaxed),
            env: Arc::new(env),
        }
    }

    fn bind_owner(&self, strand: Strand) {
        self.mailbox.set_owner(strand.clone());
        self.control.set_owner(strand);
    }

    fn queued(&self) -> usize {
        self.mailbox.size() + self.control.size()
    }

    fn register(&self, name: &str) -> Result<()> {
        let Some(registry) = &self.registry else {
            return Err(Error::new(ErrorKind::InvalidConfig)
                .with_message(format!("{} has no registry to register {name} in", self.id)));
        };
        let me = self
            .any_ref()
            .ok_or_else(|| Error::internal("registering a dropped actor"))?;
        registry.register(name, me)?;
        let previous = self.name.lock().replace(name.to_string());
        if let Some(old) = previous.filter(|old| old != name) {
            registry.unregister(&old, self.id);
        }
        Ok(())
    }

    fn unregister(&self) {
        let name = self.name.lock().clone();
        if let (Some(registry), Some(name)) = (&self.registry, name) {
            registry.unregister(&name, self.id);
        }
    }

    /// Records the death, releases the name and notifies every listener once.
    fn die(&self, reason: ExitReason) {
        let listeners = {
            let mut state = self.lifecycle.lock();
            if state.death.is_some() {
                return;
            }
            state.death = Some(reason.clone());
            std::mem::take(&mut state.listeners)
        };
        self.mailbox.close();
        self.control.close();
        self.unregister();
        match &reason {
            ExitReason::Normal => tracing::info!(actor = %self.id, "actor stopped"),
            ExitReason::Failed(e) => {
                tracing::info!(actor = %self.id, error = %e, "actor failed");
            }
        }
        if let Some(me) = self.any_ref() {
            for listener in &listeners {
                listener.dead(&me, &reason);
            }
        }
    }

    fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    /// Reports a pending shutdown request once.
    fn check_shutdown(&self) -> Result<()> {
        if self.shutdown_requested.load(Ordering::Acquire)
            && !self.shutdown_reported.swap(true, Ordering::AcqRel)
        {
            return Err(Error::shutdown());
        }
        Ok(())
    }

    fn check_thrown_in(&self) -> Result<()> {
        if let Some(e) = self.thrown_in.lock().take() {
            // The interrupt that accompanied the error has done its job.
            let _ = Strand::interrupted();
            return Err(e);
        }
        Ok(())
    }

    fn unwrap_message(env: Arc<Envelope<M>>) -> Result<M> {
        match Arc::try_unwrap(env) {
            Ok(Envelope::Message(m)) => Ok(m),
            Ok(_) => Err(Error::internal("accepted a non-user envelope")),
            Err(_) => Err(Error::internal("accepted message is still shared")),
        }
    }

    fn is_calling(&self, watch: WatchRef) -> bool {
        self.pending_calls.lock().contains(&watch)
    }
}

impl<M: Send + Sync + 'static> ActorHandle for ActorCell<M> {
    fn id(&self) -> ActorId {
        self.id
    }

    fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    fn is_alive(&self) -> bool {
        !self.is_dead()
    }

    fn exit_reason(&self) -> Option<ExitReason> {
        self.lifecycle.lock().death.clone()
    }

    fn deliver_lifecycle(&self, msg: LifecycleMessage) {
        if let (LifecycleMessage::Exit(exit), Some(mapper)) = (&msg, &self.exit_mapper) {
            if exit.watch.is_some_and(|w| !self.is_calling(w)) {
                self.enqueue_control(Envelope::Message(mapper(exit.clone())));
                return;
            }
        }
        self.enqueue_control(Envelope::Lifecycle(msg));
    }

    fn deliver_response(&self, msg: ResponseMessage) {
        self.enqueue_control(Envelope::Response(msg));
    }

    fn add_listener(&self, listener: LifecycleListener) {
        let mut state = self.lifecycle.lock();
        if let Some(reason) = state.death.clone() {
            drop(state);
            if let Some(me) = self.any_ref() {
                listener.dead(&me, &reason);
            }
            return;
        }
        state.listeners.push(listener);
    }

    fn remove_listeners(&self, pred: &dyn Fn(&LifecycleListener) -> bool) {
        self.lifecycle.lock().listeners.retain(|l| !pred(l));
    }

    fn interrupt(&self) {
        if let Some(owner) = self.mailbox.owner() {
            owner.interrupt();
        }
    }

    fn throw_in(&self, error: Error) {
        tracing::debug!(actor = %self.id, error = %error, "error thrown in");
        *self.thrown_in.lock() = Some(error);
        self.interrupt();
    }

    fn join_timeout(&self, timeout: Option<Duration>) -> Result<ExitReason> {
        let Some(strand) = self.strand.get() else {
            return self.exit_reason().ok_or_else(|| {
                Error::new(ErrorKind::NotInActor).with_message(format!("{} cannot be joined", self.id))
            });
        };
        match timeout {
            Some(t) => strand.join_timeout(t)?,
            None => strand.join(),
        }
        Ok(self.exit_reason().unwrap_or(ExitReason::Normal))
    }

    fn begin_call(&self, watch: WatchRef) {
        self.pending_calls.lock().push(watch);
    }

    fn end_call(&self, watch: WatchRef) {
        self.pending_calls.lock().retain(|w| *w != watch);
    }

    fn await_reply(
        &self,
        id: RequestId,
        watch: WatchRef,
        deadline: Option<Instant>,
    ) -> Result<Option<CallOutcome>> {
        self.receive_reply(id, watch, deadline)
    }

    fn default_call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Current actor
// ============================================================================

/// The actor running on the calling thread, if any.
pub(crate) fn current_actor() -> Option<Arc<dyn ActorHandle>> {
    CURRENT_ACTOR.with(|c| c.borrow().clone())
}

/// Installs an actor as current for the guard's lifetime.
pub(crate) struct CurrentActorGuard {
    previous: Option<Arc<dyn ActorHandle>>,
}

impl CurrentActorGuard {
    pub(crate) fn set(actor: Arc<dyn ActorHandle>) -> Self {
        let previous = CURRENT_ACTOR.with(|c| c.borrow_mut().replace(actor));
        Self { previous }
    }
}

impl Drop for CurrentActorGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_ACTOR.with(|c| *c.borrow_mut() = previous);
    }
}

/// A mailbox bound to the calling thread, for calls made outside any actor.
pub(crate) struct TempActor {
    cell: Arc<ActorCell<()>>,
}

impl TempActor {
    pub(crate) fn new() -> Self {
        let cell = ActorCell::new(CellOptions {
            mailbox: MailboxConfig::bounded(TEMP_MAILBOX_CAPACITY, OverflowPolicy::Throw),
            exit_mapper: None,
            registry: None,
            call_timeout: None,
        });
        cell.bind_owner(Strand::current());
        Self { cell }
    }

    pub(crate) fn handle(&self) -> Arc<dyn ActorHandle> {
        Arc::clone(&self.cell) as Arc<dyn ActorHandle>
    }
}

impl Drop for TempActor {
    fn drop(&mut self) {
        // Late responses are dropped from now on.
        self.cell.lifecycle.lock().death = Some(ExitReason::Normal);
        self.cell.mailbox.close();
        self.cell.control.close();
    }
}

// ============================================================================
// ActorRef
// ============================================================================

/// Typed, send-only actor reference.
pub struct ActorRef<M> {
    cell: Arc<ActorCell<M>>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<M: Send + Sync + 'static> ActorRef<M> {
    /// The actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// The registered name, if any.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.cell.name.lock().clone()
    }

    /// Sends a message.
    ///
    /// Dropped silently if the actor is dead. A full bounded mailbox behaves
    /// per its [`OverflowPolicy`].
    pub fn send(&self, msg: M) -> Result<()> {
        self.cell.enqueue(msg, false)
    }

    /// Sends a message and yields so the receiver can run.
    ///
    /// With the `Block` policy this waits for room in a full mailbox.
    pub fn send_sync(&self, msg: M) -> Result<()> {
        self.cell.enqueue(msg, true)
    }

    /// The untyped reference.
    #[must_use]
    pub fn as_any(&self) -> AnyActorRef {
        AnyActorRef::from_handle(Arc::clone(&self.cell) as Arc<dyn ActorHandle>)
    }

    /// True until the actor dies.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.cell.is_dead()
    }

    /// How the actor died, once it has.
    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.cell.exit_reason()
    }

    /// Messages currently queued.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.cell.queued()
    }

    /// Waits for the actor to die.
    pub fn join(&self) -> ExitReason {
        self.cell
            .join_timeout(None)
            .unwrap_or_else(ExitReason::Failed)
    }

    /// Waits up to `timeout` for the actor to die.
    pub fn join_timeout(&self, timeout: Duration) -> Result<ExitReason> {
        self.cell.join_timeout(Some(timeout))
    }

    /// Asks the actor to stop gracefully.
    pub fn shutdown(&self) {
        self.as_any().shutdown();
    }

    /// Interrupts the actor's strand.
    pub fn interrupt(&self) {
        self.cell.interrupt();
    }

    /// Raises `error` from the actor's next receive.
    pub fn throw_in(&self, error: Error) {
        self.cell.throw_in(error);
    }

    /// Links this actor with `other`.
    pub fn link(&self, other: &AnyActorRef) {
        self.as_any().link(other);
    }

    /// Removes the link with `other`.
    pub fn unlink(&self, other: &AnyActorRef) {
        self.as_any().unlink(other);
    }
}

impl<M> PartialEq for ActorRef<M> {
    fn eq(&self, other: &Self) -> bool {
        self.cell.id == other.cell.id
    }
}

impl<M> Eq for ActorRef<M> {}

impl<M> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorRef({})", self.cell.id)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and spawns an actor.
pub struct ActorBuilder<M> {
    name: Option<String>,
    mailbox: MailboxConfig,
    exit_mapper: Option<ExitMapper<M>>,
    registry: Option<Registry>,
    thread_name_prefix: String,
    stack_size: Option<usize>,
    call_timeout: Option<Duration>,
}

impl<M: Send + Sync + 'static> ActorBuilder<M> {
    /// A builder with default configuration and no registry.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&ActorSystemConfig::default(), None)
    }

    pub(crate) fn from_config(config: &ActorSystemConfig, registry: Option<Registry>) -> Self {
        Self {
            name: None,
            mailbox: config.default_mailbox(),
            exit_mapper: None,
            registry,
            thread_name_prefix: config.thread_name_prefix.clone(),
            stack_size: config.thread_stack_size,
            call_timeout: config.default_call_timeout,
        }
    }

    /// Registers the actor under `name` before it starts.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mailbox shape and overflow policy.
    #[must_use]
    pub fn mailbox(mut self, config: MailboxConfig) -> Self {
        self.mailbox = config;
        self
    }

    /// Delivers exit notifications for this actor's watches as ordinary
    /// messages built by `mapper`, instead of handling them as lifecycle
    /// messages.
    #[must_use]
    pub fn watch_notifications<F>(mut self, mapper: F) -> Self
    where
        F: Fn(ExitMessage) -> M + Send + Sync + 'static,
    {
        self.exit_mapper = Some(Arc::new(mapper));
        self
    }

    /// The registry used for naming.
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Timeout for calls made by this actor that give none.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Spawns the actor on a fresh strand running `body`.
    pub fn spawn<F>(self, body: F) -> Result<ActorRef<M>>
    where
        F: FnOnce(&ActorContext<M>) -> Result<()> + Send + 'static,
    {
        let cell = ActorCell::new(CellOptions {
            mailbox: self.mailbox,
            exit_mapper: self.exit_mapper,
            registry: self.registry,
            call_timeout: self.call_timeout,
        });
        let thread_name = match &self.name {
            Some(name) => format!("{}-{name}", self.thread_name_prefix),
            None => format!("{}-{}", self.thread_name_prefix, cell.id),
        };
        let run_cell = Arc::clone(&cell);
        let strand = Strand::new(thread_name, self.stack_size, move || run(run_cell, body));
        cell.bind_owner(strand.clone());
        let _ = cell.strand.set(strand.clone());
        if let Some(name) = &self.name {
            cell.register(name)?;
        }
        if let Err(e) = strand.start() {
            cell.die(ExitReason::Failed(e.clone()));
            return Err(e);
        }
        Ok(ActorRef { cell })
    }
}

impl<M: Send + Sync + 'static> Default for ActorBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for ActorBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorBuilder")
            .field("name", &self.name)
            .field("mailbox", &self.mailbox)
            .field("watch_notifications", &self.exit_mapper.is_some())
            .finish_non_exhaustive()
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn run<M, F>(cell: Arc<ActorCell<M>>, body: F)
where
    M: Send + Sync + 'static,
    F: FnOnce(&ActorContext<M>) -> Result<()>,
{
    let _current = CurrentActorGuard::set(Arc::clone(&cell) as Arc<dyn ActorHandle>);
    let span = tracing::info_span!("actor", id = %cell.id, name = ?cell.name.lock().clone());
    let _enter = span.enter();
    tracing::info!("actor started");

    let ctx = ActorContext {
        cell: Arc::clone(&cell),
    };
    let reason = match panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
        Ok(Ok(())) => ExitReason::Normal,
        Ok(Err(e)) if e.is_shutdown() => ExitReason::Normal,
        Ok(Err(e)) => ExitReason::Failed(e),
        Err(payload) => ExitReason::Failed(
            Error::internal(format!("actor panicked: {}", panic_message(payload.as_ref()))),
        ),
    };
    cell.die(reason);
}

// ============================================================================
// ActorContext
// ============================================================================

/// The running actor's view of itself. Only the body holds one.
///
/// All methods take `&self`, so a processor closure can capture the context
/// and receive again from inside a selective receive.
pub struct ActorContext<M> {
    cell: Arc<ActorCell<M>>,
}

impl<M: Send + Sync + 'static> ActorContext<M> {
    /// The actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// A reference to this actor.
    #[must_use]
    pub fn self_ref(&self) -> ActorRef<M> {
        ActorRef {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Waits for the next message.
    pub fn receive(&self) -> Result<M> {
        self.receive_selective(None, |_: &M| true)
    }

    /// Waits up to `timeout` for the next message; `None` if none arrived.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<M>> {
        match self.receive_selective(Some(timeout), |_: &M| true) {
            Ok(m) => Ok(Some(m)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Takes the next message if one is already queued.
    pub fn try_receive(&self) -> Result<Option<M>> {
        self.try_receive_selective(|_: &M| true)
    }

    /// Waits for the first message `processor` accepts.
    ///
    /// Rejected messages stay queued in their original order. Lifecycle
    /// messages are offered to the processor's lifecycle hook, then handled
    /// by default: a link exit fails with `Lifecycle`, a shutdown request
    /// fails with `Shutdown`, a watch exit is logged. With a `timeout`,
    /// expiry fails with `Timeout`.
    pub fn receive_selective<P>(&self, timeout: Option<Duration>, mut processor: P) -> Result<M>
    where
        P: MessageProcessor<M>,
    {
        self.cell.check_shutdown()?;
        let wait = timeout.map_or(Wait::Forever, |t| Wait::Until(Instant::now() + t));
        let env = self
            .cell
            .receive_envelope(wait, |env| self.cell.classify_user(env, &mut processor))?;
        match env {
            Some(env) => ActorCell::unwrap_message(env),
            None => Err(Error::timeout()),
        }
    }

    /// Selective receive that returns `None` instead of waiting.
    pub fn try_receive_selective<P>(&self, mut processor: P) -> Result<Option<M>>
    where
        P: MessageProcessor<M>,
    {
        self.cell.check_shutdown()?;
        self.cell
            .receive_envelope(Wait::Poll, |env| self.cell.classify_user(env, &mut processor))?
            .map(ActorCell::unwrap_message)
            .transpose()
    }

    /// Links this actor with `other`.
    pub fn link(&self, other: &AnyActorRef) {
        self.self_ref().as_any().link(other);
    }

    /// Removes the link with `other`.
    pub fn unlink(&self, other: &AnyActorRef) {
        self.self_ref().as_any().unlink(other);
    }

    /// Watches `target`.
    pub fn watch(&self, target: &AnyActorRef) -> WatchRef {
        self.self_ref().as_any().watch(target)
    }

    /// Cancels a watch.
    pub fn unwatch(&self, target: &AnyActorRef, watch: WatchRef) {
        self.self_ref().as_any().unwatch(target, watch);
    }

    /// Registers this actor under `name`.
    pub fn register(&self, name: &str) -> Result<()> {
        self.cell.register(name)
    }

    /// Releases this actor's registered name.
    pub fn unregister(&self) {
        self.cell.unregister();
        *self.cell.name.lock() = None;
    }

    /// True once a shutdown request has been observed.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.cell.shutdown_requested.load(Ordering::Acquire)
    }

    /// Messages currently queued.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.cell.queued()
    }

    /// The registry this actor registers in, if any.
    #[must_use]
    pub fn registry(&self) -> Option<&Registry> {
        self.cell.registry.as_ref()
    }
}

impl<M> fmt::Debug for ActorContext<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorContext({})", self.cell.id)
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

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn body_error_is_recorded_as_failure() {
        init_test("body_error_is_recorded_as_failure");
        let actor = ActorBuilder::<()>::new()
            .spawn(|_| Err(Error::user("bad")))
            .unwrap();
        let reason = actor.join_timeout(WAIT).unwrap();
        let msg = reason.error().map(ToString::to_string);
        crate::assert_with_log!(msg.as_deref() == Some("bad"), "failure recorded", "bad", msg);
        crate::assert_with_log!(!actor.is_alive(), "dead", false, actor.is_alive());
        crate::test_complete!("body_error_is_recorded_as_failure");
    }

    #[test]
    fn panic_is_recorded_as_failure() {
        init_test("panic_is_recorded_as_failure");
        let actor = ActorBuilder::<()>::new()
            .spawn(|_| panic!("kaboom"))
            .unwrap();
        let reason = actor.join_timeout(WAIT).unwrap();
        let text = reason.to_string();
        crate::assert_with_log!(text.contains("kaboom"), "panic message kept", "kaboom", text);
    }

    #[test]
    fn send_to_dead_actor_is_dropped() {
        init_test("send_to_dead_actor_is_dropped");
        let actor = ActorBuilder::<u32>::new().spawn(|_| Ok(())).unwrap();
        actor.join_timeout(WAIT).unwrap();
        let sent = actor.send(1);
        crate::assert_with_log!(sent.is_ok(), "send is a no-op", true, sent.is_ok());
        crate::assert_with_log!(
            actor.pending_messages() == 0,
            "nothing queued",
            0,
            actor.pending_messages()
        );
    }

    #[test]
    fn link_exit_fails_survivor() {
        init_test("link_exit_fails_survivor");
        let doomed = ActorBuilder::<()>::new()
            .spawn(|ctx| {
                ctx.receive()?;
                Err(Error::user("doomed"))
            })
            .unwrap();
        let survivor = ActorBuilder::<()>::new()
            .spawn(|ctx| {
                ctx.receive()?;
                Ok(())
            })
            .unwrap();
        survivor.link(&doomed.as_any());
        doomed.send(()).unwrap();
        let reason = survivor.join_timeout(WAIT).unwrap();
        let kind = reason.error().map(Error::kind);
        crate::assert_with_log!(
            kind == Some(ErrorKind::Lifecycle),
            "survivor dies with lifecycle error",
            Some(ErrorKind::Lifecycle),
            kind
        );
        crate::test_complete!("link_exit_fails_survivor");
    }

    #[test]
    fn watch_of_dead_actor_fires_immediately() {
        init_test("watch_of_dead_actor_fires_immediately");
        #[derive(Debug)]
        enum Msg {
            Down(ExitMessage),
        }
        let dead = ActorBuilder::<()>::new().spawn(|_| Ok(())).unwrap();
        dead.join_timeout(WAIT).unwrap();
        let target = dead.as_any();
        let watcher = ActorBuilder::<Msg>::new()
            .watch_notifications(Msg::Down)
            .spawn(move |ctx| {
                let watch = ctx.watch(&target);
                let Msg::Down(exit) = ctx.receive_selective(Some(WAIT), |_: &Msg| true)?;
                if exit.watch == Some(watch) && exit.reason.is_normal() {
                    Ok(())
                } else {
                    Err(Error::user("wrong notification"))
                }
            })
            .unwrap();
        let reason = watcher.join_timeout(WAIT).unwrap();
        crate::assert_with_log!(reason.is_normal(), "notified", "normal", reason);
    }

    #[test]
    fn shutdown_request_exits_normally() {
        init_test("shutdown_request_exits_normally");
        let actor = ActorBuilder::<u8>::new()
            .spawn(|ctx| loop {
                ctx.receive()?;
            })
            .unwrap();
        actor.shutdown();
        let reason = actor.join_timeout(WAIT).unwrap();
        crate::assert_with_log!(reason.is_normal(), "normal exit", "normal", reason);
    }

    #[test]
    fn throw_in_surfaces_from_receive() {
        init_test("throw_in_surfaces_from_receive");
        let actor = ActorBuilder::<u8>::new()
            .spawn(|ctx| {
                ctx.receive()?;
                Ok(())
            })
            .unwrap();
        actor.throw_in(Error::user("injected"));
        let reason = actor.join_timeout(WAIT).unwrap();
        let text = reason.error().map(ToString::to_string);
        crate::assert_with_log!(
            text.as_deref() == Some("injected"),
            "thrown-in error",
            "injected",
            text
        );
    }

    #[test]
    fn interrupt_policy_targets_owner() {
        init_test("interrupt_policy_targets_owner");
        let gate = Arc::new(AtomicBool::new(false));
        let g = Arc::clone(&gate);
        let actor = ActorBuilder::<u8>::new()
            .mailbox(MailboxConfig::bounded(1, OverflowPolicy::Interrupt))
            .spawn(move |ctx| {
                while !g.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                loop {
                    ctx.receive()?;
                }
            })
            .unwrap();
        actor.send(1).unwrap();
        let overflow = actor.send(2);
        crate::assert_with_log!(overflow.is_ok(), "sender unaffected", true, overflow.is_ok());
        gate.store(true, Ordering::SeqCst);
        let reason = actor.join_timeout(WAIT).unwrap();
        let kind = reason.error().map(Error::kind);
        crate::assert_with_log!(
            kind == Some(ErrorKind::CapacityExceeded),
            "owner got capacity error",
            Some(ErrorKind::CapacityExceeded),
            kind
        );
    }

    #[test]
    fn exit_fan_out_reaches_every_watcher_once() {
        init_test("exit_fan_out_reaches_every_watcher_once");
        let target = ActorBuilder::<()>::new()
            .spawn(|ctx| {
                ctx.receive()?;
                Err(Error::user("gone"))
            })
            .unwrap();
        let notified = Arc::new(AtomicUsize::new(0));
        let watchers: Vec<_> = (0..4)
            .map(|_| {
                let t = target.as_any();
                let n = Arc::clone(&notified);
                ActorBuilder::<ExitMessage>::new()
                    .watch_notifications(|e| e)
                    .spawn(move |ctx| {
                        ctx.watch(&t);
                        let exit = ctx.receive()?;
                        if exit.actor.id() == t.id() && !exit.reason.is_normal() {
                            n.fetch_add(1, Ordering::SeqCst);
                        }
                        // No second notification may follow.
                        if ctx.receive_timeout(Duration::from_millis(50))?.is_some() {
                            return Err(Error::user("duplicate notification"));
                        }
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();
        // Give every watcher time to install its watch.
        std::thread::sleep(Duration::from_millis(50));
        target.send(()).unwrap();
        for w in &watchers {
            let reason = w.join_timeout(WAIT).unwrap();
            crate::assert_with_log!(reason.is_normal(), "watcher ok", "normal", reason);
        }
        let n = notified.load(Ordering::SeqCst);
        crate::assert_with_log!(n == 4, "each watcher notified once", 4, n);
        crate::test_complete!("exit_fan_out_reaches_every_watcher_once");
    }

    #[test]
    fn downcast_recovers_typed_ref() {
        init_test("downcast_recovers_typed_ref");
        let actor = ActorBuilder::<u64>::new()
            .spawn(|ctx| {
                ctx.receive()?;
                Ok(())
            })
            .unwrap();
        let any = actor.as_any();
        let typed = any.downcast::<u64>();
        crate::assert_with_log!(typed.is_some(), "same type", true, typed.is_some());
        let wrong = any.downcast::<String>();
        crate::assert_with_log!(wrong.is_none(), "other type", true, wrong.is_none());
        actor.send(1).unwrap();
        actor.join_timeout(WAIT).unwrap();
    }
}
