//! Supervisors: actors that start, watch and restart other actors.
//!
//! A supervisor owns an ordered list of children, each described by a
//! [`ChildSpec`]. It watches every child it starts; when one dies, the
//! supervisor's [`RestartStrategy`] and the child's [`ChildMode`] decide what
//! happens next:
//!
//! | mode        | normal exit | failure |
//! |-------------|-------------|---------|
//! | `Permanent` | restart     | restart |
//! | `Transient` | remove      | restart |
//! | `Temporary` | remove      | remove  |
//!
//! A restart that is part of a group restart (`AllForOne`, `RestForOne`)
//! applies the same table to each sibling, treating the siblings as alive.
//!
//! Each child may be restarted at most `max_restarts` times inside its
//! sliding `window`. One restart too many and the supervisor gives up: it
//! shuts the remaining children down and fails with `RestartLimitExceeded`,
//! which its own supervisor (if any) observes like any other failure.
//!
//! Shutting a child down sends it a shutdown request, waits up to the child's
//! shutdown deadline, then interrupts it and waits once more.
//!
//! # Example
//!
//! ```
//! use actorcore::actor::ActorBuilder;
//! use actorcore::supervision::{ChildSpec, RestartStrategy, SupervisorBuilder};
//!
//! let sup = SupervisorBuilder::new(RestartStrategy::OneForOne)
//!     .child(ChildSpec::new("worker", || {
//!         ActorBuilder::<u32>::new().spawn(|ctx| loop {
//!             ctx.receive()?;
//!         })
//!     }))
//!     .spawn()
//!     .unwrap();
//! assert!(sup.get_child("worker").unwrap().is_some());
//! sup.shutdown();
//! assert!(sup.join().is_normal());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actor::{
    ActorBuilder, ActorContext, ActorId, ActorRef, AnyActorRef, ExitMessage, ExitReason, Registry,
    WatchRef,
};
use crate::error::{Error, ErrorKind, Result};
use crate::mailbox::MailboxConfig;
use crate::request_reply::{self, CallerRef};
use crate::runtime::ActorSystemConfig;

/// Default restart budget of a child.
const DEFAULT_MAX_RESTARTS: u32 = 3;
/// Default restart window of a child.
const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(5);

// ============================================================================
// Policies
// ============================================================================

/// How the death of one child affects its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RestartStrategy {
    /// Only the dead child is restarted.
    ///
    /// Use when children are independent.
    #[default]
    OneForOne,

    /// Every child is shut down and restarted.
    ///
    /// Use when children share state that becomes inconsistent if one dies.
    AllForOne,

    /// The dead child and every child started after it are restarted.
    ///
    /// Use when later children depend on earlier ones.
    RestForOne,
}

/// Whether a child is restarted after it dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChildMode {
    /// Always restarted.
    #[default]
    Permanent,
    /// Restarted only after a failure.
    Transient,
    /// Never restarted.
    Temporary,
}

// ============================================================================
// ChildSpec
// ============================================================================

type StartFn = Arc<dyn Fn() -> Result<AnyActorRef> + Send + Sync>;

/// How to start and restart one child.
#[derive(Clone)]
pub struct ChildSpec {
    id: String,
    start: StartFn,
    mode: ChildMode,
    max_restarts: u32,
    window: Duration,
    shutdown_deadline: Option<Duration>,
}

impl ChildSpec {
    /// A permanent child started by `start`.
    ///
    /// `start` runs again for every restart, so it must build a fresh actor
    /// each time.
    pub fn new<M, F>(id: impl Into<String>, start: F) -> Self
    where
        M: Send + Sync + 'static,
        F: Fn() -> Result<ActorRef<M>> + Send + Sync + 'static,
    {
        Self::from_any(id, move || start().map(|actor| actor.as_any()))
    }

    /// Like [`new`](Self::new) for starters that return an untyped reference.
    pub fn from_any<F>(id: impl Into<String>, start: F) -> Self
    where
        F: Fn() -> Result<AnyActorRef> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            start: Arc::new(start),
            mode: ChildMode::Permanent,
            max_restarts: DEFAULT_MAX_RESTARTS,
            window: DEFAULT_RESTART_WINDOW,
            shutdown_deadline: None,
        }
    }

    /// Restart mode.
    #[must_use]
    pub fn mode(mut self, mode: ChildMode) -> Self {
        self.mode = mode;
        self
    }

    /// At most `max_restarts` restarts within `window`.
    #[must_use]
    pub fn max_restarts(mut self, max_restarts: u32, window: Duration) -> Self {
        self.max_restarts = max_restarts;
        self.window = window;
        self
    }

    /// Overrides the supervisor's shutdown deadline for this child.
    #[must_use]
    pub fn shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = Some(deadline);
        self
    }

    /// The child's id within its supervisor.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("max_restarts", &self.max_restarts)
            .field("window", &self.window)
            .field("shutdown_deadline", &self.shutdown_deadline)
            .finish_non_exhaustive()
    }
}

/// Sliding-window restart record of one child.
#[derive(Debug, Default)]
struct RestartHistory {
    restarts: VecDeque<Instant>,
}

impl RestartHistory {
    /// Records a restart at `now`; returns the restarts inside `window`.
    fn record(&mut self, now: Instant, window: Duration) -> usize {
        if let Some(cutoff) = now.checked_sub(window) {
            while self.restarts.front().is_some_and(|t| *t < cutoff) {
                self.restarts.pop_front();
            }
        }
        self.restarts.push_back(now);
        self.restarts.len()
    }
}

struct ChildEntry {
    spec: ChildSpec,
    actor: Option<AnyActorRef>,
    watch: Option<WatchRef>,
    history: RestartHistory,
}

impl fmt::Display for ChildEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actor {
            Some(actor) => write!(f, "{}({actor})", self.spec.id),
            None => write!(f, "{}(stopped)", self.spec.id),
        }
    }
}

// ============================================================================
// Messages and client handle
// ============================================================================

/// Mailbox message of a supervisor.
pub enum SupervisorMessage {
    /// Starts and adopts a child; replies with its reference.
    AddChild {
        /// The new child.
        spec: ChildSpec,
        /// Where the reply goes.
        from: CallerRef,
    },
    /// Forgets a child, optionally shutting it down; replies `true` if found.
    RemoveChild {
        /// Child id.
        id: String,
        /// Shut the child down as well.
        terminate: bool,
        /// Where the reply goes.
        from: CallerRef,
    },
    /// Replies with the child's current reference.
    GetChild {
        /// Child id.
        id: String,
        /// Where the reply goes.
        from: CallerRef,
    },
    /// Replies with the child ids in start order.
    Children {
        /// Where the reply goes.
        from: CallerRef,
    },
    /// A watched child died.
    ChildExit(ExitMessage),
}

impl fmt::Debug for SupervisorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddChild { spec, .. } => f.debug_tuple("AddChild").field(&spec.id).finish(),
            Self::RemoveChild { id, terminate, .. } => f
                .debug_struct("RemoveChild")
                .field("id", id)
                .field("terminate", terminate)
                .finish(),
            Self::GetChild { id, .. } => f.debug_tuple("GetChild").field(id).finish(),
            Self::Children { .. } => f.write_str("Children"),
            Self::ChildExit(exit) => f.debug_tuple("ChildExit").field(exit).finish(),
        }
    }
}

/// Client handle of a running supervisor.
#[derive(Clone)]
pub struct SupervisorRef {
    actor: ActorRef<SupervisorMessage>,
}

impl SupervisorRef {
    /// Recovers a supervisor handle from an untyped reference, e.g. one
    /// returned by [`get_child`](Self::get_child).
    #[must_use]
    pub fn from_any(actor: &AnyActorRef) -> Option<Self> {
        actor.downcast::<SupervisorMessage>().map(|actor| Self { actor })
    }

    /// Starts `spec` under the supervisor. Fails with `Supervisor` on a
    /// duplicate id, or with the child's start error.
    pub fn add_child(&self, spec: ChildSpec) -> Result<AnyActorRef> {
        request_reply::call(&self.actor, |from| SupervisorMessage::AddChild { spec, from }, None)
    }

    /// Removes child `id`, shutting it down if `terminate`.
    pub fn remove_child(&self, id: &str, terminate: bool) -> Result<bool> {
        let id = id.to_string();
        request_reply::call(
            &self.actor,
            |from| SupervisorMessage::RemoveChild {
                id,
                terminate,
                from,
            },
            None,
        )
    }

    /// The current reference of child `id`.
    pub fn get_child(&self, id: &str) -> Result<Option<AnyActorRef>> {
        let id = id.to_string();
        request_reply::call(&self.actor, |from| SupervisorMessage::GetChild { id, from }, None)
    }

    /// Child ids in start order.
    pub fn children(&self) -> Result<Vec<String>> {
        request_reply::call(&self.actor, |from| SupervisorMessage::Children { from }, None)
    }

    /// Shuts the supervisor and all its children down.
    pub fn shutdown(&self) {
        self.actor.shutdown();
    }

    /// The supervisor's actor id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    /// True until the supervisor dies.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.actor.is_alive()
    }

    /// The untyped reference, for supervising this supervisor.
    #[must_use]
    pub fn as_any(&self) -> AnyActorRef {
        self.actor.as_any()
    }

    /// Waits for the supervisor to die.
    pub fn join(&self) -> ExitReason {
        self.actor.join()
    }

    /// Waits up to `timeout` for the supervisor to die.
    pub fn join_timeout(&self, timeout: Duration) -> Result<ExitReason> {
        self.actor.join_timeout(timeout)
    }
}

impl fmt::Debug for SupervisorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SupervisorRef({})", self.actor.id())
    }
}

// ============================================================================
// Builder
// ============================================================================

type ChildInitializer = Box<dyn FnOnce() -> Result<Vec<ChildSpec>> + Send>;

/// Configures and spawns a supervisor.
pub struct SupervisorBuilder {
    strategy: RestartStrategy,
    children: Vec<ChildSpec>,
    initializer: Option<ChildInitializer>,
    actor: ActorBuilder<SupervisorMessage>,
    shutdown_deadline: Duration,
}

impl SupervisorBuilder {
    /// A supervisor with no children and default configuration.
    #[must_use]
    pub fn new(strategy: RestartStrategy) -> Self {
        Self::from_config(strategy, &ActorSystemConfig::default(), None)
    }

    pub(crate) fn from_config(
        strategy: RestartStrategy,
        config: &ActorSystemConfig,
        registry: Option<Registry>,
    ) -> Self {
        Self {
            strategy,
            children: Vec::new(),
            initializer: None,
            actor: ActorBuilder::from_config(config, registry),
            shutdown_deadline: config.default_shutdown_deadline,
        }
    }

    /// Adds an initial child.
    #[must_use]
    pub fn child(mut self, spec: ChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    /// Adds initial children.
    #[must_use]
    pub fn children(mut self, specs: impl IntoIterator<Item = ChildSpec>) -> Self {
        self.children.extend(specs);
        self
    }

    /// Computes the initial children on the supervisor's own thread.
    /// Cannot be combined with [`child`](Self::child).
    #[must_use]
    pub fn initializer<F>(mut self, init: F) -> Self
    where
        F: FnOnce() -> Result<Vec<ChildSpec>> + Send + 'static,
    {
        self.initializer = Some(Box::new(init));
        self
    }

    /// Registers the supervisor under `name`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.actor = self.actor.name(name);
        self
    }

    /// Supervisor mailbox configuration.
    #[must_use]
    pub fn mailbox(mut self, config: MailboxConfig) -> Self {
        self.actor = self.actor.mailbox(config);
        self
    }

    /// How long to wait for each child to stop.
    #[must_use]
    pub fn shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }

    /// Spawns the supervisor and starts the initial children in order.
    pub fn spawn(self) -> Result<SupervisorRef> {
        let initial = match (self.initializer, self.children.is_empty()) {
            (Some(_), false) => {
                return Err(Error::new(ErrorKind::InvalidConfig)
                    .with_message("supervisor takes child specs or an initializer, not both"));
            }
            (Some(init), true) => Initial::Deferred(init),
            (None, _) => Initial::Specs(self.children),
        };
        let mut state = Supervisor {
            strategy: self.strategy,
            children: Vec::new(),
            shutdown_deadline: self.shutdown_deadline,
        };
        let actor = self
            .actor
            .watch_notifications(SupervisorMessage::ChildExit)
            .spawn(move |ctx| {
                let result = state.supervise(ctx, initial);
                state.shutdown_children();
                result
            })?;
        Ok(SupervisorRef { actor })
    }
}

impl fmt::Debug for SupervisorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorBuilder")
            .field("strategy", &self.strategy)
            .field("children", &self.children)
            .field("initializer", &self.initializer.is_some())
            .field("shutdown_deadline", &self.shutdown_deadline)
            .finish_non_exhaustive()
    }
}

enum Initial {
    Specs(Vec<ChildSpec>),
    Deferred(ChildInitializer),
}

// ============================================================================
// Supervisor state (owned by the supervisor's thread)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restarted {
    Kept,
    Removed,
}

struct Supervisor {
    strategy: RestartStrategy,
    children: Vec<ChildEntry>,
    shutdown_deadline: Duration,
}

impl Supervisor {
    fn supervise(&mut self, ctx: &ActorContext<SupervisorMessage>, initial: Initial) -> Result<()> {
        let specs = match initial {
            Initial::Specs(specs) => specs,
            Initial::Deferred(init) => init()?,
        };
        for spec in specs {
            self.add_child(ctx, spec)?;
        }
        loop {
            match ctx.receive()? {
                SupervisorMessage::AddChild { spec, from } => {
                    from.reply_result(self.add_child(ctx, spec));
                }
                SupervisorMessage::RemoveChild {
                    id,
                    terminate,
                    from,
                } => from.reply(self.remove_child(&id, terminate)),
                SupervisorMessage::GetChild { id, from } => {
                    from.reply(self.position(&id).and_then(|i| self.children[i].actor.clone()));
                }
                SupervisorMessage::Children { from } => {
                    from.reply(
                        self.children
                            .iter()
                            .map(|c| c.spec.id.clone())
                            .collect::<Vec<_>>(),
                    );
                }
                SupervisorMessage::ChildExit(exit) => self.child_exited(ctx, &exit)?,
            }
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.children.iter().position(|c| c.spec.id == id)
    }

    fn add_child(&mut self, ctx: &ActorContext<SupervisorMessage>, spec: ChildSpec) -> Result<AnyActorRef> {
        if self.position(&spec.id).is_some() {
            return Err(Error::supervisor(format!("duplicate child {}", spec.id)));
        }
        tracing::debug!(supervisor = %ctx.id(), child = %spec.id, "adding child");
        self.children.push(ChildEntry {
            spec,
            actor: None,
            watch: None,
            history: RestartHistory::default(),
        });
        let idx = self.children.len() - 1;
        match self.start_child(ctx, idx) {
            Ok(actor) => Ok(actor),
            Err(e) => {
                self.children.remove(idx);
                Err(e)
            }
        }
    }

    fn start_child(&mut self, ctx: &ActorContext<SupervisorMessage>, idx: usize) -> Result<AnyActorRef> {
        let child = &mut self.children[idx];
        let actor = (child.spec.start)()?;
        child.watch = Some(ctx.watch(&actor));
        child.actor = Some(actor.clone());
        tracing::info!(supervisor = %ctx.id(), child = %child, "child started");
        Ok(actor)
    }

    fn remove_child(&mut self, id: &str, terminate: bool) -> bool {
        let Some(idx) = self.position(id) else {
            tracing::warn!(child = %id, "child not found");
            return false;
        };
        if terminate {
            self.shutdown_child(idx);
        } else {
            self.unwatch_child(idx);
        }
        self.children.remove(idx);
        true
    }

    fn unwatch_child(&mut self, idx: usize) {
        let child = &mut self.children[idx];
        if let (Some(actor), Some(watch)) = (&child.actor, child.watch.take()) {
            if let Some(me) = crate::actor::current_actor() {
                AnyActorRef::from_handle(me).unwatch(actor, watch);
            }
        }
    }

    /// Stops a child without triggering its exit handling.
    fn shutdown_child(&mut self, idx: usize) {
        self.unwatch_child(idx);
        let child = &mut self.children[idx];
        let Some(actor) = child.actor.take() else {
            return;
        };
        if !actor.is_alive() {
            return;
        }
        let deadline = child.spec.shutdown_deadline.unwrap_or(self.shutdown_deadline);
        tracing::info!(child = %child.spec.id, actor = %actor, "shutting down child");
        actor.shutdown();
        if actor.join_timeout(Some(deadline)).is_ok() {
            return;
        }
        tracing::warn!(child = %child.spec.id, ?deadline, "child ignored shutdown, interrupting");
        actor.interrupt();
        if actor.join_timeout(Some(deadline)).is_err() {
            tracing::warn!(child = %child.spec.id, "child did not stop");
        }
    }

    /// Stops every child, last started first.
    fn shutdown_children(&mut self) {
        if !self.children.is_empty() {
            tracing::info!(children = self.children.len(), "shutting down all children");
        }
        for idx in (0..self.children.len()).rev() {
            self.shutdown_child(idx);
        }
        self.children.clear();
    }

    fn child_exited(&mut self, ctx: &ActorContext<SupervisorMessage>, exit: &ExitMessage) -> Result<()> {
        let Some(idx) = self
            .children
            .iter()
            .position(|c| c.watch.is_some() && c.watch == exit.watch)
        else {
            tracing::debug!(actor = %exit.actor, "exit of a former child ignored");
            return Ok(());
        };
        let child = &mut self.children[idx];
        child.watch = None;
        tracing::info!(
            supervisor = %ctx.id(),
            child = %child,
            reason = %exit.reason,
            "detected child death"
        );

        let failed = !exit.reason.is_normal();
        let restarts_group = match child.spec.mode {
            ChildMode::Permanent => true,
            ChildMode::Transient => failed,
            ChildMode::Temporary => false,
        };
        match self.strategy {
            RestartStrategy::AllForOne if restarts_group => {
                let dead = child.spec.id.clone();
                self.shutdown_from(0);
                self.restart_from(ctx, 0, &dead, failed)
            }
            RestartStrategy::RestForOne if restarts_group => {
                let dead = child.spec.id.clone();
                self.shutdown_from(idx);
                self.restart_from(ctx, idx, &dead, failed)
            }
            _ => self.try_restart(ctx, idx, true, failed).map(|_| ()),
        }
    }

    /// Shuts down children `from..`, last first, keeping their entries.
    fn shutdown_from(&mut self, from: usize) {
        for idx in (from..self.children.len()).rev() {
            self.shutdown_child(idx);
        }
    }

    fn restart_from(
        &mut self,
        ctx: &ActorContext<SupervisorMessage>,
        from: usize,
        dead: &str,
        failed: bool,
    ) -> Result<()> {
        let mut idx = from;
        while idx < self.children.len() {
            let is_dead = self.children[idx].spec.id == dead;
            if self.try_restart(ctx, idx, is_dead, is_dead && failed)? == Restarted::Kept {
                idx += 1;
            }
        }
        Ok(())
    }

    fn try_restart(
        &mut self,
        ctx: &ActorContext<SupervisorMessage>,
        idx: usize,
        dead: bool,
        failed: bool,
    ) -> Result<Restarted> {
        let mode = self.children[idx].spec.mode;
        match mode {
            ChildMode::Transient if dead && !failed => {
                tracing::debug!(child = %self.children[idx], "transient child exited normally, removed");
                self.children.remove(idx);
                return Ok(Restarted::Removed);
            }
            ChildMode::Temporary => {
                if !dead {
                    self.shutdown_child(idx);
                }
                self.children.remove(idx);
                return Ok(Restarted::Removed);
            }
            ChildMode::Permanent | ChildMode::Transient => {}
        }

        self.shutdown_child(idx);
        let child = &mut self.children[idx];
        let recent = child.history.record(Instant::now(), child.spec.window);
        tracing::debug!(
            child = %child.spec.id,
            recent,
            window = ?child.spec.window,
            "restarting child"
        );
        if recent > child.spec.max_restarts as usize {
            tracing::warn!(
                supervisor = %ctx.id(),
                child = %child.spec.id,
                max_restarts = child.spec.max_restarts,
                "too many restarts, giving up"
            );
            return Err(Error::new(ErrorKind::RestartLimitExceeded).with_message(format!(
                "child {} restarted more than {} times in {:?}",
                child.spec.id, child.spec.max_restarts, child.spec.window
            )));
        }
        self.start_child(ctx, idx)?;
        Ok(Restarted::Kept)
    }
}
