//! GenEvent: an actor that fans events out to registered handlers.
//!
//! Handlers run on the event actor's thread, one event at a time, in
//! registration order. Adding and removing handlers are calls, so they are
//! ordered with respect to event delivery: an event notified after
//! `add_handler` returns is seen by the new handler, one notified after
//! `remove_handler` returns is not.
//!
//! A handler error stops the event actor; handlers are cleared when it stops.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::actor::{ActorBuilder, ActorContext, ActorId, ActorRef, AnyActorRef, ExitReason};
use crate::error::{Error, Result};
use crate::request_reply::{self, CallerRef};

static HANDLER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Receives every event of a [`GenEventRef`].
pub trait EventHandler<E>: Send + 'static {
    /// Handles one event. An error stops the event actor.
    fn handle_event(&mut self, event: &E) -> Result<()>;
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(&E) -> Result<()> + Send + 'static,
{
    fn handle_event(&mut self, event: &E) -> Result<()> {
        self(event)
    }
}

/// Optional start/stop hooks of a behaviour actor.
pub trait Initializer: Send + 'static {
    /// Runs before the first message. An error stops the actor.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Runs once on the way out; `cause` is `None` for an orderly stop.
    fn terminate(&mut self, cause: Option<&Error>) {
        let _ = cause;
    }
}

/// Identifies a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        Self(HANDLER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

type BoxedHandler<E> = Box<dyn EventHandler<E>>;

/// Mailbox message of an event actor.
pub enum EventMessage<E> {
    /// An event to broadcast.
    Notify(E),
    /// Registers a handler; replies with its [`HandlerId`].
    AddHandler {
        /// The handler, taken out by the event actor.
        handler: Mutex<Option<BoxedHandler<E>>>,
        /// Where the id goes.
        from: CallerRef,
    },
    /// Unregisters a handler; replies `true` if it was registered.
    RemoveHandler {
        /// The handler to drop.
        id: HandlerId,
        /// Where the answer goes.
        from: CallerRef,
    },
}

impl<E> fmt::Debug for EventMessage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notify(_) => f.write_str("Notify"),
            Self::AddHandler { from, .. } => f.debug_struct("AddHandler").field("from", from).finish(),
            Self::RemoveHandler { id, from } => f
                .debug_struct("RemoveHandler")
                .field("id", id)
                .field("from", from)
                .finish(),
        }
    }
}

/// Client handle of an event actor.
pub struct GenEventRef<E> {
    actor: ActorRef<EventMessage<E>>,
}

impl<E> Clone for GenEventRef<E> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl<E: Send + Sync + 'static> GenEventRef<E> {
    /// Broadcasts `event` to every handler.
    pub fn notify(&self, event: E) -> Result<()> {
        request_reply::cast(&self.actor, EventMessage::Notify(event))
    }

    /// Registers `handler`; events notified after this returns reach it.
    pub fn add_handler<H: EventHandler<E>>(&self, handler: H) -> Result<HandlerId> {
        let handler: BoxedHandler<E> = Box::new(handler);
        request_reply::call(
            &self.actor,
            |from| EventMessage::AddHandler {
                handler: Mutex::new(Some(handler)),
                from,
            },
            None,
        )
    }

    /// Unregisters a handler. Returns `false` if it was not registered.
    pub fn remove_handler(&self, id: HandlerId) -> Result<bool> {
        request_reply::call(&self.actor, |from| EventMessage::RemoveHandler { id, from }, None)
    }

    /// Asks the event actor to stop.
    pub fn shutdown(&self) {
        self.actor.shutdown();
    }

    /// The event actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    /// True until the event actor dies.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.actor.is_alive()
    }

    /// The untyped actor reference.
    #[must_use]
    pub fn as_any(&self) -> AnyActorRef {
        self.actor.as_any()
    }

    /// Waits for the event actor to die.
    pub fn join(&self) -> ExitReason {
        self.actor.join()
    }

    /// Waits up to `timeout` for the event actor to die.
    pub fn join_timeout(&self, timeout: Duration) -> Result<ExitReason> {
        self.actor.join_timeout(timeout)
    }
}

impl<E> fmt::Debug for GenEventRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GenEventRef").field(&self.actor).finish()
    }
}

/// Spawns an event actor with no handlers.
pub fn spawn_gen_event<E: Send + Sync + 'static>(
    builder: ActorBuilder<EventMessage<E>>,
    initializer: Option<Box<dyn Initializer>>,
) -> Result<GenEventRef<E>> {
    let actor = builder.spawn(move |ctx| {
        let mut handlers: Vec<(HandlerId, BoxedHandler<E>)> = Vec::new();
        let mut initializer = initializer;
        let result = initializer
            .as_mut()
            .map_or(Ok(()), |i| i.init())
            .and_then(|()| dispatch(ctx, &mut handlers));
        handlers.clear();
        if let Some(i) = initializer.as_mut() {
            match &result {
                Err(e) if !e.is_shutdown() => i.terminate(Some(e)),
                _ => i.terminate(None),
            }
        }
        result
    })?;
    Ok(GenEventRef { actor })
}

fn dispatch<E: Send + Sync + 'static>(
    ctx: &ActorContext<EventMessage<E>>,
    handlers: &mut Vec<(HandlerId, BoxedHandler<E>)>,
) -> Result<()> {
    loop {
        match ctx.receive()? {
            EventMessage::Notify(event) => {
                tracing::trace!(actor = %ctx.id(), handlers = handlers.len(), "event");
                for (_, handler) in handlers.iter_mut() {
                    handler.handle_event(&event)?;
                }
            }
            EventMessage::AddHandler { handler, from } => match handler.into_inner() {
                Some(handler) => {
                    let id = HandlerId::next();
                    tracing::info!(actor = %ctx.id(), handler = %id, "adding handler");
                    handlers.push((id, handler));
                    from.reply(id);
                }
                None => from.reply_error(Error::internal("handler already taken")),
            },
            EventMessage::RemoveHandler { id, from } => {
                let before = handlers.len();
                handlers.retain(|(h, _)| *h != id);
                let removed = handlers.len() != before;
                tracing::info!(actor = %ctx.id(), handler = %id, removed, "removing handler");
                from.reply(removed);
            }
        }
    }
}
