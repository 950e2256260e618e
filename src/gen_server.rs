//! GenServer: a request/response message loop over a plain actor.
//!
//! A server implements [`GenServer`] and is driven by one actor whose
//! mailbox carries [`ServerMessage`]s:
//!
//! - **Call**: synchronous request/response through [`GenServerRef::call`].
//!   An error returned by `handle_call`, or a panic inside it, is sent back
//!   to the caller as an error response and the server keeps running.
//! - **Cast**: fire-and-forget. An error from `handle_cast` stops the server.
//! - **Info**: anything else the server wants to receive, plus exit
//!   notifications of actors it watches. Errors are fatal, as for casts.
//!
//! ```text
//! init ──ok──► serving ──stop / shutdown / fatal error──► terminate ──► dead
//!                 │ ▲
//!                 └─┘ receive (with optional idle timeout → handle_timeout)
//! ```
//!
//! `terminate` runs exactly once, with `None` for an orderly stop and the
//! error otherwise.
//!
//! # Example
//!
//! ```
//! use actorcore::gen_server::{spawn_gen_server, CallReply, GenServer, ServerContext};
//! use actorcore::actor::ActorBuilder;
//! use actorcore::request_reply::CallerRef;
//! use actorcore::Result;
//!
//! struct Counter {
//!     count: u64,
//! }
//!
//! impl GenServer for Counter {
//!     type Call = u64;
//!     type Reply = u64;
//!     type Cast = ();
//!     type Info = ();
//!
//!     fn handle_call(
//!         &mut self,
//!         _ctx: &ServerContext<'_, Self>,
//!         _from: &CallerRef,
//!         add: u64,
//!     ) -> Result<CallReply<u64>> {
//!         self.count += add;
//!         Ok(CallReply::Reply(self.count))
//!     }
//!
//!     fn handle_cast(&mut self, _ctx: &ServerContext<'_, Self>, (): ()) -> Result<()> {
//!         self.count = 0;
//!         Ok(())
//!     }
//! }
//!
//! let counter = spawn_gen_server(ActorBuilder::new(), Counter { count: 0 }).unwrap();
//! assert_eq!(counter.call(2).unwrap(), 2);
//! assert_eq!(counter.call(3).unwrap(), 5);
//! counter.cast(()).unwrap();
//! assert_eq!(counter.call(1).unwrap(), 1);
//! counter.shutdown();
//! assert!(counter.join().is_normal());
//! ```

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::actor::{
    panic_message, ActorBuilder, ActorContext, ActorId, ActorRef, AnyActorRef, ExitMessage,
    ExitReason, WatchRef,
};
use crate::error::{Error, Result};
use crate::request_reply::{self, CallerRef};

// ============================================================================
// Trait
// ============================================================================

/// What a call handler wants done about the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply<R> {
    /// Send `R` to the caller now.
    Reply(R),
    /// Send nothing now. The handler keeps the [`CallerRef`] and answers
    /// later with [`ServerContext::reply`] (or never, letting the caller time
    /// out).
    NoReply,
}

/// Callbacks of a generic server.
pub trait GenServer: Send + Sized + 'static {
    /// Request type for calls.
    type Call: Send + Sync + 'static;
    /// Reply type returned to callers.
    type Reply: Send + Sync + 'static;
    /// Message type for casts.
    type Cast: Send + Sync + 'static;
    /// Message type for out-of-band info messages.
    type Info: Send + Sync + 'static;

    /// Called once before the first message. An error stops the server.
    fn init(&mut self, ctx: &ServerContext<'_, Self>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Handles a call. An error becomes the caller's error; the server
    /// keeps running.
    fn handle_call(
        &mut self,
        ctx: &ServerContext<'_, Self>,
        from: &CallerRef,
        request: Self::Call,
    ) -> Result<CallReply<Self::Reply>>;

    /// Handles a cast. An error stops the server.
    fn handle_cast(&mut self, ctx: &ServerContext<'_, Self>, msg: Self::Cast) -> Result<()> {
        let _ = (ctx, msg);
        Ok(())
    }

    /// Handles an info message. An error stops the server.
    fn handle_info(&mut self, ctx: &ServerContext<'_, Self>, msg: Self::Info) -> Result<()> {
        let _ = (ctx, msg);
        Ok(())
    }

    /// Called when a watched actor dies. An error stops the server.
    fn handle_exit(&mut self, ctx: &ServerContext<'_, Self>, exit: ExitMessage) -> Result<()> {
        tracing::debug!(
            server = %ctx.id(),
            watched = %exit.actor,
            reason = %exit.reason,
            "watched actor exited"
        );
        Ok(())
    }

    /// Called when no message arrived within the timeout set through
    /// [`ServerContext::set_timeout`].
    fn handle_timeout(&mut self, ctx: &ServerContext<'_, Self>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called once on the way out; `cause` is `None` for an orderly stop.
    fn terminate(&mut self, ctx: &ServerContext<'_, Self>, cause: Option<&Error>) {
        let _ = (ctx, cause);
    }
}

/// Mailbox message of a server actor.
pub enum ServerMessage<S: GenServer> {
    /// A call awaiting a reply.
    Call {
        /// The request.
        request: S::Call,
        /// Where the reply goes.
        from: CallerRef,
    },
    /// A cast.
    Cast(S::Cast),
    /// An info message.
    Info(S::Info),
    /// A watched actor died.
    Exit(ExitMessage),
}

impl<S: GenServer> fmt::Debug for ServerMessage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call { from, .. } => f.debug_struct("Call").field("from", from).finish(),
            Self::Cast(_) => f.write_str("Cast"),
            Self::Info(_) => f.write_str("Info"),
            Self::Exit(exit) => f.debug_tuple("Exit").field(exit).finish(),
        }
    }
}

// ============================================================================
// ServerContext
// ============================================================================

/// Handed to every callback.
pub struct ServerContext<'a, S: GenServer> {
    actor: &'a ActorContext<ServerMessage<S>>,
    stopping: Cell<bool>,
    timeout: Cell<Option<Duration>>,
}

impl<'a, S: GenServer> ServerContext<'a, S> {
    fn new(actor: &'a ActorContext<ServerMessage<S>>) -> Self {
        Self {
            actor,
            stopping: Cell::new(false),
            timeout: Cell::new(None),
        }
    }

    /// The server's actor id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    /// A reference to this server.
    #[must_use]
    pub fn self_ref(&self) -> GenServerRef<S> {
        GenServerRef {
            actor: self.actor.self_ref(),
        }
    }

    /// Ends the loop normally after the current callback returns.
    pub fn stop(&self) {
        self.stopping.set(true);
    }

    /// Idle timeout before `handle_timeout`; `None` disables it.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.timeout.set(timeout.filter(|t| !t.is_zero()));
    }

    /// Answers a call whose handler returned [`CallReply::NoReply`].
    pub fn reply(&self, from: &CallerRef, value: S::Reply) {
        from.reply(value);
    }

    /// Fails a deferred call.
    pub fn reply_error(&self, from: &CallerRef, error: Error) {
        from.reply_error(error);
    }

    /// Watches `target`; its death arrives through `handle_exit`.
    pub fn watch(&self, target: &AnyActorRef) -> WatchRef {
        self.actor.watch(target)
    }

    /// Links the server with `target`.
    pub fn link(&self, target: &AnyActorRef) {
        self.actor.link(target);
    }

    /// The underlying actor context.
    #[must_use]
    pub fn actor(&self) -> &ActorContext<ServerMessage<S>> {
        self.actor
    }
}

impl<S: GenServer> fmt::Debug for ServerContext<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("id", &self.actor.id())
            .field("stopping", &self.stopping.get())
            .field("timeout", &self.timeout.get())
            .finish()
    }
}

// ============================================================================
// GenServerRef
// ============================================================================

/// Client handle of a running server. Cheap to clone.
pub struct GenServerRef<S: GenServer> {
    actor: ActorRef<ServerMessage<S>>,
}

impl<S: GenServer> Clone for GenServerRef<S> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl<S: GenServer> GenServerRef<S> {
    /// Wraps an actor reference obtained elsewhere (for example from the
    /// registry).
    #[must_use]
    pub fn from_actor(actor: ActorRef<ServerMessage<S>>) -> Self {
        Self { actor }
    }

    /// Calls the server, using the caller's default call timeout.
    pub fn call(&self, request: S::Call) -> Result<S::Reply> {
        request_reply::call(&self.actor, |from| ServerMessage::Call { request, from }, None)
    }

    /// Calls the server with an explicit timeout.
    pub fn call_timeout(&self, request: S::Call, timeout: Duration) -> Result<S::Reply> {
        request_reply::call(
            &self.actor,
            |from| ServerMessage::Call { request, from },
            Some(timeout),
        )
    }

    /// Casts to the server.
    pub fn cast(&self, msg: S::Cast) -> Result<()> {
        request_reply::cast(&self.actor, ServerMessage::Cast(msg))
    }

    /// Sends an info message.
    pub fn info(&self, msg: S::Info) -> Result<()> {
        self.actor.send(ServerMessage::Info(msg))
    }

    /// Asks the server to stop.
    pub fn shutdown(&self) {
        self.actor.shutdown();
    }

    /// The server's actor id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    /// True until the server dies.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.actor.is_alive()
    }

    /// The typed actor reference.
    #[must_use]
    pub fn actor_ref(&self) -> &ActorRef<ServerMessage<S>> {
        &self.actor
    }

    /// The untyped actor reference.
    #[must_use]
    pub fn as_any(&self) -> AnyActorRef {
        self.actor.as_any()
    }

    /// Waits for the server to die.
    pub fn join(&self) -> ExitReason {
        self.actor.join()
    }

    /// Waits up to `timeout` for the server to die.
    pub fn join_timeout(&self, timeout: Duration) -> Result<ExitReason> {
        self.actor.join_timeout(timeout)
    }
}

impl<S: GenServer> fmt::Debug for GenServerRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenServerRef({})", self.actor.id())
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Spawns `server` on an actor configured by `builder`.
///
/// Watch notifications of the server's actor are routed to `handle_exit`.
pub fn spawn_gen_server<S: GenServer>(
    builder: ActorBuilder<ServerMessage<S>>,
    server: S,
) -> Result<GenServerRef<S>> {
    let actor = builder
        .watch_notifications(ServerMessage::Exit)
        .spawn(move |ctx| run(server, ctx))?;
    Ok(GenServerRef { actor })
}

fn run<S: GenServer>(mut server: S, actor: &ActorContext<ServerMessage<S>>) -> Result<()> {
    let ctx = ServerContext::new(actor);
    let result = serve(&mut server, &ctx);
    match &result {
        Ok(()) => server.terminate(&ctx, None),
        Err(e) if e.is_shutdown() => server.terminate(&ctx, None),
        Err(e) => server.terminate(&ctx, Some(e)),
    }
    result
}

fn serve<S: GenServer>(server: &mut S, ctx: &ServerContext<'_, S>) -> Result<()> {
    server.init(ctx)?;
    while !ctx.stopping.get() {
        let received = match ctx.timeout.get() {
            Some(t) => ctx.actor.receive_timeout(t),
            None => ctx.actor.receive().map(Some),
        };
        let msg = match received {
            Ok(msg) => msg,
            // An interrupt after `stop` is part of the stop.
            Err(e) if e.is_interrupted() && ctx.stopping.get() => break,
            Err(e) => return Err(e),
        };
        match msg {
            None => server.handle_timeout(ctx)?,
            Some(ServerMessage::Call { request, from }) => {
                let handled =
                    panic::catch_unwind(AssertUnwindSafe(|| server.handle_call(ctx, &from, request)))
                        .unwrap_or_else(|payload| {
                            Err(Error::internal(format!(
                                "call handler panicked: {}",
                                panic_message(payload.as_ref())
                            )))
                        });
                match handled {
                    Ok(CallReply::Reply(value)) => from.reply(value),
                    Ok(CallReply::NoReply) => {}
                    Err(e) => {
                        tracing::debug!(
                            server = %ctx.id(),
                            request = %from.id(),
                            error = %e,
                            "call failed"
                        );
                        from.reply_error(e);
                    }
                }
            }
            Some(ServerMessage::Cast(msg)) => server.handle_cast(ctx, msg)?,
            Some(ServerMessage::Info(msg)) => server.handle_info(ctx, msg)?,
            Some(ServerMessage::Exit(exit)) => server.handle_exit(ctx, exit)?,
        }
    }
    tracing::debug!(server = %ctx.id(), "server stopped");
    Ok(())
}
