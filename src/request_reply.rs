//! Call/cast over plain messages.
//!
//! A call is an ordinary message that carries a [`CallerRef`]: the caller's
//! address plus a [`RequestId`]. The callee answers through the caller ref and
//! the answer lands in the caller's mailbox as a response envelope, where the
//! caller's reply wait picks it out by id while leaving everything else
//! queued.
//!
//! Before sending, the caller watches the callee and uses the watch reference
//! as the request id. Ids are therefore unique per outstanding call, and a
//! callee that dies before answering wakes the caller with `ActorDied`
//! instead of leaving it hanging. Exactly one of response, death or timeout
//! ends every call.
//!
//! Calls from a thread that is not running an actor go through a short-lived
//! stand-in actor bound to that thread.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actor::{
    current_actor, ActorRef, AnyActorRef, ExitMessage, TempActor, WatchRef,
};
use crate::error::{Error, ErrorKind, Result};

// ============================================================================
// Wire types
// ============================================================================

/// Correlation id of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn from_watch(watch: WatchRef) -> Self {
        Self(watch.id())
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

type Payload = Box<dyn Any + Send + Sync>;

/// The answer to a call, as it travels back to the caller.
pub struct ResponseMessage {
    pub(crate) id: RequestId,
    pub(crate) result: Result<Payload>,
}

impl fmt::Debug for ResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseMessage")
            .field("id", &self.id)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

/// How a reply wait ended.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Response(ResponseMessage),
    Died(ExitMessage),
}

// ============================================================================
// CallerRef
// ============================================================================

/// Return address of a call. Embedded in the request message.
#[derive(Clone)]
pub struct CallerRef {
    from: AnyActorRef,
    id: RequestId,
}

impl CallerRef {
    /// The calling actor.
    #[must_use]
    pub fn from(&self) -> &AnyActorRef {
        &self.from
    }

    /// The call's correlation id.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Answers the call with `value`.
    pub fn reply<R: Send + Sync + 'static>(&self, value: R) {
        self.respond(Ok(Box::new(value)));
    }

    /// Fails the call with `error`; the caller sees `RequestFailed`.
    pub fn reply_error(&self, error: Error) {
        self.respond(Err(error));
    }

    /// Answers with either outcome.
    pub fn reply_result<R: Send + Sync + 'static>(&self, result: Result<R>) {
        match result {
            Ok(value) => self.reply(value),
            Err(e) => self.reply_error(e),
        }
    }

    fn respond(&self, result: Result<Payload>) {
        tracing::trace!(caller = %self.from, request = %self.id, ok = result.is_ok(), "reply");
        self.from.deliver_response(ResponseMessage {
            id: self.id,
            result,
        });
    }
}

impl fmt::Debug for CallerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerRef")
            .field("from", &self.from.id())
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// call / cast
// ============================================================================

/// Sends the request built by `build` to `target` and waits for the answer.
///
/// `timeout` of `None` falls back to the calling actor's default call timeout;
/// a zero timeout waits without limit. Errors:
///
/// - `RequestFailed`: the callee replied with an error (its message is kept);
/// - `ActorDied`: the callee died before replying;
/// - `Timeout`: no answer in time;
/// - `Internal`: the answer was not an `R`.
pub fn call<M, R, F>(target: &ActorRef<M>, build: F, timeout: Option<Duration>) -> Result<R>
where
    M: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(CallerRef) -> M,
{
    // Keeps the stand-in alive until the call is over.
    let temp;
    let me = if let Some(actor) = current_actor() {
        actor
    } else {
        temp = TempActor::new();
        temp.handle()
    };
    let timeout = timeout
        .or_else(|| me.default_call_timeout())
        .filter(|t| !t.is_zero());
    let me_ref = AnyActorRef::from_handle(Arc::clone(&me));
    let target_ref = target.as_any();

    let watch = WatchRef::new();
    let id = RequestId::from_watch(watch);
    me.begin_call(watch);
    me_ref.watch_as(&target_ref, watch);
    tracing::debug!(caller = %me_ref, target = %target_ref, request = %id, "call");

    let outcome = target
        .send_sync(build(CallerRef {
            from: me_ref.clone(),
            id,
        }))
        .and_then(|()| me.await_reply(id, watch, timeout.map(|t| Instant::now() + t)));

    if !matches!(outcome, Ok(Some(CallOutcome::Died(_)))) {
        me_ref.unwatch(&target_ref, watch);
    }
    me.end_call(watch);

    match outcome? {
        Some(CallOutcome::Response(resp)) => decode(resp),
        Some(CallOutcome::Died(exit)) => Err(died(&exit)),
        None => Err(Error::timeout().with_message(format!(
            "no reply from {target_ref} to {id} within {:?}",
            timeout.unwrap_or_default()
        ))),
    }
}

/// Fire-and-forget send; no correlation, no wait.
pub fn cast<M: Send + Sync + 'static>(target: &ActorRef<M>, msg: M) -> Result<()> {
    target.send(msg)
}

fn decode<R: 'static>(resp: ResponseMessage) -> Result<R> {
    match resp.result {
        Ok(payload) => payload.downcast::<R>().map(|b| *b).map_err(|_| {
            Error::internal(format!(
                "reply to {} is not a {}",
                resp.id,
                std::any::type_name::<R>()
            ))
        }),
        Err(e) => {
            let message = e.message().map_or_else(|| e.to_string(), str::to_string);
            Err(Error::new(ErrorKind::RequestFailed)
                .with_message(message)
                .with_source(e))
        }
    }
}

fn died(exit: &ExitMessage) -> Error {
    let err = Error::new(ErrorKind::ActorDied)
        .with_message(format!("{} died before replying: {}", exit.actor, exit.reason));
    match exit.reason.error() {
        Some(cause) => err.with_source(cause.clone()),
        None => err,
    }
}
