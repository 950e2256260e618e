//! A server that owns a target object and runs client closures against it.
//!
//! Every invocation executes on the server's thread, one at a time, so the
//! target needs no locking of its own. Calls return the closure's result to
//! the caller; a failing or panicking call becomes the caller's error and the
//! server keeps running. Casts are fire-and-forget: their failures are logged
//! and the server keeps running.
//!
//! Void invocations go through [`ProxyRef::invoke`], which either waits for
//! completion or casts, depending on how the proxy was spawned.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use parking_lot::Mutex;

use crate::actor::{current_actor, panic_message, ActorBuilder, ActorId, AnyActorRef, ExitReason};
use crate::error::{Error, Result};
use crate::gen_server::{
    spawn_gen_server, CallReply, GenServer, GenServerRef, ServerContext, ServerMessage,
};
use crate::request_reply::CallerRef;

type Answer = Box<dyn Any + Send + Sync>;
type InvocationFn<T> = Box<dyn FnOnce(&mut T) -> Result<Answer> + Send>;

/// A closure travelling to the proxy, taken out exactly once.
pub struct Invocation<T>(Mutex<Option<InvocationFn<T>>>);

impl<T> Invocation<T> {
    fn new(f: InvocationFn<T>) -> Self {
        Self(Mutex::new(Some(f)))
    }

    fn run(&self, target: &mut T) -> Result<Answer> {
        let f = self
            .0
            .lock()
            .take()
            .ok_or_else(|| Error::internal("invocation already taken"))?;
        f(target)
    }
}

impl<T> fmt::Debug for Invocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invocation")
    }
}

/// Server side of a proxy.
pub struct ProxyServer<T> {
    target: T,
}

impl<T: Send + 'static> GenServer for ProxyServer<T> {
    type Call = Invocation<T>;
    type Reply = Answer;
    type Cast = Invocation<T>;
    type Info = ();

    fn handle_call(
        &mut self,
        _ctx: &ServerContext<'_, Self>,
        _from: &CallerRef,
        request: Invocation<T>,
    ) -> Result<CallReply<Answer>> {
        request.run(&mut self.target).map(CallReply::Reply)
    }

    fn handle_cast(&mut self, ctx: &ServerContext<'_, Self>, msg: Invocation<T>) -> Result<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| msg.run(&mut self.target)))
            .unwrap_or_else(|payload| {
                Err(Error::internal(format!(
                    "cast panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        if let Err(e) = outcome {
            tracing::warn!(server = %ctx.id(), error = %e, "proxied cast failed");
        }
        Ok(())
    }
}

/// Client handle of a proxy. Cheap to clone.
pub struct ProxyRef<T: Send + 'static> {
    server: GenServerRef<ProxyServer<T>>,
    call_on_void: bool,
}

impl<T: Send + 'static> Clone for ProxyRef<T> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            call_on_void: self.call_on_void,
        }
    }
}

impl<T: Send + 'static> ProxyRef<T> {
    /// Runs `f` against the target and returns its result.
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
    {
        self.call_with(f, None)
    }

    /// [`call`](Self::call) with an explicit timeout.
    pub fn call_timeout<R, F>(&self, f: F, timeout: Duration) -> Result<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
    {
        self.call_with(f, Some(timeout))
    }

    fn call_with<R, F>(&self, f: F, timeout: Option<Duration>) -> Result<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
    {
        // The target is borrowed by the running invocation.
        if current_actor().is_some_and(|me| me.id() == self.server.id()) {
            return Err(Error::internal("proxy called from its own invocation"));
        }
        let invocation = Invocation::new(Box::new(move |target: &mut T| {
            f(target).map(|r| Box::new(r) as Answer)
        }));
        let answer = match timeout {
            Some(t) => self.server.call_timeout(invocation, t)?,
            None => self.server.call(invocation)?,
        };
        answer
            .downcast::<R>()
            .map(|r| *r)
            .map_err(|_| Error::internal("proxy answer of unexpected type"))
    }

    /// Runs `f` against the target without waiting.
    pub fn cast<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()> + Send + 'static,
    {
        let invocation = Invocation::new(Box::new(move |target: &mut T| {
            f(target).map(|()| Box::new(()) as Answer)
        }));
        self.server.cast(invocation)
    }

    /// Runs a void `f`: as a call if the proxy was spawned with
    /// `call_on_void`, as a cast otherwise.
    pub fn invoke<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()> + Send + 'static,
    {
        if self.call_on_void {
            self.call(f)
        } else {
            self.cast(f)
        }
    }

    /// Asks the proxy to stop.
    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    /// The proxy's actor id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.server.id()
    }

    /// True until the proxy dies.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.server.is_alive()
    }

    /// The untyped actor reference.
    #[must_use]
    pub fn as_any(&self) -> AnyActorRef {
        self.server.as_any()
    }

    /// Waits up to `timeout` for the proxy to die.
    pub fn join_timeout(&self, timeout: Duration) -> Result<ExitReason> {
        self.server.join_timeout(timeout)
    }
}

impl<T: Send + 'static> fmt::Debug for ProxyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRef")
            .field("id", &self.server.id())
            .field("call_on_void", &self.call_on_void)
            .finish()
    }
}

/// Spawns a proxy owning `target`.
///
/// With `call_on_void`, [`ProxyRef::invoke`] waits for each void invocation
/// to finish; otherwise it casts.
pub fn spawn_proxy<T: Send + 'static>(
    builder: ActorBuilder<ServerMessage<ProxyServer<T>>>,
    target: T,
    call_on_void: bool,
) -> Result<ProxyRef<T>> {
    let server = spawn_gen_server(builder, ProxyServer { target })?;
    Ok(ProxyRef {
        server,
        call_on_void,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::mpsc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Counter {
        value: u64,
    }

    impl Counter {
        fn add(&mut self, n: u64) -> Result<()> {
            if n == 0 {
                return Err(Error::user("zero"));
            }
            self.value += n;
            Ok(())
        }
    }

    #[test]
    fn calls_and_casts_reach_the_target_in_order() {
        init_test("calls_and_casts_reach_the_target_in_order");
        let proxy = spawn_proxy(ActorBuilder::new(), Counter::default(), false).unwrap();
        proxy.cast(|c: &mut Counter| c.add(2)).unwrap();
        proxy.invoke(|c: &mut Counter| c.add(3)).unwrap();
        let value = proxy.call(|c: &mut Counter| Ok(c.value)).unwrap();
        crate::assert_with_log!(value == 5, "casts applied before call", 5, value);
        let text = proxy.call(|c: &mut Counter| Ok(format!("v={}", c.value))).unwrap();
        crate::assert_with_log!(text == "v=5", "typed answer", "v=5", text);
        proxy.shutdown();
        proxy.join_timeout(WAIT).unwrap();
        crate::test_complete!("calls_and_casts_reach_the_target_in_order");
    }

    #[test]
    fn call_errors_and_panics_return_to_the_caller() {
        init_test("call_errors_and_panics_return_to_the_caller");
        let proxy = spawn_proxy(ActorBuilder::new(), Counter::default(), true).unwrap();
        let err = proxy.invoke(|c: &mut Counter| c.add(0)).unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::RequestFailed,
            "error reply",
            ErrorKind::RequestFailed,
            err.kind()
        );
        let err = proxy
            .call(|_: &mut Counter| -> Result<u64> { panic!("target exploded") })
            .unwrap_err();
        let text = err.to_string();
        crate::assert_with_log!(
            text.contains("target exploded"),
            "panic text reaches caller",
            "target exploded",
            text
        );
        let value = proxy.call(|c: &mut Counter| Ok(c.value)).unwrap();
        crate::assert_with_log!(value == 0, "proxy still serving", 0, value);
        proxy.shutdown();
        proxy.join_timeout(WAIT).unwrap();
        crate::test_complete!("call_errors_and_panics_return_to_the_caller");
    }

    #[test]
    fn failing_casts_are_logged_not_fatal() {
        init_test("failing_casts_are_logged_not_fatal");
        let proxy = spawn_proxy(ActorBuilder::new(), Counter::default(), false).unwrap();
        proxy.cast(|c: &mut Counter| c.add(0)).unwrap();
        proxy
            .cast(|_: &mut Counter| -> Result<()> { panic!("cast exploded") })
            .unwrap();
        proxy.cast(|c: &mut Counter| c.add(4)).unwrap();
        let value = proxy.call(|c: &mut Counter| Ok(c.value)).unwrap();
        crate::assert_with_log!(value == 4, "later cast applied", 4, value);
        let alive = proxy.is_alive();
        crate::assert_with_log!(alive, "proxy alive", true, alive);
        proxy.shutdown();
        proxy.join_timeout(WAIT).unwrap();
        crate::test_complete!("failing_casts_are_logged_not_fatal");
    }

    #[test]
    fn call_on_void_waits_for_completion() {
        init_test("call_on_void_waits_for_completion");
        let (tx, rx) = mpsc::channel::<u64>();
        let proxy = spawn_proxy(ActorBuilder::new(), Counter::default(), true).unwrap();
        proxy
            .invoke(move |c: &mut Counter| {
                c.add(9)?;
                let _ = tx.send(c.value);
                Ok(())
            })
            .unwrap();
        // The invocation already ran when `invoke` returned.
        let seen = rx.try_recv().unwrap();
        crate::assert_with_log!(seen == 9, "ran before return", 9, seen);
        proxy.shutdown();
        proxy.join_timeout(WAIT).unwrap();
        crate::test_complete!("call_on_void_waits_for_completion");
    }

    #[test]
    fn proxy_refuses_calls_from_its_own_invocation() {
        init_test("proxy_refuses_calls_from_its_own_invocation");
        let proxy = spawn_proxy(ActorBuilder::new(), Counter::default(), false).unwrap();
        let inner = proxy.clone();
        let nested = proxy
            .call(move |_: &mut Counter| Ok(inner.call(|c: &mut Counter| Ok(c.value)).is_err()))
            .unwrap();
        crate::assert_with_log!(nested, "nested call rejected", true, nested);
        proxy.shutdown();
        proxy.join_timeout(WAIT).unwrap();
        crate::test_complete!("proxy_refuses_calls_from_its_own_invocation");
    }
}
