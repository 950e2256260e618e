//! Finite state machine actors.
//!
//! A state is a one-shot function that runs on the actor's thread and returns
//! the next [`Transition`]. Most states wait for a message with
//! [`FsmContext::receive`], whose selector maps an acceptable message to the
//! next state and leaves everything else queued. The machine stops when a
//! state returns [`Transition::Terminate`].

use std::fmt;
use std::time::Duration;

use crate::actor::{ActorBuilder, ActorContext, ActorId, ActorRef};
use crate::error::{Error, Result};
use crate::gen_event::Initializer;

/// One state of a machine.
pub type State<M> = Box<dyn FnOnce(&FsmContext<'_, M>) -> Result<Transition<M>> + Send>;

/// What a state hands back to the machine.
pub enum Transition<M> {
    /// Run this state next.
    Goto(State<M>),
    /// Stop the machine normally.
    Terminate,
}

impl<M> Transition<M> {
    /// Moves to the state `f`.
    pub fn to<F>(f: F) -> Self
    where
        F: FnOnce(&FsmContext<'_, M>) -> Result<Self> + Send + 'static,
    {
        Self::Goto(Box::new(f))
    }

    /// True for [`Transition::Terminate`].
    #[must_use]
    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }
}

impl<M> fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goto(_) => f.write_str("Goto(..)"),
            Self::Terminate => f.write_str("Terminate"),
        }
    }
}

/// Handed to every state.
pub struct FsmContext<'a, M> {
    actor: &'a ActorContext<M>,
}

impl<'a, M: Send + Sync + 'static> FsmContext<'a, M> {
    /// Waits for the first message `select` maps to a transition.
    ///
    /// Messages the selector returns `None` for stay queued in order. With a
    /// `timeout`, expiry fails with `Timeout`.
    pub fn receive<F>(&self, timeout: Option<Duration>, mut select: F) -> Result<Transition<M>>
    where
        F: FnMut(&M) -> Option<Transition<M>>,
    {
        let mut chosen = None;
        self.actor.receive_selective(timeout, |msg: &M| {
            chosen = select(msg);
            chosen.is_some()
        })?;
        chosen.ok_or_else(|| Error::internal("message taken without a transition"))
    }

    /// Like [`receive`](Self::receive) but returns `None` instead of waiting.
    pub fn try_receive<F>(&self, mut select: F) -> Result<Option<Transition<M>>>
    where
        F: FnMut(&M) -> Option<Transition<M>>,
    {
        let mut chosen = None;
        let taken = self.actor.try_receive_selective(|msg: &M| {
            chosen = select(msg);
            chosen.is_some()
        })?;
        Ok(taken.and(chosen))
    }

    /// The machine's actor id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.actor.id()
    }

    /// A reference to this machine.
    #[must_use]
    pub fn self_ref(&self) -> ActorRef<M> {
        self.actor.self_ref()
    }

    /// The underlying actor context.
    #[must_use]
    pub fn actor(&self) -> &ActorContext<M> {
        self.actor
    }
}

impl<M: Send + Sync + 'static> fmt::Debug for FsmContext<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmContext").field("id", &self.actor.id()).finish()
    }
}

/// Spawns a machine starting at `initial`.
///
/// The initializer's `init` runs before the first state and its `terminate`
/// after the last one. A state error fails the actor.
pub fn spawn_fsm<M: Send + Sync + 'static>(
    builder: ActorBuilder<M>,
    initializer: Option<Box<dyn Initializer>>,
    initial: Transition<M>,
) -> Result<ActorRef<M>> {
    builder.spawn(move |actor| {
        let ctx = FsmContext { actor };
        let mut initializer = initializer;
        let result = initializer
            .as_mut()
            .map_or(Ok(()), |i| i.init())
            .and_then(|()| run_states(&ctx, initial));
        if let Some(i) = initializer.as_mut() {
            match &result {
                Err(e) if !e.is_shutdown() => i.terminate(Some(e)),
                _ => i.terminate(None),
            }
        }
        result
    })
}

fn run_states<M: Send + Sync + 'static>(
    ctx: &FsmContext<'_, M>,
    initial: Transition<M>,
) -> Result<()> {
    let mut next = initial;
    let mut steps = 0u64;
    while let Transition::Goto(state) = next {
        steps += 1;
        next = state(ctx)?;
    }
    tracing::debug!(actor = %ctx.id(), steps, "state machine terminated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    const WAIT: Duration = Duration::from_secs(5);

    type Log = Arc<Mutex<Vec<String>>>;

    struct Hooks(Log);

    impl Initializer for Hooks {
        fn init(&mut self) -> Result<()> {
            self.0.lock().push("init".into());
            Ok(())
        }

        fn terminate(&mut self, cause: Option<&Error>) {
            self.0
                .lock()
                .push(cause.map_or_else(|| "stop".to_string(), ToString::to_string));
        }
    }

    fn waiting_for_a(log: Log) -> Transition<&'static str> {
        Transition::to(move |ctx| {
            ctx.receive(None, |msg| {
                (*msg == "a").then(|| {
                    log.lock().push("a".into());
                    waiting_for_b(Arc::clone(&log))
                })
            })
        })
    }

    fn waiting_for_b(log: Log) -> Transition<&'static str> {
        Transition::to(move |ctx| {
            ctx.receive(None, |msg| {
                (*msg == "b").then(|| {
                    log.lock().push("b".into());
                    Transition::Terminate
                })
            })
        })
    }

    #[test]
    fn states_take_messages_out_of_arrival_order() {
        init_test("states_take_messages_out_of_arrival_order");
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let hooks = Box::new(Hooks(Arc::clone(&log)));
        let machine = spawn_fsm(
            ActorBuilder::new(),
            Some(hooks),
            waiting_for_a(Arc::clone(&log)),
        )
        .unwrap();
        machine.send("b").unwrap();
        machine.send("a").unwrap();
        let reason = machine.join_timeout(WAIT).unwrap();
        crate::assert_with_log!(reason.is_normal(), "terminated", "normal", reason);
        let got = log.lock().clone();
        let expected = vec!["init", "a", "b", "stop"];
        crate::assert_with_log!(got == expected, "transitions", expected, got);
        crate::test_complete!("states_take_messages_out_of_arrival_order");
    }

    #[test]
    fn terminate_as_initial_state_only_runs_hooks() {
        init_test("terminate_as_initial_state_only_runs_hooks");
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let machine = spawn_fsm::<u32>(
            ActorBuilder::new(),
            Some(Box::new(Hooks(Arc::clone(&log)))),
            Transition::Terminate,
        )
        .unwrap();
        let reason = machine.join_timeout(WAIT).unwrap();
        crate::assert_with_log!(reason.is_normal(), "terminated", "normal", reason);
        let got = log.lock().clone();
        let expected = vec!["init", "stop"];
        crate::assert_with_log!(got == expected, "hooks only", expected, got);
        crate::test_complete!("terminate_as_initial_state_only_runs_hooks");
    }

    #[test]
    fn state_error_fails_the_machine() {
        init_test("state_error_fails_the_machine");
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let machine = spawn_fsm::<u32>(
            ActorBuilder::new(),
            Some(Box::new(Hooks(Arc::clone(&log)))),
            Transition::to(|ctx| {
                ctx.receive(None, |n| (*n > 10).then_some(Transition::Terminate))?;
                Err(Error::user("bad state"))
            }),
        )
        .unwrap();
        machine.send(3).unwrap();
        machine.send(11).unwrap();
        let reason = machine.join_timeout(WAIT).unwrap();
        crate::assert_with_log!(!reason.is_normal(), "failed", "failed", reason);
        let got = log.lock().clone();
        let expected = vec!["init", "bad state"];
        crate::assert_with_log!(got == expected, "hooks", expected, got);
        crate::test_complete!("state_error_fails_the_machine");
    }

    #[test]
    fn shutdown_while_waiting_is_an_orderly_stop() {
        init_test("shutdown_while_waiting_is_an_orderly_stop");
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let machine = spawn_fsm(
            ActorBuilder::new(),
            Some(Box::new(Hooks(Arc::clone(&log)))),
            waiting_for_a(Arc::clone(&log)),
        )
        .unwrap();
        machine.send("b").unwrap();
        machine.shutdown();
        let reason = machine.join_timeout(WAIT).unwrap();
        crate::assert_with_log!(reason.is_normal(), "orderly stop", "normal", reason);
        let got = log.lock().clone();
        let expected = vec!["init", "stop"];
        crate::assert_with_log!(got == expected, "no transition taken", expected, got);
        crate::test_complete!("shutdown_while_waiting_is_an_orderly_stop");
    }

    #[test]
    fn try_receive_does_not_wait() {
        init_test("try_receive_does_not_wait");
        let (tx, rx) = std::sync::mpsc::channel();
        let machine = spawn_fsm::<u32>(
            ActorBuilder::new(),
            None,
            Transition::to(move |ctx| {
                let empty = ctx.try_receive(|_| Some(Transition::Terminate))?;
                let _ = tx.send(empty.is_none());
                ctx.receive(None, |_| Some(Transition::Terminate))
            }),
        )
        .unwrap();
        let empty = rx.recv_timeout(WAIT).unwrap();
        crate::assert_with_log!(empty, "nothing queued yet", true, empty);
        machine.send(1).unwrap();
        let reason = machine.join_timeout(WAIT).unwrap();
        crate::assert_with_log!(reason.is_normal(), "terminated", "normal", reason);
        crate::test_complete!("try_receive_does_not_wait");
    }
}
