//! Selective receive.
//!
//! A receive walks the mailbox in arrival order and asks a classifier what to
//! do with each entry: take it, leave it for a later receive, or drop it.
//! Entries that are left keep their position, so a later receive that does
//! accept them still sees them in the order they were sent.
//!
//! Processors may themselves receive (a nested receive). The outer scan keeps
//! working afterwards: its position is re-found by identity when the nested
//! call changed the queue, and an entry the nested call already consumed is
//! never handed out twice.
//!
//! Each actor has two lanes: the user mailbox, which may be bounded, and an
//! unbounded control lane for exit notifications, shutdown requests and call
//! responses. Every entry carries an arrival ticket and a scan merges the
//! lanes by ticket, so a full user mailbox never holds back control traffic
//! and control traffic never overtakes what the same sender sent before it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::actor::{ActorCell, Envelope, ExitMessage, LifecycleMessage, Queued, WatchRef};
use crate::error::{Error, ErrorKind, Result};
use crate::mailbox::{Mailbox, MailboxNode};
use crate::request_reply::{CallOutcome, RequestId};

/// Decides which messages a selective receive takes.
pub trait MessageProcessor<M> {
    /// Returns `true` to take `msg`, `false` to leave it queued.
    ///
    /// An error aborts the receive; the message is consumed.
    fn process(&mut self, msg: &M) -> Result<bool>;

    /// Offered every lifecycle message before the default handling.
    ///
    /// Return `true` if the message was handled here; it is then consumed
    /// without default handling.
    fn handle_lifecycle(&mut self, msg: &LifecycleMessage) -> Result<bool> {
        let _ = msg;
        Ok(false)
    }
}

impl<M, F> MessageProcessor<M> for F
where
    F: FnMut(&M) -> bool,
{
    fn process(&mut self, msg: &M) -> Result<bool> {
        Ok(self(msg))
    }
}

/// A processor whose predicate can fail.
#[derive(Debug, Clone, Copy)]
pub struct Fallible<F>(pub F);

impl<M, F> MessageProcessor<M> for Fallible<F>
where
    F: FnMut(&M) -> Result<bool>,
{
    fn process(&mut self, msg: &M) -> Result<bool> {
        (self.0)(msg)
    }
}

/// Wraps a fallible predicate as a [`MessageProcessor`].
pub fn fallible<M, F>(f: F) -> Fallible<F>
where
    F: FnMut(&M) -> Result<bool>,
{
    Fallible(f)
}

/// What to do with a scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accept,
    Skip,
    Discard,
}

/// How long a receive may block once the scan runs out.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Wait {
    Forever,
    Until(Instant),
    Poll,
}

type Node<M> = MailboxNode<Queued<M>>;

/// One of an actor's two queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Control = 0,
    User = 1,
}

impl Lane {
    const ALL: [Self; 2] = [Self::Control, Self::User];
}

type Candidate<M> = (Lane, Node<M>, Option<Queued<M>>);

/// The last entry a scan left in place in one lane.
struct Mark<M> {
    node: Node<M>,
    env: Option<Arc<Envelope<M>>>,
}

impl<M: Send + Sync + 'static> ActorCell<M> {
    fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Acquire)
    }

    fn lane(&self, lane: Lane) -> &Mailbox<Queued<M>> {
        match lane {
            Lane::Control => &self.control,
            Lane::User => &self.mailbox,
        }
    }

    fn delete_node(&self, lane: Lane, node: &Node<M>) -> Option<Node<M>> {
        let next = self.lane(lane).delete(node);
        self.mutations.fetch_add(1, Ordering::AcqRel);
        next
    }

    fn mark(&self, lane: Lane, node: Node<M>) -> Mark<M> {
        let env = self.lane(lane).value(&node).map(|q| q.env);
        Mark { node, env }
    }

    /// Finds `env` again after the queue changed under the scan.
    fn relocate(&self, lane: Lane, env: &Arc<Envelope<M>>) -> Option<Node<M>> {
        let queue = self.lane(lane);
        let mut cursor = queue.successor(None);
        while let Some(node) = cursor {
            if queue.value(&node).is_some_and(|q| Arc::ptr_eq(&q.env, env)) {
                return Some(node);
            }
            cursor = queue.successor(Some(&node));
        }
        None
    }

    /// Re-finds a mark after a nested receive; a lost mark rescans its lane.
    fn remark(&self, lane: Lane, mark: Option<Mark<M>>) -> Option<Mark<M>> {
        let env = mark?.env?;
        let node = self.relocate(lane, &env)?;
        Some(Mark {
            node,
            env: Some(env),
        })
    }

    fn is_current(&self, env: &Arc<Envelope<M>>) -> bool {
        self.current_message
            .lock()
            .as_ref()
            .and_then(std::sync::Weak::upgrade)
            .is_some_and(|cur| Arc::ptr_eq(&cur, env))
    }

    fn await_message(&self, deadline: Option<Instant>) -> Result<()> {
        // Both lanes wake the same owner strand.
        match self.mailbox.await_until(deadline) {
            Err(e) if e.is_interrupted() => Err(self.thrown_in.lock().take().unwrap_or(e)),
            other => other,
        }
    }

    /// The next unscanned entry: the lower ticket of the two lanes' next
    /// entries. An entry whose value is not visible yet is returned as is.
    fn next_entry(&self, marks: &[Option<Mark<M>>; 2]) -> Option<Candidate<M>> {
        let mut best: Option<Candidate<M>> = None;
        for lane in Lane::ALL {
            let after = marks[lane as usize].as_ref().map(|m| &m.node);
            let Some(node) = self.lane(lane).successor(after) else {
                continue;
            };
            let entry = self.lane(lane).value(&node);
            let earlier = match (&best, &entry) {
                (None, _) => true,
                (Some((_, _, Some(b))), Some(e)) => e.ticket < b.ticket,
                (Some((_, _, Some(_))), None) => true,
                (Some((_, _, None)), _) => false,
            };
            if earlier {
                best = Some((lane, node, entry));
            }
        }
        best
    }

    /// Scans the mailbox until `classify` accepts an entry.
    ///
    /// Returns `Ok(None)` when `wait` runs out. Accepted entries are removed;
    /// skipped ones stay in place. Control entries (exits, shutdown requests,
    /// responses) and user messages are offered in arrival order.
    pub(crate) fn receive_envelope<F>(
        &self,
        wait: Wait,
        mut classify: F,
    ) -> Result<Option<Arc<Envelope<M>>>>
    where
        F: FnMut(&Arc<Envelope<M>>) -> Result<Verdict>,
    {
        self.check_thrown_in()?;

        let mut marks: [Option<Mark<M>>; 2] = [None, None];
        // Only this strand deletes, so positions can only move during `classify`.
        let mut seen = self.mutation_count();
        loop {
            let Some((lane, node, entry)) = self.next_entry(&marks) else {
                match wait {
                    Wait::Poll => return Ok(None),
                    Wait::Forever => self.await_message(None)?,
                    Wait::Until(deadline) => {
                        if Instant::now() >= deadline {
                            return Ok(None);
                        }
                        self.await_message(Some(deadline))?;
                    }
                }
                self.check_thrown_in()?;
                continue;
            };
            let slot = lane as usize;

            let Some(Queued { env, .. }) = entry else {
                marks[slot] = Some(Mark { node, env: None });
                continue;
            };

            if self.is_current(&env) {
                tracing::trace!(actor = %self.id, "message already being processed, discarded");
                marks[slot] = self.delete_node(lane, &node).map(|n| self.mark(lane, n));
                seen = self.mutation_count();
                continue;
            }

            let previous = self.current_message.lock().replace(Arc::downgrade(&env));
            let verdict = classify(&env);
            *self.current_message.lock() = previous;

            let node = if self.mutation_count() == seen {
                Some(node)
            } else {
                for other in Lane::ALL {
                    let i = other as usize;
                    marks[i] = self.remark(other, marks[i].take());
                }
                self.relocate(lane, &env)
            };

            match verdict {
                Ok(Verdict::Accept) => {
                    if let Some(node) = node {
                        self.delete_node(lane, &node);
                    }
                    return Ok(Some(env));
                }
                Ok(Verdict::Skip) => {
                    marks[slot] = node.map(|node| Mark {
                        node,
                        env: Some(env),
                    });
                }
                Ok(Verdict::Discard) => {
                    marks[slot] = node
                        .and_then(|n| self.delete_node(lane, &n))
                        .map(|n| self.mark(lane, n));
                }
                Err(e) => {
                    if let Some(node) = node {
                        self.delete_node(lane, &node);
                    }
                    return Err(e);
                }
            }
            seen = self.mutation_count();
        }
    }

    /// Classifies an entry for a user-level receive.
    pub(crate) fn classify_user<P>(&self, env: &Envelope<M>, processor: &mut P) -> Result<Verdict>
    where
        P: MessageProcessor<M>,
    {
        match env {
            Envelope::Message(msg) => Ok(if processor.process(msg)? {
                Verdict::Accept
            } else {
                Verdict::Skip
            }),
            Envelope::Lifecycle(msg) => {
                if !processor.handle_lifecycle(msg)? {
                    self.default_lifecycle(msg)?;
                }
                Ok(Verdict::Discard)
            }
            Envelope::Response(resp) if self.is_calling_id(resp.id) => Ok(Verdict::Skip),
            Envelope::Response(resp) => {
                tracing::debug!(actor = %self.id, request = %resp.id, "stale response discarded");
                Ok(Verdict::Discard)
            }
        }
    }

    fn is_calling_id(&self, id: RequestId) -> bool {
        self.pending_calls.lock().iter().any(|w| w.id() == id.as_u64())
    }

    /// Built-in handling of a lifecycle message nobody claimed.
    pub(crate) fn default_lifecycle(&self, msg: &LifecycleMessage) -> Result<()> {
        match msg {
            LifecycleMessage::Exit(exit) => {
                let dead = exit.actor.id();
                self.lifecycle.lock().listeners.retain(|l| l.observer() != dead);
                if exit.is_link() {
                    return Err(link_failure(exit));
                }
                tracing::debug!(
                    actor = %self.id,
                    watched = %dead,
                    reason = %exit.reason,
                    "watched actor exited"
                );
                Ok(())
            }
            LifecycleMessage::Shutdown(_) => {
                self.request_shutdown();
                self.shutdown_reported.store(true, Ordering::Release);
                Err(Error::shutdown())
            }
        }
    }

    /// Waits for the response to call `id`, or for the callee watched through
    /// `watch` to die. `Ok(None)` on timeout.
    pub(crate) fn receive_reply(
        &self,
        id: RequestId,
        watch: WatchRef,
        deadline: Option<Instant>,
    ) -> Result<Option<CallOutcome>> {
        let wait = deadline.map_or(Wait::Forever, Wait::Until);
        let env = self.receive_envelope(wait, |env| match env.as_ref() {
            Envelope::Response(resp) if resp.id == id => Ok(Verdict::Accept),
            Envelope::Response(resp) if self.is_calling_id(resp.id) => Ok(Verdict::Skip),
            Envelope::Response(_) => Ok(Verdict::Discard),
            Envelope::Lifecycle(LifecycleMessage::Exit(exit)) if exit.watch == Some(watch) => {
                Ok(Verdict::Accept)
            }
            Envelope::Lifecycle(LifecycleMessage::Shutdown(_)) => {
                // Reported by the next user-level receive.
                self.request_shutdown();
                Ok(Verdict::Discard)
            }
            Envelope::Lifecycle(msg) => {
                self.default_lifecycle(msg)?;
                Ok(Verdict::Discard)
            }
            Envelope::Message(_) => Ok(Verdict::Skip),
        })?;
        let Some(env) = env else {
            return Ok(None);
        };
        match Arc::try_unwrap(env) {
            Ok(Envelope::Response(resp)) => Ok(Some(CallOutcome::Response(resp))),
            Ok(Envelope::Lifecycle(LifecycleMessage::Exit(exit))) => {
                Ok(Some(CallOutcome::Died(exit)))
            }
            _ => Err(Error::internal("unexpected envelope accepted as reply")),
        }
    }
}

fn link_failure(exit: &ExitMessage) -> Error {
    let err = Error::new(ErrorKind::Lifecycle)
        .with_message(format!("linked actor {} exited: {}", exit.actor, exit.reason));
    match exit.reason.error() {
        Some(cause) => err.with_source(cause.clone()),
        None => err,
    }
}
