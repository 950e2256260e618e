//! Control traffic reaches actors whose bounded mailboxes are full.
//!
//! Exit notifications, shutdown requests and call responses travel on the
//! control lane, which ignores the user mailbox's capacity. They still arrive
//! after whatever was queued before them.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use actorcore::actor::{ActorBuilder, ExitMessage};
use actorcore::mailbox::{MailboxConfig, OverflowPolicy};
use actorcore::request_reply::{call, CallerRef};
use actorcore::{Error, ErrorKind};
use common::*;

fn init_test(name: &str) {
    init_test_logging();
    actorcore::test_phase!(name);
}

fn full_mailbox(capacity: usize) -> MailboxConfig {
    MailboxConfig::bounded(capacity, OverflowPolicy::Throw)
}

fn doomed() -> actorcore::ActorRef<()> {
    ActorBuilder::<()>::new()
        .spawn(|ctx| {
            ctx.receive()?;
            Err(Error::user("doomed"))
        })
        .unwrap()
}

#[test]
fn link_exit_reaches_survivor_with_full_mailbox() {
    init_test("link_exit_reaches_survivor_with_full_mailbox");
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let survivor = ActorBuilder::<u32>::new()
        .mailbox(full_mailbox(1))
        .spawn(move |ctx| {
            go_rx.recv().map_err(|_| Error::user("test went away"))?;
            let first = ctx.receive()?;
            if first != 7 {
                return Err(Error::user(format!("queued message lost, got {first}")));
            }
            let second = ctx.receive_timeout(WAIT)?;
            Err(Error::user(format!("link exit never arrived, got {second:?}")))
        })
        .unwrap();
    survivor.send(7).unwrap();
    let overflow = survivor.send(8).unwrap_err();
    actorcore::assert_with_log!(
        overflow.kind() == ErrorKind::CapacityExceeded,
        "mailbox is full",
        ErrorKind::CapacityExceeded,
        overflow.kind()
    );

    let target = doomed();
    survivor.link(&target.as_any());
    target.send(()).unwrap();
    target.join_timeout(WAIT).unwrap();
    go_tx.send(()).unwrap();

    let reason = survivor.join_timeout(WAIT).unwrap();
    let kind = reason.error().map(Error::kind);
    actorcore::assert_with_log!(
        kind == Some(ErrorKind::Lifecycle),
        "survivor fails from the link",
        ErrorKind::Lifecycle,
        reason
    );
    actorcore::test_complete!("link_exit_reaches_survivor_with_full_mailbox");
}

#[derive(Debug)]
enum WatcherMsg {
    Work(u32),
    Down(ExitMessage),
}

#[test]
fn mapped_watch_exit_reaches_full_mailbox() {
    init_test("mapped_watch_exit_reaches_full_mailbox");
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<()>();
    let target = doomed();
    let watched = target.as_any();
    let watcher = ActorBuilder::<WatcherMsg>::new()
        .mailbox(full_mailbox(1))
        .watch_notifications(WatcherMsg::Down)
        .spawn(move |ctx| {
            ctx.watch(&watched);
            ready_tx.send(()).map_err(|_| Error::user("test went away"))?;
            go_rx.recv().map_err(|_| Error::user("test went away"))?;
            match ctx.receive()? {
                WatcherMsg::Work(1) => {}
                other => return Err(Error::user(format!("queued work lost, got {other:?}"))),
            }
            match ctx.receive_timeout(WAIT)? {
                Some(WatcherMsg::Down(exit)) if exit.actor == watched => Ok(()),
                other => Err(Error::user(format!("expected the exit, got {other:?}"))),
            }
        })
        .unwrap();
    watcher.send(WatcherMsg::Work(1)).unwrap();
    ready_rx.recv_timeout(WAIT).unwrap();

    target.send(()).unwrap();
    target.join_timeout(WAIT).unwrap();
    go_tx.send(()).unwrap();

    let reason = watcher.join_timeout(WAIT).unwrap();
    actorcore::assert_with_log!(reason.is_normal(), "work then exit", "normal", reason);
    actorcore::test_complete!("mapped_watch_exit_reaches_full_mailbox");
}

enum Doubler {
    Double(u32, CallerRef),
}

#[test]
fn call_reply_reaches_caller_with_full_mailbox() {
    init_test("call_reply_reaches_caller_with_full_mailbox");
    let server = ActorBuilder::<Doubler>::new()
        .spawn(|ctx| loop {
            let Doubler::Double(n, from) = ctx.receive()?;
            from.reply(n * 2);
        })
        .unwrap();

    let target = server.clone();
    let client = ActorBuilder::<u32>::new()
        .mailbox(full_mailbox(1))
        .spawn(move |ctx| {
            ctx.self_ref().send(7)?;
            let got: u32 = call(&target, |from| Doubler::Double(21, from), Some(WAIT))?;
            if got != 42 {
                return Err(Error::user(format!("got {got}")));
            }
            match ctx.try_receive()? {
                Some(7) => Ok(()),
                other => Err(Error::user(format!("filler lost, got {other:?}"))),
            }
        })
        .unwrap();

    let reason = client.join_timeout(WAIT).unwrap();
    actorcore::assert_with_log!(reason.is_normal(), "reply delivered", "normal", reason);
    server.shutdown();
    server.join_timeout(WAIT).unwrap();
    actorcore::test_complete!("call_reply_reaches_caller_with_full_mailbox");
}

#[test]
fn shutdown_reaches_actor_with_full_mailbox() {
    init_test("shutdown_reaches_actor_with_full_mailbox");
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let handled = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&handled);
    let actor = ActorBuilder::<u32>::new()
        .mailbox(full_mailbox(2))
        .spawn(move |ctx| {
            go_rx.recv().map_err(|_| Error::user("test went away"))?;
            loop {
                ctx.receive()?;
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    actor.send(1).unwrap();
    actor.send(2).unwrap();
    actor.shutdown();
    go_tx.send(()).unwrap();

    let reason = actor.join_timeout(WAIT).unwrap();
    actorcore::assert_with_log!(reason.is_normal(), "orderly stop", "normal", reason);
    let n = handled.load(Ordering::SeqCst);
    actorcore::assert_with_log!(n == 2, "queued work handled, then shutdown", 2, n);
    actorcore::test_complete!("shutdown_reaches_actor_with_full_mailbox");
}
