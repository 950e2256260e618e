//! Property tests for selective receive under concurrent senders.
//!
//! Several senders fill one actor's mailbox while it first takes only the
//! messages a random predicate selects, then everything else. Whatever the
//! mailbox shape, each sender's messages must come out in the order they
//! were sent, in both phases.

mod common;

use std::sync::mpsc;

use actorcore::actor::ActorBuilder;
use actorcore::mailbox::{MailboxConfig, OverflowPolicy};
use common::*;
use proptest::prelude::*;

type Msg = (u32, u32);

#[derive(Debug, Clone)]
struct Scenario {
    senders: u32,
    per_sender: u32,
    modulus: u32,
    residue: u32,
    /// Spare capacity of a bounded mailbox; `None` for unbounded.
    slack: Option<usize>,
}

impl Scenario {
    fn selects(&self, msg: &Msg) -> bool {
        msg.1 % self.modulus == self.residue
    }

    fn total(&self) -> usize {
        (self.senders * self.per_sender) as usize
    }

    fn selected(&self) -> usize {
        let per_sender = (0..self.per_sender).filter(|seq| seq % self.modulus == self.residue);
        per_sender.count() * self.senders as usize
    }

    fn mailbox(&self) -> MailboxConfig {
        // Skipped messages stay queued, so a bounded mailbox must hold them
        // all or the selective phase could wait on a blocked sender.
        self.slack.map_or_else(MailboxConfig::unbounded, |slack| {
            MailboxConfig::bounded(self.total() + slack, OverflowPolicy::Block)
        })
    }
}

fn arb_scenario() -> impl Strategy<Value = Scenario> {
    (1u32..=4, 1u32..=40, 2u32..=4, prop::option::of(0usize..8)).prop_flat_map(
        |(senders, per_sender, modulus, slack)| {
            (0..modulus).prop_map(move |residue| Scenario {
                senders,
                per_sender,
                modulus,
                residue,
                slack,
            })
        },
    )
}

fn sender_order_kept(msgs: &[Msg], senders: u32) -> bool {
    (0..senders).all(|s| {
        let seqs: Vec<u32> = msgs.iter().filter(|m| m.0 == s).map(|m| m.1).collect();
        seqs.windows(2).all(|w| w[0] < w[1])
    })
}

fn run_scenario(scenario: &Scenario) -> Result<(), TestCaseError> {
    let (total, selected) = (scenario.total(), scenario.selected());
    let (out_tx, out_rx) = mpsc::channel::<(Vec<Msg>, Vec<Msg>)>();
    let filter = scenario.clone();
    let receiver = ActorBuilder::<Msg>::new()
        .mailbox(scenario.mailbox())
        .spawn(move |ctx| {
            let mut picked = Vec::with_capacity(selected);
            for _ in 0..selected {
                picked.push(ctx.receive_selective(None, |m: &Msg| filter.selects(m))?);
            }
            let mut rest = Vec::with_capacity(total - selected);
            for _ in selected..total {
                rest.push(ctx.receive()?);
            }
            let _ = out_tx.send((picked, rest));
            Ok(())
        })
        .expect("spawn receiver");

    let producers: Vec<_> = (0..scenario.senders)
        .map(|s| {
            let (receiver, n) = (receiver.clone(), scenario.per_sender);
            std::thread::spawn(move || {
                for seq in 0..n {
                    receiver.send_sync((s, seq)).expect("send");
                }
            })
        })
        .collect();
    for p in producers {
        p.join().expect("producer");
    }

    let reason = receiver.join_timeout(WAIT);
    prop_assert!(
        matches!(&reason, Ok(r) if r.is_normal()),
        "receiver ended with {:?}",
        reason
    );
    let (picked, rest) = out_rx.recv_timeout(WAIT).expect("results");
    prop_assert!(picked.iter().all(|m| scenario.selects(m)), "picked {:?}", picked);
    prop_assert!(rest.iter().all(|m| !scenario.selects(m)), "rest {:?}", rest);
    prop_assert!(sender_order_kept(&picked, scenario.senders), "picked order {:?}", picked);
    prop_assert!(sender_order_kept(&rest, scenario.senders), "rest order {:?}", rest);
    Ok(())
}

proptest! {
    #![proptest_config(test_proptest_config(48))]

    #[test]
    fn selective_receive_keeps_sender_order(scenario in arb_scenario()) {
        init_test_logging();
        run_scenario(&scenario)?;
    }
}

#[test]
fn bounded_mailbox_selective_receive_keeps_sender_order() {
    init_test_logging();
    actorcore::test_phase!("bounded_mailbox_selective_receive_keeps_sender_order");
    let scenario = Scenario {
        senders: 4,
        per_sender: 50,
        modulus: 3,
        residue: 1,
        slack: Some(0),
    };
    run_scenario(&scenario).expect("bounded scenario");
    actorcore::test_complete!("bounded_mailbox_selective_receive_keeps_sender_order");
}
