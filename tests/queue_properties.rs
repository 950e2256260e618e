//! Property tests for the single-consumer queues.
//!
//! Each queue shape is driven by a random sequence of operations and
//! compared against a `VecDeque` model:
//!
//! - enqueue succeeds iff the model has room
//! - poll returns the model's front
//! - a cursor walk that deletes matching values keeps the rest in order
//! - a walk that skips everything changes nothing

mod common;

use std::collections::VecDeque;
use std::sync::Arc;

use actorcore::queue::{
    ArrayIntQueue, ArrayObjectQueue, LinkedArrayIntQueue, LinkedArrayObjectQueue,
    SingleConsumerQueue, BLOCK_SIZE,
};
use common::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Enqueue(i32),
    Poll,
    DeleteMultiplesOf(i32),
    SkipAll,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => any::<i32>().prop_map(Op::Enqueue),
        2 => Just(Op::Poll),
        1 => (2..5i32).prop_map(Op::DeleteMultiplesOf),
        1 => Just(Op::SkipAll),
    ]
}

fn walk_delete<Q: SingleConsumerQueue<i32>>(q: &Q, doomed: impl Fn(i32) -> bool) {
    let mut cursor = None;
    while let Some(node) = q.successor(cursor.as_ref()) {
        match q.value(&node) {
            Some(v) if doomed(v) => cursor = q.delete(&node),
            _ => cursor = Some(node),
        }
    }
}

fn run_model<Q: SingleConsumerQueue<i32>>(q: &Q, ops: &[Op]) -> Result<(), TestCaseError> {
    let capacity = q.capacity();
    let mut model = VecDeque::new();
    for op in ops {
        match op {
            Op::Enqueue(v) => {
                let room = capacity.map_or(true, |c| model.len() < c);
                let accepted = q.enqueue(*v).is_ok();
                prop_assert_eq!(accepted, room, "enqueue {} with {} queued", v, model.len());
                if accepted {
                    model.push_back(*v);
                }
            }
            Op::Poll => prop_assert_eq!(q.poll(), model.pop_front()),
            Op::DeleteMultiplesOf(d) => {
                walk_delete(q, |v| v % d == 0);
                model.retain(|v| v % d != 0);
            }
            Op::SkipAll => walk_delete(q, |_| false),
        }
        prop_assert_eq!(q.size(), model.len());
    }
    prop_assert_eq!(q.snapshot(), model.into_iter().collect::<Vec<_>>());
    Ok(())
}

proptest! {
    #![proptest_config(test_proptest_config(256))]

    #[test]
    fn array_queue_matches_model(ops in prop::collection::vec(arb_op(), 0..200)) {
        init_test_logging();
        run_model(&ArrayIntQueue::new(8), &ops)?;
    }

    #[test]
    fn array_object_queue_matches_model(ops in prop::collection::vec(arb_op(), 0..200)) {
        run_model(&ArrayObjectQueue::<i32>::new(16), &ops)?;
    }

    #[test]
    fn linked_array_queue_matches_model(ops in prop::collection::vec(arb_op(), 0..400)) {
        run_model(&LinkedArrayIntQueue::new(), &ops)?;
    }

    #[test]
    fn linked_array_object_queue_matches_model(ops in prop::collection::vec(arb_op(), 0..400)) {
        run_model(&LinkedArrayObjectQueue::<i32>::new(), &ops)?;
    }
}

/// Values from each producer arrive in the order that producer sent them.
fn per_producer_fifo<Q>(q: Arc<Q>, producers: i32, per_producer: i32)
where
    Q: SingleConsumerQueue<i32> + 'static,
{
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for i in 0..per_producer {
                    let v = p * per_producer + i;
                    while q.enqueue(v).is_err() {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let total = (producers * per_producer) as usize;
    let mut last = vec![-1; producers as usize];
    let mut seen = 0;
    while seen < total {
        // Odd values are consumed through the cursor, even ones by poll, so
        // the deletion path is exercised under contention too.
        let mut cursor = None;
        while let Some(node) = q.successor(cursor.as_ref()) {
            match q.value(&node) {
                Some(v) if v % 2 == 1 => {
                    let p = (v / per_producer) as usize;
                    assert!(v > last[p], "producer {p}: {v} after {}", last[p]);
                    last[p] = v;
                    seen += 1;
                    cursor = q.delete(&node);
                }
                _ => cursor = Some(node),
            }
        }
        if let Some(v) = q.poll() {
            let p = (v / per_producer) as usize;
            assert!(v > last[p], "producer {p}: {v} after {}", last[p]);
            last[p] = v;
            seen += 1;
        }
    }
    for h in handles {
        h.join().expect("producer");
    }
}

#[test]
fn array_queue_concurrent_producers_keep_order() {
    init_test_logging();
    actorcore::test_phase!("array_queue_concurrent_producers_keep_order");
    per_producer_fifo(Arc::new(ArrayIntQueue::new(64)), 4, 2_000);
    actorcore::test_complete!("array_queue_concurrent_producers_keep_order");
}

#[test]
fn linked_array_queue_concurrent_producers_keep_order() {
    init_test_logging();
    actorcore::test_phase!("linked_array_queue_concurrent_producers_keep_order");
    per_producer_fifo(Arc::new(LinkedArrayIntQueue::new()), 4, 200 * BLOCK_SIZE as i32);
    actorcore::test_complete!("linked_array_queue_concurrent_producers_keep_order");
}
