//! Property tests for erased callbacks and callback lists.

mod common;

use common::*;
use proptest::prelude::*;
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft::callback::{Callback, CallbackList};
use weft::error::ErrorKind;
use weft::test_utils::{AllocatorControl, TestAllocator};

/// Counts payload drops, whether or not the payload ran.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Assign { heap: bool },
    Invoke,
    Clear,
    TakeAndDrop,
    TakeAndRestore,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(|heap| Op::Assign { heap }),
        Just(Op::Invoke),
        Just(Op::Clear),
        Just(Op::TakeAndDrop),
        Just(Op::TakeAndRestore),
    ]
}

fn payload(ran: &Arc<AtomicUsize>, drops: &Arc<AtomicUsize>, heap: bool) -> Callback<u32, u32> {
    let ran = Arc::clone(ran);
    let counter = DropCounter(Arc::clone(drops));
    if heap {
        let padding = [7_u64; 8];
        Callback::new(move |x: u32| {
            black_box((&counter, padding));
            ran.fetch_add(1, Ordering::SeqCst);
            x + 1
        })
    } else {
        Callback::new(move |x: u32| {
            black_box(&counter);
            ran.fetch_add(1, Ordering::SeqCst);
            x + 1
        })
    }
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn every_payload_runs_at_most_once_and_is_dropped_once(
        ops in prop::collection::vec(op(), 0..40)
    ) {
        init_test_logging();
        let ran = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        let mut created = 0_usize;
        let mut expected_runs = 0_usize;
        let mut armed = false;
        let mut cb: Callback<u32, u32> = Callback::empty();

        for op in ops {
            match op {
                Op::Assign { heap } => {
                    cb = payload(&ran, &drops, heap);
                    prop_assert_eq!(cb.is_inline(), !heap);
                    created += 1;
                    armed = true;
                }
                Op::Invoke => {
                    let result = cb.invoke(41);
                    if armed {
                        prop_assert_eq!(result.expect("armed callback runs"), 42);
                        expected_runs += 1;
                    } else {
                        prop_assert_eq!(result.expect_err("empty").kind(), ErrorKind::InvalidState);
                    }
                    armed = false;
                }
                Op::Clear => {
                    cb.clear();
                    armed = false;
                }
                Op::TakeAndDrop => {
                    drop(cb.take());
                    armed = false;
                }
                Op::TakeAndRestore => {
                    let moved = cb.take();
                    prop_assert!(cb.is_empty());
                    prop_assert_eq!(moved.is_armed(), armed);
                    cb = moved;
                }
            }
            prop_assert_eq!(cb.is_armed(), armed);
            prop_assert_eq!(ran.load(Ordering::SeqCst), expected_runs);
        }
        drop(cb);
        prop_assert_eq!(drops.load(Ordering::SeqCst), created);
    }

    #[test]
    fn failed_construction_never_leaks(
        allocation_budget in 0_usize..6,
        construction_budget in 0_usize..6,
        attempts in 1_usize..10,
    ) {
        init_test_logging();
        let ctrl = AllocatorControl::with_budgets(Some(allocation_budget), Some(construction_budget));
        let drops = Arc::new(AtomicUsize::new(0));
        let mut built = Vec::new();
        let mut failures = 0_usize;

        for _ in 0..attempts {
            let counter = DropCounter(Arc::clone(&drops));
            let padding = [1_u64; 8];
            let result = Callback::<()>::try_new_in(
                move |()| {
                    black_box((&counter, padding));
                },
                TestAllocator::new(Arc::clone(&ctrl)),
            );
            match result {
                Ok(cb) => built.push(cb),
                Err(err) => {
                    prop_assert!(matches!(
                        err.kind(),
                        ErrorKind::AllocationFailure | ErrorKind::ConstructionFailure
                    ));
                    failures += 1;
                }
            }
        }

        let succeeded = allocation_budget.min(construction_budget).min(attempts);
        prop_assert_eq!(built.len(), succeeded);
        prop_assert_eq!(drops.load(Ordering::SeqCst), failures, "rejected payloads are dropped");
        prop_assert_eq!(ctrl.live_blocks(), built.len());

        let mut list: CallbackList<()> = CallbackList::new();
        list.extend(built);
        let invoked = list.drain_invoke(&()).len();
        prop_assert_eq!(invoked, succeeded);
        prop_assert_eq!(ctrl.live_blocks(), 0);
        prop_assert_eq!(ctrl.destructions(), ctrl.constructions());
        prop_assert_eq!(drops.load(Ordering::SeqCst), attempts);
    }
}

#[test]
fn callbacks_cross_threads() {
    init_test_logging();
    weft::test_phase!("callbacks_cross_threads");
    let (tx, rx) = std::sync::mpsc::channel::<Callback<u32, u32>>();
    let worker = std::thread::spawn(move || rx.iter().map(|cb| cb.call(2).expect("armed")).sum::<u32>());
    for factor in 1..=4 {
        tx.send(Callback::new(move |x: u32| x * factor)).expect("send");
    }
    drop(tx);
    assert_eq!(worker.join().expect("worker"), 2 + 4 + 6 + 8);
    weft::test_complete!("callbacks_cross_threads");
}
