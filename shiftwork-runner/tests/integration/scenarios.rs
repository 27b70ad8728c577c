// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end runs of small trees through each dispatcher.

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use shiftwork_runner::{
    command::Outcome,
    config::{RunnerConfig, TestThreads},
    context::{ExecutionContext, RunSettings},
    dispatcher::{MainThreadDispatcher, WorkItemQueue},
    errors::CommandError,
    reporter::{CancelReason, NullListener, TestEventKind},
    result::{FailureSite, ResultState, TestStatus},
    tree::{ParallelScope, TestNodeBuilder},
    work_item::WorkItem,
};
use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use test_case::test_case;

fn main_thread() -> RunnerConfig {
    RunnerConfig {
        run_on_main_thread: true,
        ..RunnerConfig::default()
    }
}

fn single_thread() -> RunnerConfig {
    RunnerConfig {
        single_threaded: true,
        ..RunnerConfig::default()
    }
}

#[test_case(main_thread() ; "main thread")]
#[test_case(single_thread() ; "single thread")]
#[test_case(parallel_config(4) ; "parallel")]
fn ordered_children_start_first(config: RunnerConfig) -> Result<()> {
    test_init();

    let tree = TestNodeBuilder::fixture("Ordered")
        .child(TestNodeBuilder::case("c", pass()))
        .child(TestNodeBuilder::case("b", pass()).order(2))
        .child(TestNodeBuilder::case("a", pass()).order(1))
        .child(TestNodeBuilder::case("d", pass()))
        .build();

    let (summary, events) = run(&tree, config)?;
    assert_eq!(
        started(&events),
        ["Ordered", "Ordered.a", "Ordered.b", "Ordered.c", "Ordered.d"],
    );
    assert_eq!(summary.result.state(), ResultState::SUCCESS);
    assert_eq!(summary.stats.passed, 4);
    ensure!(summary.stats.is_success(), "run succeeded: {:?}", summary.stats);

    Ok(())
}

#[test]
fn ordered_children_are_queued_first() -> Result<()> {
    test_init();

    let threads = Arc::new(Mutex::new(BTreeSet::new()));
    let record = |threads: &Arc<Mutex<BTreeSet<String>>>| {
        let threads = threads.clone();
        move |_: &ExecutionContext| {
            let name = thread::current().name().unwrap_or_default().to_owned();
            threads.lock().insert(name);
            Ok::<_, CommandError>(Outcome::passed())
        }
    };
    let tree = TestNodeBuilder::fixture("Queued")
        .parallel_scope(ParallelScope::CHILDREN)
        .child(TestNodeBuilder::case("x", record(&threads)))
        .child(TestNodeBuilder::case("c", record(&threads)).order(3))
        .child(TestNodeBuilder::case("y", record(&threads)))
        .child(TestNodeBuilder::case("a", record(&threads)).order(1))
        .child(TestNodeBuilder::case("b", record(&threads)).order(2))
        .build();

    // One worker drains the queue in dispatch order.
    let (summary, events) = run(&tree, parallel_config(1))?;
    assert_eq!(
        started(&events),
        [
            "Queued",
            "Queued.a",
            "Queued.b",
            "Queued.c",
            "Queued.x",
            "Queued.y"
        ],
    );
    assert_eq!(
        *threads.lock(),
        BTreeSet::from(["shiftwork-worker-1".to_owned()]),
        "children ran from the parallel queue"
    );
    assert_eq!(summary.stats.passed, 5);

    Ok(())
}

#[test]
fn failed_setup_skips_children_and_still_tears_down() -> Result<()> {
    test_init();

    let torn_down = Arc::new(AtomicBool::new(false));
    let flag = torn_down.clone();
    let tree = TestNodeBuilder::fixture("Db")
        .parallel_scope(ParallelScope::CHILDREN)
        .one_time_setup(|_: &ExecutionContext| -> Result<Outcome, CommandError> {
            Err(CommandError::error("connection refused"))
        })
        .one_time_teardown(move |_: &ExecutionContext| {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, CommandError>(Outcome::passed())
        })
        .children((0..3).map(|i| TestNodeBuilder::case(format!("query_{i}"), pass())))
        .build();

    let (summary, events) = run(&tree, parallel_config(2))?;

    assert_eq!(summary.result.state(), ResultState::SETUP_ERROR);
    assert_eq!(summary.result.children().len(), 3);
    for child in summary.result.children() {
        assert_eq!(child.state().status(), TestStatus::Skipped);
        assert_eq!(child.state().site(), FailureSite::Parent);
        let message = child.message().unwrap_or_default();
        ensure!(
            message.starts_with("OneTimeSetUp:"),
            "child message {message:?} names the setup failure"
        );
    }
    ensure!(torn_down.load(Ordering::SeqCst), "teardown ran");
    ensure!(
        events
            .iter()
            .any(|kind| matches!(kind, TestEventKind::OneTimeTearDownFinished { .. })),
        "teardown was reported"
    );
    // Skipped children never start, but every one of them finishes.
    assert_eq!(started(&events), ["Db"]);
    assert_eq!(finished(&events).len(), 4);
    assert_eq!(summary.stats.skipped, 3);
    assert_eq!(summary.stats.setup_failed, 1);

    Ok(())
}

#[test]
fn forced_cancel_completes_stragglers_once() -> Result<()> {
    test_init();

    let gate = Arc::new(Gate::default());
    let tree = TestNodeBuilder::fixture("Suite")
        .parallel_scope(ParallelScope::ALL)
        .children((0..5).map(|i| TestNodeBuilder::case(format!("stuck_{i}"), gate.command())))
        .build();

    let config = RunnerConfig {
        test_threads: TestThreads::Count(5),
        force_cancel_wait: Duration::from_millis(100),
        ..RunnerConfig::default()
    };
    let runner = build_runner(&tree, config)?;
    let handle = runner.cancel_handle();

    let (outcome, cancelled) = thread::scope(|s| {
        let canceller = s.spawn(|| {
            gate.wait_for(5);
            handle.cancel_run(true)
        });
        let outcome = execute(runner);
        (outcome, canceller.join().expect("canceller thread panicked"))
    });
    cancelled?;
    let (summary, events) = outcome?;

    // The stuck commands may finish now; their results must not be recorded a second time.
    gate.open();

    ensure!(
        summary.result.state().is_cancelled(),
        "suite is cancelled: {}",
        summary.result.state()
    );
    let finished = finished(&events);
    for i in 0..5 {
        let name = format!("Suite.stuck_{i}");
        let count = finished.iter().filter(|n| **n == name).count();
        assert_eq!(count, 1, "{name} finished exactly once");
        let result = summary
            .result
            .find(&name)
            .ok_or_else(|| color_eyre::eyre::eyre!("no result for {name}"))?;
        ensure!(result.state().is_cancelled(), "{name} is cancelled");
    }
    assert_eq!(summary.stats.cancelled, 5);
    ensure!(
        events.iter().any(|kind| matches!(
            kind,
            TestEventKind::RunBeginCancel {
                reason: CancelReason::Abort,
                ..
            }
        )),
        "abort was reported"
    );

    Ok(())
}

#[test]
fn saved_queue_survives_activity_on_its_replacement() -> Result<()> {
    test_init();

    let tree = TestNodeBuilder::grouping("Run")
        .children(["a", "b", "c"].map(|name| TestNodeBuilder::case(name, pass())))
        .build();
    let cx = ExecutionContext::root(
        tree.clone(),
        Arc::new(NullListener),
        Arc::new(MainThreadDispatcher::new()),
        RunSettings::default(),
    );
    let item = |i: usize| {
        let node = tree.children()[i].clone();
        WorkItem::create(node.clone(), cx.child(node), None)
    };

    let queue = WorkItemQueue::new("scenario");
    queue.start();
    queue.enqueue(item(0));
    queue.enqueue(item(1));

    queue.save();
    ensure!(queue.is_empty(), "replacement storage starts empty");
    queue.enqueue(item(2));
    let during = queue.dequeue(|| ()).map(|item| item.name().to_owned());
    assert_eq!(during.as_deref(), Some("c"));

    queue.restore();
    let after: Vec<_> = (0..2)
        .filter_map(|_| queue.dequeue(|| ()))
        .map(|item| item.name().to_owned())
        .collect();
    assert_eq!(after, ["a", "b"]);
    ensure!(queue.is_empty(), "nothing else was yielded");
    assert_eq!(queue.save_depth(), 0);

    Ok(())
}
