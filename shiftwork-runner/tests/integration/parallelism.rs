// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concurrency limits, thread routing and isolation under the parallel dispatcher.

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure, eyre};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use shiftwork_runner::{
    affinity::{ThreadAffinity, current_affinity},
    command::{Outcome, TestCommand},
    config::RunnerConfig,
    context::ExecutionContext,
    dispatcher::{ParallelWorkItemDispatcher, ShiftEvent, ShiftKind, WorkItemDispatcher},
    errors::CommandError,
    reporter::TestEventKind,
    result::ResultState,
    runner::{RunCancelHandle, TestRunnerBuilder},
    tree::{ParallelScope, TestNodeBuilder},
};
use std::{
    collections::BTreeSet,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

#[test]
fn parallel_leaves_never_exceed_worker_count() -> Result<()> {
    test_init();

    let meter = Arc::new(ConcurrencyMeter::default());
    let tree = TestNodeBuilder::fixture("Wide")
        .parallel_scope(ParallelScope::ALL)
        .children(
            (0..12).map(|i| {
                TestNodeBuilder::case(format!("t{i}"), meter.command(Duration::from_millis(20)))
            }),
        )
        .build();

    let (summary, _) = run(&tree, parallel_config(3))?;

    assert_eq!(summary.stats.passed, 12);
    ensure!(
        meter.max() <= 3,
        "at most 3 leaves ran at once, saw {}",
        meter.max()
    );
    ensure!(meter.max() >= 1, "something ran");

    Ok(())
}

fn record_thread(names: &Arc<Mutex<Vec<(String, ThreadAffinity)>>>) -> impl TestCommand + use<> {
    let names = names.clone();
    move |_: &ExecutionContext| {
        let name = thread::current().name().unwrap_or("<unnamed>").to_owned();
        names.lock().push((name, current_affinity()));
        Ok::<_, CommandError>(Outcome::passed())
    }
}

#[test]
fn single_threaded_affinity_routes_to_the_sta_worker() -> Result<()> {
    test_init();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let tree = TestNodeBuilder::fixture("Mixed")
        .parallel_scope(ParallelScope::ALL)
        .child(
            TestNodeBuilder::case("sta", record_thread(&seen))
                .thread_affinity(ThreadAffinity::SingleThreaded),
        )
        .build();

    let (summary, _) = run(&tree, parallel_config(2))?;
    assert_eq!(summary.result.state(), ResultState::SUCCESS);

    let seen = seen.lock();
    assert_eq!(
        *seen,
        [(
            "shiftwork-worker-sta".to_owned(),
            ThreadAffinity::SingleThreaded
        )],
    );

    Ok(())
}

#[test]
fn single_thread_dispatcher_runs_on_its_own_thread() -> Result<()> {
    test_init();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let tree = TestNodeBuilder::fixture("Serial")
        .children((0..3).map(|i| TestNodeBuilder::case(format!("t{i}"), record_thread(&seen))))
        .build();
    let config = RunnerConfig {
        single_threaded: true,
        ..Default::default()
    };

    let runner = build_runner(&tree, config)?;
    assert_eq!(runner.level_of_parallelism(), 0);
    let (summary, _) = execute(runner)?;
    assert_eq!(summary.stats.passed, 3);

    let threads: BTreeSet<_> = seen.lock().iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(threads, BTreeSet::from(["shiftwork-runner".to_owned()]));

    Ok(())
}

/// Records which group of tests is running and flags any overlap between groups.
#[derive(Debug, Default)]
struct GroupTracker {
    active: [AtomicUsize; 3],
    overlaps: AtomicUsize,
}

impl GroupTracker {
    fn command(self: &Arc<Self>, group: usize) -> impl TestCommand + use<> {
        let tracker = self.clone();
        move |_: &ExecutionContext| {
            tracker.active[group].fetch_add(1, Ordering::SeqCst);
            tracker.check(group);
            thread::sleep(Duration::from_millis(10));
            tracker.check(group);
            tracker.active[group].fetch_sub(1, Ordering::SeqCst);
            Ok::<_, CommandError>(Outcome::passed())
        }
    }

    fn check(&self, group: usize) {
        let others = (0..self.active.len())
            .filter(|&other| other != group)
            .map(|other| self.active[other].load(Ordering::SeqCst))
            .sum::<usize>();
        if others > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn non_parallel_suites_run_in_isolation() -> Result<()> {
    test_init();

    let tracker = Arc::new(GroupTracker::default());
    let serial = |name: &str, group: usize| {
        TestNodeBuilder::fixture(name)
            .parallel_scope(ParallelScope::NONE)
            .children((0..3).map(|i| {
                TestNodeBuilder::case(format!("t{i}"), tracker.command(group))
                    .parallel_scope(ParallelScope::SELF)
            }))
    };
    let tree = TestNodeBuilder::grouping("Run")
        .parallel_scope(ParallelScope::CHILDREN)
        .child(
            TestNodeBuilder::fixture("Fast")
                .children((0..6).map(|i| TestNodeBuilder::case(format!("t{i}"), tracker.command(0)))),
        )
        .child(serial("SerialA", 1))
        .child(serial("SerialB", 2))
        .build();

    let dispatcher = ParallelWorkItemDispatcher::new(4);
    let depths = Arc::new(Mutex::new(Vec::new()));
    {
        let depths = depths.clone();
        let weak = Arc::downgrade(&dispatcher);
        dispatcher.set_shift_observer(move |event| {
            if let (ShiftEvent::Started(kind), Some(dispatcher)) = (event, weak.upgrade()) {
                depths.lock().push((kind, dispatcher.isolation_depth()));
            }
        });
    }

    let mut builder = TestRunnerBuilder::default();
    builder.set_dispatcher(dispatcher.clone());
    let runner = builder.build(tree)?;
    assert_eq!(runner.level_of_parallelism(), 4);
    let (summary, _) = execute(runner)?;

    assert_eq!(summary.stats.passed, 12);
    assert_eq!(tracker.overlaps.load(Ordering::SeqCst), 0, "groups never overlapped");

    let depths = depths.lock();
    ensure!(
        depths.iter().all(|&(_, depth)| depth <= 1),
        "sibling isolations never nest: {depths:?}"
    );
    ensure!(
        depths
            .iter()
            .any(|&(kind, depth)| kind == ShiftKind::Parallel && depth == 1),
        "isolated parallel leaves ran in a parallel shift: {depths:?}"
    );
    assert_eq!(dispatcher.isolation_depth(), 0);
    assert_eq!(dispatcher.active_shift(), None);
    for queue in dispatcher.queues() {
        ensure!(queue.is_empty(), "{} queue drained", queue.name());
        assert_eq!(queue.save_depth(), 0, "{} queue restored", queue.name());
    }
    ensure!(
        dispatcher.items_dispatched() >= 15,
        "every node was dispatched ({} items)",
        dispatcher.items_dispatched()
    );

    Ok(())
}

#[test]
fn stop_request_leaves_pending_work_cancelled() -> Result<()> {
    test_init();

    let handle: Arc<OnceLock<RunCancelHandle>> = Arc::new(OnceLock::new());
    let ran = Arc::new(AtomicUsize::new(0));
    let leaf = |stop: bool| {
        let handle = handle.clone();
        let ran = ran.clone();
        move |_: &ExecutionContext| {
            ran.fetch_add(1, Ordering::SeqCst);
            if stop {
                if let Some(handle) = handle.get() {
                    handle
                        .cancel_run(false)
                        .map_err(|err| CommandError::error(err.to_string()))?;
                }
            }
            Ok::<_, CommandError>(Outcome::passed())
        }
    };
    // A single worker runs the ordered children one after another.
    let tree = TestNodeBuilder::fixture("Chain")
        .parallel_scope(ParallelScope::SELF)
        .child(TestNodeBuilder::case("first", leaf(true)).order(1))
        .children((0..4).map(|i| TestNodeBuilder::case(format!("later_{i}"), leaf(false))))
        .build();

    let runner = build_runner(&tree, parallel_config(1))?;
    handle
        .set(runner.cancel_handle())
        .map_err(|_| eyre!("cancel handle already set"))?;
    let (summary, _) = execute(runner)?;

    assert_eq!(ran.load(Ordering::SeqCst), 1, "nothing ran after the stop");
    assert_eq!(summary.stats.passed, 1);
    // Children that were never dispatched have no result at all.
    assert_eq!(summary.result.children().len(), 1);
    ensure!(
        summary.result.state().is_cancelled(),
        "suite is cancelled: {}",
        summary.result.state()
    );
    assert_eq!(summary.stats.initial_run_count, 5);
    ensure!(!summary.stats.is_success(), "an unfinished run is not a success");

    Ok(())
}

#[test]
fn custom_dispatcher_reports_its_name() {
    let dispatcher = ParallelWorkItemDispatcher::new(0);
    assert_eq!(dispatcher.name(), "parallel");
    assert_eq!(dispatcher.level_of_parallelism(), 1, "at least one worker");
}

#[test]
fn one_time_teardown_waits_for_parallel_children() -> Result<()> {
    test_init();

    for round in 0..10 {
        let done = Arc::new(AtomicUsize::new(0));
        let seen_by_teardown = Arc::new(AtomicUsize::new(usize::MAX));

        let seen = seen_by_teardown.clone();
        let counter = done.clone();
        let tree = TestNodeBuilder::fixture("Pool")
            .parallel_scope(ParallelScope::CHILDREN)
            .one_time_teardown(move |_: &ExecutionContext| {
                let finished = counter.load(Ordering::SeqCst);
                seen.store(finished, Ordering::SeqCst);
                if finished == 8 {
                    Ok::<_, CommandError>(Outcome::passed())
                } else {
                    Ok(Outcome::failed("teardown ran before every child finished"))
                }
            })
            .children((0..8u64).map(|i| {
                let done = done.clone();
                // Later children finish first.
                let delay = Duration::from_millis((8 - i) * 3);
                TestNodeBuilder::case(format!("c{i}"), move |_: &ExecutionContext| {
                    thread::sleep(delay);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CommandError>(Outcome::passed())
                })
            }))
            .build();

        let (summary, events) = run(&tree, parallel_config(4))?;

        assert_eq!(
            seen_by_teardown.load(Ordering::SeqCst),
            8,
            "round {round}: children finished before teardown"
        );
        assert_eq!(summary.result.state(), ResultState::SUCCESS, "round {round}");
        assert_eq!(summary.stats.passed, 8, "round {round}");

        let teardown_at = events
            .iter()
            .position(|kind| matches!(kind, TestEventKind::OneTimeTearDownFinished { .. }))
            .ok_or_else(|| eyre!("round {round}: teardown was not reported"))?;
        let last_child_at = events
            .iter()
            .rposition(|kind| match kind {
                TestEventKind::TestFinished { result, .. } => {
                    result.test().full_name().starts_with("Pool.")
                }
                _ => false,
            })
            .ok_or_else(|| eyre!("round {round}: no child finished"))?;
        ensure!(
            last_child_at < teardown_at,
            "round {round}: last child finished at {last_child_at}, teardown at {teardown_at}"
        );
        assert_eq!(finished(&events).last().map(String::as_str), Some("Pool"));
    }

    Ok(())
}
