// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancellation, stop-on-error, explicit selection and configuration loading.

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use pretty_assertions::assert_eq;
use shiftwork_runner::{
    command::Outcome,
    config::{DispatcherKind, RunnerConfig, TestThreads},
    context::ExecutionContext,
    errors::{CancelRunError, CommandError},
    reporter::{CancelReason, TestEventKind},
    result::{ResultLabel, ResultState, TestStatus},
    runner::TestRunnerBuilder,
    tree::{RunState, TestFilter, TestNodeBuilder},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

#[test]
fn main_thread_runs_cannot_be_cancelled() -> Result<()> {
    test_init();

    let tree = TestNodeBuilder::fixture("F")
        .child(TestNodeBuilder::case("t", pass()))
        .build();
    let config = RunnerConfig {
        run_on_main_thread: true,
        ..RunnerConfig::default()
    };
    let runner = build_runner(&tree, config)?;
    let handle = runner.cancel_handle();
    assert_eq!(handle.level_of_parallelism(), 0);
    assert_eq!(
        handle.cancel_run(false),
        Err(CancelRunError::Unsupported {
            dispatcher: "main-thread"
        }),
    );

    // The refused request leaves the run untouched.
    let (summary, events) = execute(runner)?;
    assert_eq!(summary.result.state(), ResultState::SUCCESS);
    ensure!(
        !events
            .iter()
            .any(|kind| matches!(kind, TestEventKind::RunBeginCancel { .. })),
        "no cancel notice was reported"
    );

    Ok(())
}

#[test]
fn cancelling_a_finished_run_is_harmless() -> Result<()> {
    test_init();

    let tree = TestNodeBuilder::fixture("F")
        .children((0..3).map(|i| TestNodeBuilder::case(format!("t{i}"), pass())))
        .build();
    let runner = build_runner(&tree, parallel_config(2))?;
    let handle = runner.cancel_handle();
    let (summary, _) = execute(runner)?;

    handle.cancel_run(false)?;
    handle.cancel_run(true)?;
    handle.cancel_run(true)?;

    assert_eq!(summary.result.state(), ResultState::SUCCESS);
    assert_eq!(summary.stats.passed, 3);
    Ok(())
}

#[test]
fn stop_on_error_cancels_the_rest() -> Result<()> {
    test_init();

    let tree = TestNodeBuilder::fixture("F")
        .child(TestNodeBuilder::case("broken", fail("expected 1, got 2")).order(1))
        .children((0..3).map(|i| TestNodeBuilder::case(format!("after_{i}"), pass())))
        .build();
    let config = RunnerConfig {
        stop_on_error: true,
        ..parallel_config(2)
    };

    let (summary, events) = run(&tree, config)?;

    assert_eq!(started(&events), ["F", "F.broken"]);
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(summary.stats.passed, 0);
    ensure!(
        summary.result.state().is_cancelled(),
        "suite is cancelled: {}",
        summary.result.state()
    );
    ensure!(
        events.iter().any(|kind| matches!(
            kind,
            TestEventKind::RunBeginCancel {
                reason: CancelReason::TestFailure,
                ..
            }
        )),
        "the failure was reported as the cancel reason"
    );

    Ok(())
}

#[test]
fn forced_cancel_waits_for_running_tests_to_finish() -> Result<()> {
    test_init();

    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let tree = TestNodeBuilder::fixture("F")
        .child(TestNodeBuilder::case("slow", move |_: &ExecutionContext| {
            flag.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok::<_, CommandError>(Outcome::passed())
        }))
        .build();
    let config = RunnerConfig {
        force_cancel_wait: Duration::from_secs(10),
        ..parallel_config(1)
    };
    let runner = build_runner(&tree, config)?;
    let handle = runner.cancel_handle();

    let (outcome, cancelled) = thread::scope(|s| {
        let canceller = s.spawn(|| {
            while !started.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            handle.cancel_run(true)
        });
        let outcome = execute(runner);
        (outcome, canceller.join().expect("canceller thread panicked"))
    });
    cancelled?;
    let (summary, _) = outcome?;

    // The running test completes by itself, well within the wait.
    ensure!(
        summary.elapsed < Duration::from_secs(5),
        "run took {:?}",
        summary.elapsed
    );
    let slow = summary
        .result
        .find("F.slow")
        .ok_or_else(|| color_eyre::eyre::eyre!("no result for F.slow"))?;
    assert_eq!(slow.state(), ResultState::SUCCESS);
    Ok(())
}

#[test]
fn explicit_tests_run_only_when_selected() -> Result<()> {
    test_init();

    let tree = || {
        TestNodeBuilder::grouping("Run")
            .child(TestNodeBuilder::case("plain", pass()))
            .child(TestNodeBuilder::case("manual", pass()).run_state(RunState::Explicit, None))
            .build()
    };

    let (summary, _) = run(&tree(), parallel_config(2))?;
    let manual = summary
        .result
        .find("Run.manual")
        .ok_or_else(|| color_eyre::eyre::eyre!("no result for Run.manual"))?;
    assert_eq!(manual.state(), ResultState::EXPLICIT);
    assert_eq!(summary.stats.skipped, 1);

    let mut builder = TestRunnerBuilder::default();
    builder
        .set_test_threads(TestThreads::Count(2))
        .set_filter(TestFilter::full_names(["Run.manual"]));
    let runner = builder.build(tree())?;
    assert_eq!(runner.test_count(), 1);
    let (summary, events) = execute(runner)?;
    assert_eq!(started(&events), ["Run", "Run.manual"]);
    assert_eq!(summary.stats.passed, 1);

    Ok(())
}

#[test]
fn ignored_suite_reports_children_as_ignored() -> Result<()> {
    test_init();

    let tree = TestNodeBuilder::fixture("Later")
        .run_state(RunState::Ignored, Some("flaky on CI"))
        .children((0..2).map(|i| TestNodeBuilder::case(format!("t{i}"), pass())))
        .build();

    let (summary, events) = run(&tree, parallel_config(2))?;

    assert_eq!(summary.result.state().status(), TestStatus::Skipped);
    assert_eq!(summary.result.state().label(), ResultLabel::Ignored);
    assert_eq!(summary.result.message(), Some("flaky on CI"));
    assert_eq!(finished(&events), ["Later.t0", "Later.t1", "Later"]);
    assert_eq!(summary.stats.ignored, 2);

    Ok(())
}

#[test]
fn config_from_toml_selects_the_dispatcher() -> Result<()> {
    let config = RunnerConfig::from_sources_with_env(
        None,
        Some(indoc! {r#"
            test-threads = 3
            stop-on-error = true
            force-cancel-wait = "250ms"
        "#}),
        Default::default(),
    )?;

    assert_eq!(config.test_threads, TestThreads::Count(3));
    assert_eq!(config.dispatcher_kind(), DispatcherKind::Parallel { threads: 3 });
    assert_eq!(config.force_cancel_wait, Duration::from_millis(250));
    ensure!(config.stop_on_error, "stop-on-error was read");
    Ok(())
}
