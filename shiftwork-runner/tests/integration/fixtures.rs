// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use color_eyre::eyre::{Result, WrapErr};
use parking_lot::{Condvar, Mutex};
use shiftwork_runner::{
    command::{Outcome, TestCommand},
    config::{RunnerConfig, TestThreads},
    context::ExecutionContext,
    errors::CommandError,
    reporter::{TestEvent, TestEventKind},
    runner::{RunSummary, TestRunner, TestRunnerBuilder},
    tree::TestNode,
};
use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn pass() -> impl TestCommand {
    |_: &ExecutionContext| Ok::<_, CommandError>(Outcome::passed())
}

pub(crate) fn fail(message: &'static str) -> impl TestCommand {
    move |_: &ExecutionContext| Ok::<_, CommandError>(Outcome::failed(message))
}

pub(crate) fn parallel_config(threads: usize) -> RunnerConfig {
    RunnerConfig {
        test_threads: TestThreads::Count(threads),
        ..RunnerConfig::default()
    }
}

pub(crate) fn build_runner(tree: &Arc<TestNode>, config: RunnerConfig) -> Result<TestRunner> {
    let mut builder = TestRunnerBuilder::default();
    builder.set_config(config);
    builder
        .build(tree.clone())
        .wrap_err("failed to build test runner")
}

/// Runs `runner` to completion and collects the kinds of every event it reported.
pub(crate) fn execute(runner: TestRunner) -> Result<(RunSummary, Vec<TestEventKind>)> {
    let events = Mutex::new(Vec::new());
    let summary = runner
        .execute(|event: TestEvent| events.lock().push(event.kind))
        .wrap_err("test run failed")?;
    Ok((summary, events.into_inner()))
}

pub(crate) fn run(
    tree: &Arc<TestNode>,
    config: RunnerConfig,
) -> Result<(RunSummary, Vec<TestEventKind>)> {
    execute(build_runner(tree, config)?)
}

/// Full names of tests in the order they started.
pub(crate) fn started(events: &[TestEventKind]) -> Vec<String> {
    events
        .iter()
        .filter_map(|kind| match kind {
            TestEventKind::TestStarted { test, .. } => Some(test.full_name().to_owned()),
            _ => None,
        })
        .collect()
}

/// Full names of tests in the order they finished.
pub(crate) fn finished(events: &[TestEventKind]) -> Vec<String> {
    events
        .iter()
        .filter_map(|kind| match kind {
            TestEventKind::TestFinished { result, .. } => {
                Some(result.test().full_name().to_owned())
            }
            _ => None,
        })
        .collect()
}

/// Tracks how many metered commands run at once.
#[derive(Debug, Default)]
pub(crate) struct ConcurrencyMeter {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyMeter {
    pub(crate) fn command(self: &Arc<Self>, duration: Duration) -> impl TestCommand + use<> {
        let meter = self.clone();
        move |_: &ExecutionContext| {
            let now = meter.current.fetch_add(1, Ordering::SeqCst) + 1;
            meter.max.fetch_max(now, Ordering::SeqCst);
            thread::sleep(duration);
            meter.current.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, CommandError>(Outcome::passed())
        }
    }

    pub(crate) fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// A gate that blocked commands wait on until it is opened.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub(crate) fn command(self: &Arc<Self>) -> impl TestCommand + use<> {
        let gate = self.clone();
        move |_: &ExecutionContext| {
            gate.waiting.fetch_add(1, Ordering::SeqCst);
            let mut open = gate.open.lock();
            while !*open {
                gate.cond.wait(&mut open);
            }
            Ok::<_, CommandError>(Outcome::passed())
        }
    }

    pub(crate) fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn wait_for(&self, count: usize) {
        while self.waiting() < count {
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub(crate) fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }
}
