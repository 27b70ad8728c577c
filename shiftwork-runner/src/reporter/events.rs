// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events for the reporter.
//!
//! These types form the interface between the runner and the code that consumes run progress.

use crate::{
    result::{FailureSite, ResultLabel, TestResult, TestStatus},
    tree::TestNode,
};
use chrono::{DateTime, FixedOffset};
use std::{sync::Arc, time::Duration};

/// A test event.
///
/// Events are produced by a [`TestRunner`](crate::runner::TestRunner) and consumed by the
/// callback passed to [`execute`](crate::runner::TestRunner::execute).
#[derive(Clone, Debug)]
pub struct TestEvent {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the test run.
    pub elapsed: Duration,

    /// The kind of test event this is.
    pub kind: TestEventKind,
}

/// The kind of test event this is.
///
/// Forms part of [`TestEvent`].
#[derive(Clone, Debug)]
pub enum TestEventKind {
    /// The test run started.
    RunStarted {
        /// The number of leaf tests that will be run.
        test_count: usize,

        /// The effective level of parallelism.
        level_of_parallelism: usize,
    },

    /// A test or suite started running.
    TestStarted {
        /// The test or suite.
        test: Arc<TestNode>,

        /// Statistics for the run so far.
        current_stats: RunStats,

        /// The number of tests and suites currently running, including this one.
        running: usize,

        /// The cancel status of the run, if any.
        cancel_state: Option<CancelReason>,
    },

    /// A test or suite finished.
    TestFinished {
        /// The result.
        result: Arc<TestResult>,

        /// Statistics for the run so far, including this result.
        current_stats: RunStats,

        /// The number of tests and suites still running.
        running: usize,

        /// The cancel status of the run, if any.
        cancel_state: Option<CancelReason>,
    },

    /// A test wrote output.
    TestOutput {
        /// The test that wrote the output.
        test: Arc<TestNode>,

        /// The output.
        text: String,
    },

    /// A test sent a message.
    Message {
        /// The test that sent the message.
        test: Arc<TestNode>,

        /// The message.
        message: String,
    },

    /// A suite's one-time setup is about to run.
    OneTimeSetUpStarted {
        /// The suite.
        suite: Arc<TestNode>,
    },

    /// A suite's one-time setup finished.
    OneTimeSetUpFinished {
        /// The suite.
        suite: Arc<TestNode>,
    },

    /// A suite's one-time teardown is about to run.
    OneTimeTearDownStarted {
        /// The suite.
        suite: Arc<TestNode>,
    },

    /// A suite's one-time teardown finished.
    OneTimeTearDownFinished {
        /// The suite.
        suite: Arc<TestNode>,
    },

    /// A cancellation notice was received.
    RunBeginCancel {
        /// The number of tests and suites still running.
        running: usize,

        /// The reason this run was canceled.
        reason: CancelReason,
    },

    /// The test run finished.
    RunFinished {
        /// The time at which the run was started.
        start_time: DateTime<FixedOffset>,

        /// The amount of time it took for the tests to run.
        elapsed: Duration,

        /// Statistics for the run.
        run_stats: RunStats,
    },
}

/// The reason why a test run is being cancelled.
///
/// Variants are ordered by severity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum CancelReason {
    /// A test failed and stop-on-error was set.
    TestFailure,

    /// A stop was requested: running tests finish, nothing more is dispatched.
    Stop,

    /// An abort was requested.
    Abort,
}

impl CancelReason {
    /// Returns true if this reason forces cancellation.
    pub fn is_forced(self) -> bool {
        self == Self::Abort
    }
}

/// Statistics for a test run.
///
/// Counts are of leaf tests only. Suites contribute solely through
/// [`setup_failed`](Self::setup_failed).
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of tests that were expected to be run at the beginning.
    ///
    /// If the test run is cancelled before every result is reported, this will be more than
    /// `finished_count` at the end.
    pub initial_run_count: usize,

    /// The total number of tests that reported a result.
    pub finished_count: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed, excluding cancelled and not-runnable tests.
    pub failed: usize,

    /// The number of tests that passed with warnings.
    pub warnings: usize,

    /// The number of tests that were skipped, excluding ignored tests.
    pub skipped: usize,

    /// The number of tests that were ignored.
    pub ignored: usize,

    /// The number of inconclusive tests.
    pub inconclusive: usize,

    /// The number of tests that were cancelled.
    pub cancelled: usize,

    /// The number of tests that could not be run.
    pub not_runnable: usize,

    /// The number of suites whose one-time setup failed.
    pub setup_failed: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run can be marked as failed if any of the following are true:
    /// * the run was cancelled: the initial run count is greater than the final run count, or
    ///   any test was cancelled
    /// * any tests failed or could not be run
    /// * any suite's one-time setup failed
    pub fn is_success(&self) -> bool {
        if self.initial_run_count > self.finished_count {
            return false;
        }
        if self.any_failed() || self.cancelled > 0 {
            return false;
        }
        true
    }

    /// Returns true if any tests failed, could not be run, or were skipped because of a setup
    /// failure.
    #[inline]
    pub fn any_failed(&self) -> bool {
        self.failed > 0 || self.not_runnable > 0 || self.setup_failed > 0
    }

    pub(crate) fn on_test_finished(&mut self, result: &TestResult) {
        let state = result.state();
        if result.test().is_suite() {
            if state.site() == FailureSite::SetUp && state.status() == TestStatus::Failed {
                self.setup_failed += 1;
            }
            return;
        }

        self.finished_count += 1;
        match (state.status(), state.label()) {
            (TestStatus::Passed, _) => self.passed += 1,
            (TestStatus::Warning, _) => self.warnings += 1,
            (TestStatus::Inconclusive, _) => self.inconclusive += 1,
            (TestStatus::Skipped, ResultLabel::Ignored) => self.ignored += 1,
            (TestStatus::Skipped, _) => self.skipped += 1,
            (TestStatus::Failed, ResultLabel::Cancelled) => self.cancelled += 1,
            (TestStatus::Failed, ResultLabel::Invalid) => self.not_runnable += 1,
            (TestStatus::Failed, _) => self.failed += 1,
        }
    }
}
