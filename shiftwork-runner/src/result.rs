// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result states and the result tree.
//!
//! Every work item owns exactly one [`TestResult`]. Leaf results are filled in from the command
//! outcome; suite results aggregate their children's results through [`TestResult::add_result`].

use crate::{
    errors::{CommandError, CommandErrorKind},
    tree::{TestKind, TestNode},
};
use chrono::{DateTime, FixedOffset};
use std::{fmt, sync::Arc, time::Duration};

/// The coarse status of a result.
///
/// Variants are ordered by severity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TestStatus {
    /// The test ran but could not reach a verdict.
    Inconclusive,

    /// The test did not run.
    Skipped,

    /// The test passed.
    Passed,

    /// The test passed with warnings.
    Warning,

    /// The test failed.
    Failed,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inconclusive => "Inconclusive",
            Self::Skipped => "Skipped",
            Self::Passed => "Passed",
            Self::Warning => "Warning",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// A refinement of a [`TestStatus`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ResultLabel {
    /// No refinement.
    #[default]
    None,

    /// An unexpected error.
    Error,

    /// The test was cancelled.
    Cancelled,

    /// The test was not runnable.
    Invalid,

    /// The test was ignored.
    Ignored,

    /// The test was explicit and not selected.
    Explicit,
}

impl ResultLabel {
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
            Self::Invalid => "Invalid",
            Self::Ignored => "Ignored",
            Self::Explicit => "Explicit",
        }
    }
}

/// Where a failure happened.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum FailureSite {
    /// In the test itself.
    #[default]
    Test,

    /// In one-time setup.
    SetUp,

    /// In one-time teardown.
    TearDown,

    /// In a parent suite.
    Parent,

    /// In a child of this suite.
    Child,
}

/// The full state of a result: status, label and failure site.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ResultState {
    status: TestStatus,
    label: ResultLabel,
    site: FailureSite,
}

impl ResultState {
    /// The test ran but could not reach a verdict. This is also the initial state of a result.
    pub const INCONCLUSIVE: Self = Self::new(TestStatus::Inconclusive, ResultLabel::None);
    /// The test was skipped.
    pub const SKIPPED: Self = Self::new(TestStatus::Skipped, ResultLabel::None);
    /// The test was ignored.
    pub const IGNORED: Self = Self::new(TestStatus::Skipped, ResultLabel::Ignored);
    /// The test was explicit and not selected.
    pub const EXPLICIT: Self = Self::new(TestStatus::Skipped, ResultLabel::Explicit);
    /// The test passed.
    pub const SUCCESS: Self = Self::new(TestStatus::Passed, ResultLabel::None);
    /// The test passed with a warning.
    pub const WARNING: Self = Self::new(TestStatus::Warning, ResultLabel::None);
    /// An assertion failed.
    pub const FAILURE: Self = Self::new(TestStatus::Failed, ResultLabel::None);
    /// An unexpected error occurred.
    pub const ERROR: Self = Self::new(TestStatus::Failed, ResultLabel::Error);
    /// The test was cancelled.
    pub const CANCELLED: Self = Self::new(TestStatus::Failed, ResultLabel::Cancelled);
    /// The test was not runnable.
    pub const NOT_RUNNABLE: Self = Self::new(TestStatus::Failed, ResultLabel::Invalid);
    /// A child of this suite failed.
    pub const CHILD_FAILURE: Self = Self::FAILURE.with_site(FailureSite::Child);
    /// A child of this suite passed with a warning.
    pub const CHILD_WARNING: Self = Self::WARNING.with_site(FailureSite::Child);
    /// A child of this suite was ignored.
    pub const CHILD_IGNORED: Self = Self::IGNORED.with_site(FailureSite::Child);
    /// An assertion failed in one-time setup.
    pub const SETUP_FAILURE: Self = Self::FAILURE.with_site(FailureSite::SetUp);
    /// An unexpected error occurred in one-time setup.
    pub const SETUP_ERROR: Self = Self::ERROR.with_site(FailureSite::SetUp);
    /// An unexpected error occurred in one-time teardown.
    pub const TEARDOWN_ERROR: Self = Self::ERROR.with_site(FailureSite::TearDown);

    /// Creates a new state with the default failure site.
    pub const fn new(status: TestStatus, label: ResultLabel) -> Self {
        Self {
            status,
            label,
            site: FailureSite::Test,
        }
    }

    /// Returns a copy of this state with a different failure site.
    pub const fn with_site(self, site: FailureSite) -> Self {
        Self { site, ..self }
    }

    /// Returns the status.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Returns the label.
    pub fn label(&self) -> ResultLabel {
        self.label
    }

    /// Returns the failure site.
    pub fn site(&self) -> FailureSite {
        self.site
    }

    /// Returns true if this is a cancellation, regardless of site.
    pub fn is_cancelled(&self) -> bool {
        self.status == TestStatus::Failed && self.label == ResultLabel::Cancelled
    }

    /// Returns true if a suite in this state may go on to run its children.
    pub fn allows_children(&self) -> bool {
        matches!(self.status, TestStatus::Passed | TestStatus::Warning)
    }
}

impl fmt::Display for ResultState {
    // Renders as e.g. "Failed:Error(SetUp)".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if self.label != ResultLabel::None {
            write!(f, ":{}", self.label.as_str())?;
        }
        if self.site != FailureSite::Test {
            write!(f, "({:?})", self.site)?;
        }
        Ok(())
    }
}

/// Counts of leaf results at or beneath a result.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResultCounts {
    /// Passed leaves.
    pub passed: usize,
    /// Failed leaves.
    pub failed: usize,
    /// Leaves that passed with warnings.
    pub warnings: usize,
    /// Skipped leaves.
    pub skipped: usize,
    /// Inconclusive leaves.
    pub inconclusive: usize,
}

impl ResultCounts {
    /// Returns the total number of leaves counted.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.warnings + self.skipped + self.inconclusive
    }

    fn add(&mut self, other: ResultCounts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.warnings += other.warnings;
        self.skipped += other.skipped;
        self.inconclusive += other.inconclusive;
    }

    fn for_leaf(state: ResultState) -> Self {
        let mut counts = Self::default();
        match state.status() {
            TestStatus::Inconclusive => counts.inconclusive = 1,
            TestStatus::Skipped => counts.skipped = 1,
            TestStatus::Passed => counts.passed = 1,
            TestStatus::Warning => counts.warnings = 1,
            TestStatus::Failed => counts.failed = 1,
        }
        counts
    }
}

pub(crate) const CHILD_ERRORS_MESSAGE: &str = "One or more child tests had errors";
pub(crate) const CHILD_WARNINGS_MESSAGE: &str = "One or more child tests had warnings";
pub(crate) const CHILD_IGNORE_MESSAGE: &str = "One or more child tests were ignored";

/// The result of running one test node.
#[derive(Clone, Debug)]
pub struct TestResult {
    test: Arc<TestNode>,
    state: ResultState,
    message: Option<String>,
    stack_trace: Option<String>,
    start_time: Option<DateTime<FixedOffset>>,
    duration: Duration,
    assert_count: usize,
    output: String,
    children: Vec<Arc<TestResult>>,
    counts: ResultCounts,
}

impl TestResult {
    /// Creates a new, inconclusive result for the given node.
    pub fn new(test: Arc<TestNode>) -> Self {
        Self {
            test,
            state: ResultState::INCONCLUSIVE,
            message: None,
            stack_trace: None,
            start_time: None,
            duration: Duration::ZERO,
            assert_count: 0,
            output: String::new(),
            children: Vec::new(),
            counts: ResultCounts::default(),
        }
    }

    /// Returns the node this result is for.
    pub fn test(&self) -> &Arc<TestNode> {
        &self.test
    }

    /// Returns the state.
    pub fn state(&self) -> ResultState {
        self.state
    }

    /// Returns the message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the stack trace, if any.
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Returns when the test started, if it started.
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.start_time
    }

    /// Returns how long the test took.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the number of assertions made.
    pub fn assert_count(&self) -> usize {
        self.assert_count
    }

    /// Returns captured output.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Returns child results, in the order their completions were observed.
    pub fn children(&self) -> &[Arc<TestResult>] {
        &self.children
    }

    /// Returns the leaf counts at or beneath this result.
    pub fn counts(&self) -> ResultCounts {
        match self.test.kind() {
            TestKind::Case => ResultCounts::for_leaf(self.state),
            TestKind::Suite(_) => self.counts,
        }
    }

    /// Finds the result for the node with the given full name, at or beneath this result.
    pub fn find(&self, full_name: &str) -> Option<&TestResult> {
        if self.test.full_name() == full_name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(full_name))
    }

    /// Sets the state, message and stack trace.
    pub fn set_result(
        &mut self,
        state: ResultState,
        message: Option<String>,
        stack_trace: Option<String>,
    ) {
        self.state = state;
        self.message = message;
        self.stack_trace = stack_trace;
    }

    /// Records an error returned by a command at the given site.
    pub fn record_exception(&mut self, err: &CommandError, site: FailureSite) {
        let state = match err.kind() {
            CommandErrorKind::Error => ResultState::ERROR,
            CommandErrorKind::Failure => ResultState::FAILURE,
            CommandErrorKind::Ignore => ResultState::IGNORED,
            CommandErrorKind::Inconclusive => ResultState::INCONCLUSIVE,
            CommandErrorKind::Cancelled => ResultState::CANCELLED,
        };
        self.set_result(
            state.with_site(site),
            Some(err.message().to_owned()),
            err.stack_trace().map(str::to_owned),
        );
    }

    /// Records an error from one-time teardown.
    ///
    /// Unlike [`Self::record_exception`], this preserves any existing message and stack trace and
    /// appends the teardown error to them. A cancelled result stays cancelled.
    pub fn record_teardown_exception(&mut self, err: &CommandError) {
        let mut state = if self.state.is_cancelled() {
            ResultState::CANCELLED
        } else {
            ResultState::ERROR
        };
        if self.test.is_suite() {
            state = state.with_site(FailureSite::TearDown);
        }

        let mut message = format!("TearDown : {}", err.message());
        if let Some(existing) = &self.message {
            message = format!("{existing}\n{message}");
        }
        let mut stack_trace = format!("--TearDown\n{}", err.stack_trace().unwrap_or_default());
        if let Some(existing) = &self.stack_trace {
            stack_trace = format!("{existing}\n{stack_trace}");
        }
        self.set_result(state, Some(message), Some(stack_trace));
    }

    /// Merges a child's result into this suite result.
    pub fn add_result(&mut self, child: Arc<TestResult>) {
        self.counts.add(child.counts());
        self.assert_count += child.assert_count;

        if !self.state.is_cancelled() {
            match child.state.status() {
                TestStatus::Passed => {
                    if self.state.status() == TestStatus::Inconclusive {
                        self.set_result(ResultState::SUCCESS, None, None);
                    }
                }
                TestStatus::Warning => {
                    if matches!(
                        self.state.status(),
                        TestStatus::Inconclusive | TestStatus::Passed
                    ) {
                        self.set_result(
                            ResultState::CHILD_WARNING,
                            Some(CHILD_WARNINGS_MESSAGE.to_owned()),
                            None,
                        );
                    }
                }
                TestStatus::Failed => {
                    if self.state.status() != TestStatus::Failed {
                        self.set_result(
                            ResultState::CHILD_FAILURE,
                            Some(CHILD_ERRORS_MESSAGE.to_owned()),
                            None,
                        );
                    }
                }
                TestStatus::Skipped => {
                    if child.state.label() == ResultLabel::Ignored
                        && matches!(
                            self.state.status(),
                            TestStatus::Inconclusive | TestStatus::Passed
                        )
                    {
                        self.set_result(
                            ResultState::CHILD_IGNORED,
                            Some(CHILD_IGNORE_MESSAGE.to_owned()),
                            None,
                        );
                    }
                }
                TestStatus::Inconclusive => {}
            }
        }

        self.children.push(child);
    }

    /// Appends captured output.
    pub fn record_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub(crate) fn add_assert_count(&mut self, count: usize) {
        self.assert_count += count;
    }

    pub(crate) fn set_timing(&mut self, start_time: DateTime<FixedOffset>, duration: Duration) {
        self.start_time = Some(start_time);
        self.duration = duration;
    }
}
