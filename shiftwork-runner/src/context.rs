// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution contexts.
//!
//! Every work item runs in its own [`ExecutionContext`], created as a child of its parent's. The
//! context carries what a running item needs to see: the listener, the dispatcher, inherited
//! scheduling flags, and the cooperative [`ExecutionStatus`] used for cancellation.

use crate::{
    dispatcher::WorkItemDispatcher,
    reporter::TestListener,
    tree::{ParallelScope, TestFilter, TestNode},
};
use debug_ignore::DebugIgnore;
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// The cooperative cancellation status of a context.
///
/// Variants are ordered by severity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum ExecutionStatus {
    /// Execution proceeds normally.
    Running = 0,

    /// Running items finish, nothing new starts.
    StopRequested = 1,

    /// Running items should stop as soon as possible.
    AbortRequested = 2,
}

impl ExecutionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::StopRequested,
            _ => Self::AbortRequested,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::StopRequested => f.write_str("stop requested"),
            Self::AbortRequested => f.write_str("abort requested"),
        }
    }
}

/// Settings shared by every context in one run.
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// A failed test requests a stop of the run.
    pub stop_on_error: bool,

    /// Explicit tests run even when not selected by name.
    pub run_explicit: bool,

    /// The bounded wait used by forced cancellation.
    pub force_cancel_wait: Duration,

    /// Which nodes take part in the run.
    pub filter: Arc<TestFilter>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            run_explicit: false,
            force_cancel_wait: Duration::from_secs(5),
            filter: Arc::new(TestFilter::All),
        }
    }
}

/// The context a work item runs in.
///
/// Cloning is cheap: clones share the same underlying context.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    current_test: Arc<TestNode>,
    parent: Option<ExecutionContext>,
    status: AtomicU8,
    listener: DebugIgnore<Arc<dyn TestListener + Send + Sync>>,
    dispatcher: DebugIgnore<Arc<dyn WorkItemDispatcher>>,
    parallel_scope: ParallelScope,
    single_threaded: bool,
    settings: Arc<RunSettings>,
    assert_count: AtomicUsize,
    output: Mutex<String>,
}

impl ExecutionContext {
    /// Creates the context for the root of a run.
    pub fn root(
        test: Arc<TestNode>,
        listener: Arc<dyn TestListener + Send + Sync>,
        dispatcher: Arc<dyn WorkItemDispatcher>,
        settings: RunSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                current_test: test,
                parent: None,
                status: AtomicU8::new(ExecutionStatus::Running as u8),
                listener: DebugIgnore(listener),
                dispatcher: DebugIgnore(dispatcher),
                parallel_scope: ParallelScope::empty(),
                single_threaded: false,
                settings: Arc::new(settings),
                assert_count: AtomicUsize::new(0),
                output: Mutex::new(String::new()),
            }),
        }
    }

    /// Creates a fresh context for a child of this context's test.
    ///
    /// The child inherits the listener, dispatcher and settings. Its parallel scope is the context
    /// part of this test's declared scope, or this context's scope if the test declares none. It
    /// is single-threaded if this context is, or if this test is marked single-threaded.
    pub fn child(&self, child_test: Arc<TestNode>) -> Self {
        let inner = &self.inner;
        let properties = inner.current_test.properties();
        let parallel_scope = match properties.parallel_scope {
            Some(scope) => scope & ParallelScope::CONTEXT_MASK,
            None => inner.parallel_scope,
        };

        Self {
            inner: Arc::new(ContextInner {
                current_test: child_test,
                parent: Some(self.clone()),
                status: AtomicU8::new(ExecutionStatus::Running as u8),
                listener: DebugIgnore(inner.listener.0.clone()),
                dispatcher: DebugIgnore(inner.dispatcher.0.clone()),
                parallel_scope,
                single_threaded: inner.single_threaded || properties.single_threaded,
                settings: inner.settings.clone(),
                assert_count: AtomicUsize::new(0),
                output: Mutex::new(String::new()),
            }),
        }
    }

    /// Returns the test this context belongs to.
    pub fn current_test(&self) -> &Arc<TestNode> {
        &self.inner.current_test
    }

    /// Returns the parent context, if any.
    pub fn parent(&self) -> Option<&ExecutionContext> {
        self.inner.parent.as_ref()
    }

    /// Returns the listener notified of progress.
    pub fn listener(&self) -> &(dyn TestListener + Send + Sync) {
        &**self.inner.listener
    }

    /// Returns the dispatcher running this context's items.
    pub fn dispatcher(&self) -> &Arc<dyn WorkItemDispatcher> {
        &self.inner.dispatcher
    }

    /// Returns the inherited parallel scope.
    pub fn parallel_scope(&self) -> ParallelScope {
        self.inner.parallel_scope
    }

    /// Returns true if items in this context must run one at a time on their parent's thread.
    pub fn is_single_threaded(&self) -> bool {
        self.inner.single_threaded
    }

    /// Returns the run settings.
    pub fn settings(&self) -> &RunSettings {
        &self.inner.settings
    }

    /// Returns the most severe of this context's status and its ancestors' statuses.
    pub fn execution_status(&self) -> ExecutionStatus {
        let own = ExecutionStatus::from_u8(self.inner.status.load(Ordering::Acquire));
        match &self.inner.parent {
            Some(parent) => own.max(parent.execution_status()),
            None => own,
        }
    }

    /// Escalates the status of this context and every ancestor, so that a stop requested anywhere
    /// is seen by the whole run. A status is never lowered.
    pub fn set_execution_status(&self, status: ExecutionStatus) {
        let mut cx = Some(self);
        while let Some(current) = cx {
            current.inner.status.fetch_max(status as u8, Ordering::AcqRel);
            cx = current.parent();
        }
    }

    /// Records one assertion.
    pub fn increment_assert_count(&self) {
        self.inner.assert_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of assertions recorded in this context.
    pub fn assert_count(&self) -> usize {
        self.inner.assert_count.load(Ordering::Relaxed)
    }

    /// Captures output for the current test and forwards it to the listener.
    pub fn write_output(&self, text: &str) {
        self.inner.output.lock().push_str(text);
        self.listener().test_output(self.current_test(), text);
    }

    /// Sends a message to the listener on behalf of the current test.
    pub fn send_message(&self, message: &str) {
        self.listener().send_message(self.current_test(), message);
    }

    /// Takes the output captured so far.
    pub(crate) fn take_output(&self) -> String {
        std::mem::take(&mut *self.inner.output.lock())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("current_test", &self.inner.current_test.full_name())
            .field("status", &self.execution_status())
            .field("parallel_scope", &self.inner.parallel_scope)
            .field("single_threaded", &self.inner.single_threaded)
            .finish_non_exhaustive()
    }
}
