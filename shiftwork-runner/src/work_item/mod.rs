// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Work items: the runtime units that execute a test tree.
//!
//! A [`WorkItem`] wraps one [`TestNode`] and its [`ExecutionContext`] and drives itself through
//! [`WorkItemState::Ready`] → [`WorkItemState::Running`] → [`WorkItemState::Complete`]. There are
//! three shapes:
//!
//! * a leaf test, which runs its command and completes synchronously;
//! * a suite, which runs one-time setup, fans its children out to the dispatcher and completes
//!   only after every child has reported back;
//! * a one-time teardown continuation for a suite, dispatched once the suite's last child has
//!   completed so that teardown is scheduled like any other item.
//!
//! Completion happens exactly once per item. At that point the item's result is snapshotted,
//! the listener is told, and completion callbacks (how a suite learns about its children) fire.

mod builder;
mod composite;
mod simple;

use crate::{
    affinity::{OwnThreadReason, ThreadAffinity, current_affinity, run_on_own_thread},
    context::{ExecutionContext, ExecutionStatus},
    errors::CommandError,
    result::{ResultState, TestResult},
    time::{StopwatchStart, stopwatch},
    tree::{ParallelScope, TestNode},
};
use composite::CompositeState;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

pub(crate) const CANCELLED_MESSAGE: &str = "Test cancelled by user";

/// The lifecycle state of a work item.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum WorkItemState {
    /// Created, not yet started.
    Ready = 0,

    /// Started. A suite stays here until all of its children have completed.
    Running = 1,

    /// Finished. Terminal.
    Complete = 2,
}

impl WorkItemState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Ready,
            1 => Self::Running,
            _ => Self::Complete,
        }
    }
}

/// How a dispatcher should run a work item.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionStrategy {
    /// Execute inline on the dispatching thread.
    Direct,

    /// Queue for the parallel shift.
    Parallel,

    /// Queue for a non-parallel shift.
    NonParallel,
}

/// The shape of a work item.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WorkItemKind {
    /// A leaf test.
    Simple,

    /// A suite.
    Composite,

    /// The one-time teardown continuation of a suite.
    OneTimeTearDown,
}

pub(crate) type CompletionCallback = Box<dyn FnOnce(&Arc<WorkItem>) + Send>;

enum Shape {
    Simple,
    Composite(CompositeState),
    OneTimeTearDown(Arc<WorkItem>),
}

/// A unit of execution wrapping one test node.
pub struct WorkItem {
    test: Arc<TestNode>,
    context: ExecutionContext,
    shape: Shape,
    state: AtomicU8,
    strategy: OnceLock<ExecutionStrategy>,
    affinity: Option<ThreadAffinity>,
    result: Mutex<TestResult>,
    final_result: OnceLock<Arc<TestResult>>,
    callbacks: Mutex<Vec<CompletionCallback>>,
    completed: Mutex<bool>,
    completed_cond: Condvar,
    stopwatch: Mutex<Option<StopwatchStart>>,
}

impl WorkItem {
    fn new(
        test: Arc<TestNode>,
        context: ExecutionContext,
        shape: Shape,
        affinity: Option<ThreadAffinity>,
    ) -> Self {
        let result = TestResult::new(test.clone());
        Self {
            test,
            context,
            shape,
            state: AtomicU8::new(WorkItemState::Ready as u8),
            strategy: OnceLock::new(),
            affinity,
            result: Mutex::new(result),
            final_result: OnceLock::new(),
            callbacks: Mutex::new(Vec::new()),
            completed: Mutex::new(false),
            completed_cond: Condvar::new(),
            stopwatch: Mutex::new(None),
        }
    }

    /// Creates the one-time teardown continuation for a suite.
    pub(crate) fn one_time_teardown(suite: &Arc<WorkItem>) -> Arc<WorkItem> {
        let item = WorkItem::new(
            suite.test.clone(),
            suite.context.clone(),
            Shape::OneTimeTearDown(suite.clone()),
            suite.affinity,
        );
        let _ = item.strategy.set(suite.execution_strategy());
        Arc::new(item)
    }

    /// Returns the test node this item executes.
    pub fn test(&self) -> &Arc<TestNode> {
        &self.test
    }

    /// Returns the full name of the test node.
    pub fn name(&self) -> &str {
        self.test.full_name()
    }

    /// Returns the context this item runs in.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Returns the shape of this item.
    pub fn kind(&self) -> WorkItemKind {
        match self.shape {
            Shape::Simple => WorkItemKind::Simple,
            Shape::Composite(_) => WorkItemKind::Composite,
            Shape::OneTimeTearDown(_) => WorkItemKind::OneTimeTearDown,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> WorkItemState {
        WorkItemState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true once the item has completed.
    pub fn is_complete(&self) -> bool {
        self.state() == WorkItemState::Complete
    }

    /// Returns the resolved thread affinity: the nearest declared affinity at or above this node,
    /// or `None` for no preference.
    pub fn affinity(&self) -> Option<ThreadAffinity> {
        self.affinity
    }

    /// Returns the children of a suite, once they have been created. Empty for other shapes.
    pub fn children(&self) -> &[Arc<WorkItem>] {
        match &self.shape {
            Shape::Composite(state) => state.children(),
            Shape::Simple | Shape::OneTimeTearDown(_) => &[],
        }
    }

    /// Returns the result snapshot taken when the item completed.
    pub fn final_result(&self) -> Option<Arc<TestResult>> {
        self.final_result.get().cloned()
    }

    /// Returns how this item should be dispatched. Computed once, on first call.
    pub fn execution_strategy(&self) -> ExecutionStrategy {
        *self.strategy.get_or_init(|| self.compute_strategy())
    }

    /// Fixes the strategy before it is computed. Has no effect if it already is.
    pub(crate) fn init_strategy(&self, strategy: ExecutionStrategy) {
        let _ = self.strategy.set(strategy);
    }

    fn compute_strategy(&self) -> ExecutionStrategy {
        // Pure groupings only dispatch their children, so queueing them buys nothing.
        if self.test.is_grouping() {
            return ExecutionStrategy::Direct;
        }
        if self.context.is_single_threaded() {
            return ExecutionStrategy::Direct;
        }

        let scope = self.test.properties().parallel_scope.unwrap_or_default();
        if scope.contains(ParallelScope::NONE) {
            return ExecutionStrategy::NonParallel;
        }
        if scope.contains(ParallelScope::SELF) {
            return ExecutionStrategy::Parallel;
        }

        let context_scope = self.context.parallel_scope();
        if context_scope.contains(ParallelScope::CHILDREN)
            || (self.test.is_fixture() && context_scope.contains(ParallelScope::FIXTURES))
        {
            return ExecutionStrategy::Parallel;
        }

        match self.shape {
            Shape::Simple => ExecutionStrategy::Direct,
            Shape::Composite(_) | Shape::OneTimeTearDown(_) => ExecutionStrategy::NonParallel,
        }
    }

    /// Executes the item on the current thread, or on a thread of its own if it requires one.
    ///
    /// Blocks until this item's own work is done. A suite's children may still be running when
    /// this returns; use [`Self::wait_for_completion`] to wait for the whole subtree. Executing
    /// an item that has already started does nothing.
    pub fn execute(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(
                WorkItemState::Ready as u8,
                WorkItemState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!(test = %self.name(), state = ?self.state(), "work item already started");
            return;
        }

        let reason = OwnThreadReason::compute(self.test.properties().requires_thread, self.affinity);
        if reason.is_empty() {
            self.run_on_current_thread();
            return;
        }

        if self.context.is_single_threaded() {
            self.mark_not_runnable(format!(
                "Test is not runnable in single-threaded context. {reason}"
            ));
            return;
        }

        let affinity = self.affinity.unwrap_or_else(current_affinity);
        if let Err(err) = run_on_own_thread(self.name(), affinity, || self.run_on_current_thread()) {
            warn!(test = %self.name(), %err, "failed to spawn a thread for work item");
            self.mark_not_runnable(format!("Unable to start a thread for this test: {err}"));
        }
    }

    fn run_on_current_thread(self: &Arc<Self>) {
        *self.stopwatch.lock() = Some(stopwatch());
        match &self.shape {
            Shape::Simple => simple::perform_work(self),
            Shape::Composite(state) => composite::perform_work(self, state),
            Shape::OneTimeTearDown(suite) => composite::perform_teardown_item(self, suite),
        }
    }

    fn mark_not_runnable(self: &Arc<Self>, message: String) {
        match &self.shape {
            Shape::Simple => {
                self.complete_with(|result| {
                    result.set_result(ResultState::NOT_RUNNABLE, Some(message), None)
                });
            }
            Shape::Composite(_) => {
                composite::skip_children(
                    self,
                    composite::child_skip_state(ResultState::NOT_RUNNABLE),
                    &message,
                );
                self.complete_with(|result| {
                    result.set_result(ResultState::NOT_RUNNABLE, Some(message), None)
                });
            }
            Shape::OneTimeTearDown(suite) => {
                suite.complete_with(|result| {
                    result.record_teardown_exception(&CommandError::error(message))
                });
                self.complete();
            }
        }
    }

    /// Requests cancellation.
    ///
    /// The request is cooperative: this item's context (and through it, every descendant's) is
    /// marked stop- or abort-requested, and running children are told. With `force`, this then
    /// waits up to the configured force-cancel wait for the item to complete, and force-completes
    /// whatever is still outstanding with a Cancelled result.
    ///
    /// Calling this on a complete item has no effect.
    pub fn cancel(self: &Arc<Self>, force: bool) {
        if self.is_complete() {
            return;
        }
        self.request_cancel(force);

        if force {
            let wait = self.context.settings().force_cancel_wait;
            if !self.wait_for_completion_timeout(wait) {
                info!(test = %self.name(), ?wait, "work item did not complete in time, forcing completion");
                self.force_cancel();
            }
        }
    }

    /// Marks this item and its running descendants as cancelled, without waiting.
    pub(crate) fn request_cancel(&self, force: bool) {
        if self.is_complete() {
            return;
        }
        let status = if force {
            ExecutionStatus::AbortRequested
        } else {
            ExecutionStatus::StopRequested
        };
        self.context.set_execution_status(status);

        match &self.shape {
            Shape::Composite(_) => {
                for child in self.children() {
                    if child.state() == WorkItemState::Running {
                        child.request_cancel(force);
                    }
                }
            }
            Shape::OneTimeTearDown(suite) => suite.request_cancel(force),
            Shape::Simple => {}
        }
    }

    /// Completes this item with a Cancelled result if it has not completed yet.
    ///
    /// For a suite, every incomplete child is force-cancelled first. A suite that never started
    /// synthesizes Cancelled results for the part of its subtree that takes part in the run. The
    /// underlying thread of a running item is not interrupted: whatever it reports later is
    /// discarded.
    pub fn force_cancel(self: &Arc<Self>) {
        if self.is_complete() {
            return;
        }
        match &self.shape {
            Shape::Composite(state) => composite::force_cancel_children(self, state),
            Shape::OneTimeTearDown(suite) => suite.force_cancel(),
            Shape::Simple => {}
        }
        let completed = self.complete_with(|result| {
            result.set_result(ResultState::CANCELLED, Some(CANCELLED_MESSAGE.to_owned()), None)
        });
        if completed {
            info!(test = %self.name(), kind = ?self.kind(), "force-completed work item as cancelled");
        }
    }

    /// Blocks until the item is complete.
    pub fn wait_for_completion(&self) {
        let mut completed = self.completed.lock();
        while !*completed {
            self.completed_cond.wait(&mut completed);
        }
    }

    /// Blocks until the item is complete or `timeout` elapses. Returns true if the item completed.
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed.lock();
        while !*completed {
            if self
                .completed_cond
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                return *completed;
            }
        }
        true
    }

    /// Registers a callback to run once this item completes. If it already has, the callback
    /// runs immediately on the calling thread.
    pub(crate) fn on_completion(self: &Arc<Self>, callback: CompletionCallback) {
        let mut callbacks = self.callbacks.lock();
        // `completed` is only set once the final result is in place.
        if *self.completed.lock() {
            drop(callbacks);
            callback(self);
        } else {
            callbacks.push(callback);
        }
    }

    pub(crate) fn lock_result(&self) -> MutexGuard<'_, TestResult> {
        self.result.lock()
    }

    pub(crate) fn check_for_cancellation(&self) -> bool {
        if self.context.execution_status() != ExecutionStatus::Running {
            self.lock_result().set_result(
                ResultState::CANCELLED,
                Some(CANCELLED_MESSAGE.to_owned()),
                None,
            );
            return true;
        }
        false
    }

    // Explicit nodes run only when asked for.
    pub(crate) fn is_explicit_allowed(&self) -> bool {
        let settings = self.context.settings();
        settings.run_explicit
            || settings.filter.is_explicit_match(&self.test)
            || self.context.parent().is_none()
    }

    pub(crate) fn complete(self: &Arc<Self>) -> bool {
        self.complete_with(|_| {})
    }

    /// Completes the item, applying `finish` to the result first. Returns false (without calling
    /// `finish`) if the item had already completed.
    pub(crate) fn complete_with(self: &Arc<Self>, finish: impl FnOnce(&mut TestResult)) -> bool {
        if self.state.swap(WorkItemState::Complete as u8, Ordering::AcqRel)
            == WorkItemState::Complete as u8
        {
            return false;
        }

        let snapshot = {
            let mut result = self.result.lock();
            finish(&mut result);
            result.add_assert_count(self.context.assert_count());
            let output = self.context.take_output();
            if !output.is_empty() {
                result.record_output(&output);
            }
            if let Some(start) = &*self.stopwatch.lock() {
                let snapshot = start.snapshot();
                result.set_timing(snapshot.start_time.fixed_offset(), snapshot.duration);
            }
            Arc::new(result.clone())
        };
        let _ = self.final_result.set(snapshot.clone());

        debug!(
            test = %self.name(),
            kind = ?self.kind(),
            result = %snapshot.state(),
            "work item complete"
        );
        if !matches!(self.shape, Shape::OneTimeTearDown(_)) {
            self.context.listener().test_finished(&snapshot);
        }

        {
            let mut completed = self.completed.lock();
            *completed = true;
            self.completed_cond.notify_all();
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback(self);
        }
        true
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("test", &self.name())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("strategy", &self.strategy.get())
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}
