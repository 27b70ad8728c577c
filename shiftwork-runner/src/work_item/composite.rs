// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Suite execution: one-time setup, fan-out, countdown, one-time teardown.

use super::{CANCELLED_MESSAGE, ExecutionStrategy, WorkItem, builder::sort_for_dispatch};
use crate::{
    command::run_guarded,
    context::ExecutionStatus,
    errors::CommandError,
    helpers::plural,
    result::{FailureSite, ResultState, TestResult, TestStatus},
    tree::{RunState, TestNode},
};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

pub(super) struct CompositeState {
    children: OnceLock<Vec<Arc<WorkItem>>>,
    // Children that have not reported back yet.
    remaining: Mutex<usize>,
}

impl CompositeState {
    pub(super) fn new() -> Self {
        Self {
            children: OnceLock::new(),
            remaining: Mutex::new(0),
        }
    }

    pub(super) fn children(&self) -> &[Arc<WorkItem>] {
        self.children.get().map_or(&[], Vec::as_slice)
    }

    fn create_children(&self, item: &WorkItem) -> &[Arc<WorkItem>] {
        self.children.get_or_init(|| {
            let filter = &item.context().settings().filter;
            let mut children: Vec<_> = item
                .test()
                .children()
                .iter()
                .filter(|child| filter.pass(child))
                .map(|child| item.create_child(child))
                .collect();
            sort_for_dispatch(&mut children);
            children
        })
    }
}

pub(super) fn perform_work(item: &Arc<WorkItem>, state: &CompositeState) {
    let test = item.test();
    item.context().listener().test_started(test);

    if item.check_for_cancellation() {
        item.complete();
        return;
    }

    let reason = test.properties().skip_reason.as_deref();
    match test.run_state() {
        RunState::Explicit if !item.is_explicit_allowed() => {
            skip_fixture(item, ResultState::EXPLICIT, reason);
        }
        RunState::Runnable | RunState::Explicit => {
            item.lock_result().set_result(ResultState::SUCCESS, None, None);
            let children = state.create_children(item);
            if !children.is_empty() {
                perform_one_time_setup(item);

                if !item.check_for_cancellation() {
                    let (setup_state, message) = {
                        let result = item.lock_result();
                        (result.state(), result.message().map(str::to_owned))
                    };
                    if setup_state.allows_children() {
                        // Completion now belongs to whichever child reports back last.
                        run_children(item, state, children);
                        return;
                    }
                    skip_children(
                        item,
                        child_skip_state(setup_state),
                        &format!("OneTimeSetUp: {}", message.unwrap_or_default()),
                    );
                }

                if item.context().execution_status() != ExecutionStatus::AbortRequested {
                    perform_one_time_teardown(item);
                }
            }
        }
        RunState::Skipped => skip_fixture(item, ResultState::SKIPPED, reason),
        RunState::Ignored => skip_fixture(item, ResultState::IGNORED, reason),
        RunState::NotRunnable => skip_fixture(item, ResultState::NOT_RUNNABLE, reason),
    }

    item.complete();
}

/// The state given to children that never run because their suite did not: the suite's own
/// Skipped-family state if it has one, otherwise plain Skipped, attributed to the parent.
pub(super) fn child_skip_state(suite_state: ResultState) -> ResultState {
    let state = if suite_state.status() == TestStatus::Skipped {
        suite_state
    } else {
        ResultState::SKIPPED
    };
    state.with_site(FailureSite::Parent)
}

fn skip_fixture(item: &Arc<WorkItem>, state: ResultState, reason: Option<&str>) {
    item.lock_result().set_result(
        state.with_site(FailureSite::SetUp),
        reason.map(str::to_owned),
        None,
    );
    skip_children(
        item,
        child_skip_state(state),
        &format!("OneTimeSetUp: {}", reason.unwrap_or_default()),
    );
}

/// Gives every participating child of a suite a synthetic result, without running it.
pub(super) fn skip_children(item: &WorkItem, state: ResultState, message: &str) {
    let results: Vec<_> = item
        .test()
        .children()
        .iter()
        .filter(|child| item.context().settings().filter.pass(child))
        .map(|child| synthesize_result(item, child, state, message))
        .collect();

    let mut result = item.lock_result();
    for child in results {
        result.add_result(child);
    }
}

fn synthesize_result(
    item: &WorkItem,
    node: &Arc<TestNode>,
    state: ResultState,
    message: &str,
) -> Arc<TestResult> {
    let mut result = TestResult::new(node.clone());
    result.set_result(state, Some(message.to_owned()), None);
    for child in node.children() {
        if item.context().settings().filter.pass(child) {
            result.add_result(synthesize_result(item, child, state, message));
        }
    }

    let result = Arc::new(result);
    item.context().listener().test_finished(&result);
    result
}

fn perform_one_time_setup(item: &Arc<WorkItem>) {
    let test = item.test();
    let listener = item.context().listener();
    listener.one_time_setup_started(test);

    for command in test.one_time_setup() {
        match run_guarded(&**command, item.context()) {
            Ok(outcome) => match outcome.state.status() {
                TestStatus::Passed => {}
                TestStatus::Warning => {
                    item.lock_result()
                        .set_result(ResultState::WARNING, outcome.message, None);
                }
                _ => {
                    item.lock_result().set_result(
                        outcome.state.with_site(FailureSite::SetUp),
                        outcome.message,
                        None,
                    );
                    break;
                }
            },
            Err(err) => {
                debug!(suite = %item.name(), %err, "one-time setup failed");
                item.lock_result().record_exception(&err, FailureSite::SetUp);
                break;
            }
        }
    }

    listener.one_time_setup_finished(test);
}

fn perform_one_time_teardown(item: &Arc<WorkItem>) {
    let test = item.test();
    let listener = item.context().listener();
    listener.one_time_teardown_started(test);

    // Teardowns run in reverse order of declaration, and every one of them runs.
    for command in test.one_time_teardown().iter().rev() {
        let err = match run_guarded(&**command, item.context()) {
            Ok(outcome) if outcome.state.status() == TestStatus::Failed => CommandError::failure(
                outcome
                    .message
                    .unwrap_or_else(|| outcome.state.to_string()),
            ),
            Ok(_) => continue,
            Err(err) => err,
        };
        debug!(suite = %item.name(), %err, "one-time teardown failed");
        item.lock_result().record_teardown_exception(&err);
    }

    listener.one_time_teardown_finished(test);
}

fn run_children(item: &Arc<WorkItem>, state: &CompositeState, children: &[Arc<WorkItem>]) {
    let dispatcher = item.context().dispatcher();
    if item.execution_strategy() == ExecutionStrategy::NonParallel
        && dispatcher.level_of_parallelism() > 0
    {
        dispatcher.isolate_queues(item);
    }

    *state.remaining.lock() = children.len();
    debug!(
        suite = %item.name(),
        "dispatching {} child {}",
        children.len(),
        plural::items_str(children.len()),
    );

    let mut dispatched = 0;
    for child in children {
        if item.check_for_cancellation() {
            break;
        }

        let parent = Arc::downgrade(item);
        child.on_completion(Box::new(move |child| {
            if let Some(parent) = parent.upgrade() {
                on_child_completed(&parent, child);
            }
        }));
        dispatcher.dispatch(child.clone());
        dispatched += 1;
    }

    let shortfall = children.len() - dispatched;
    if shortfall > 0 {
        trace!(suite = %item.name(), shortfall, "cancelled before every child was dispatched");
        if count_down(state, shortfall) {
            on_all_children_completed(item);
        }
    }
}

fn on_child_completed(item: &Arc<WorkItem>, child: &Arc<WorkItem>) {
    let super::Shape::Composite(state) = &item.shape else {
        return;
    };

    let all_done = {
        let mut remaining = state.remaining.lock();
        if let Some(child_result) = child.final_result() {
            let failed = child_result.state().status() == TestStatus::Failed;
            item.lock_result().add_result(child_result);
            if failed && item.context().settings().stop_on_error {
                item.context()
                    .set_execution_status(ExecutionStatus::StopRequested);
            }
        }
        *remaining = remaining.saturating_sub(1);
        *remaining == 0
    };

    if all_done {
        on_all_children_completed(item);
    }
}

fn count_down(state: &CompositeState, by: usize) -> bool {
    let mut remaining = state.remaining.lock();
    *remaining = remaining.saturating_sub(by);
    *remaining == 0
}

fn on_all_children_completed(item: &Arc<WorkItem>) {
    if item.context().execution_status() == ExecutionStatus::AbortRequested {
        item.complete_with(cancel_if_any_child_cancelled);
        return;
    }

    trace!(suite = %item.name(), "all children complete, dispatching one-time teardown");
    let teardown = WorkItem::one_time_teardown(item);
    item.context().dispatcher().dispatch(teardown);
}

/// Runs a suite's one-time teardown as its own work item, then completes the suite.
pub(super) fn perform_teardown_item(teardown: &Arc<WorkItem>, suite: &Arc<WorkItem>) {
    cancel_if_any_child_cancelled(&mut suite.lock_result());
    if suite.context().execution_status() != ExecutionStatus::AbortRequested {
        perform_one_time_teardown(suite);
    }
    suite.complete();
    teardown.complete();
}

fn cancel_if_any_child_cancelled(result: &mut TestResult) {
    if result
        .children()
        .iter()
        .any(|child| child.state().is_cancelled())
    {
        result.set_result(
            ResultState::CANCELLED,
            Some(CANCELLED_MESSAGE.to_owned()),
            None,
        );
    }
}

pub(super) fn force_cancel_children(item: &Arc<WorkItem>, state: &CompositeState) {
    match state.children.get() {
        Some(children) => {
            for child in children {
                child.force_cancel();
            }
        }
        None => {
            // Never started: the subtree still owes its listener a result per test.
            skip_children(item, ResultState::CANCELLED, CANCELLED_MESSAGE);
        }
    }
}
