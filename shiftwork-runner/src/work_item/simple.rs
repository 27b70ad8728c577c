// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{CANCELLED_MESSAGE, WorkItem};
use crate::{
    command::run_guarded,
    context::ExecutionStatus,
    result::{FailureSite, ResultState},
    tree::RunState,
};
use std::sync::Arc;
use tracing::trace;

pub(super) fn perform_work(item: &Arc<WorkItem>) {
    let test = item.test();
    item.context().listener().test_started(test);

    let reason = test.properties().skip_reason.clone();
    let status = item.context().execution_status();
    if status != ExecutionStatus::Running {
        trace!(test = %item.name(), %status, "not running leaf: cancellation requested");
        item.lock_result().set_result(
            ResultState::CANCELLED,
            Some(CANCELLED_MESSAGE.to_owned()),
            None,
        );
    } else {
        match test.run_state() {
            RunState::Runnable => run_command(item),
            RunState::Explicit if item.is_explicit_allowed() => run_command(item),
            RunState::Explicit => item
                .lock_result()
                .set_result(ResultState::EXPLICIT, reason, None),
            RunState::Skipped => item
                .lock_result()
                .set_result(ResultState::SKIPPED, reason, None),
            RunState::Ignored => item
                .lock_result()
                .set_result(ResultState::IGNORED, reason, None),
            RunState::NotRunnable => {
                item.lock_result()
                    .set_result(ResultState::NOT_RUNNABLE, reason, None)
            }
        }
    }

    item.complete();
}

fn run_command(item: &Arc<WorkItem>) {
    let Some(command) = item.test().command() else {
        item.lock_result().set_result(
            ResultState::NOT_RUNNABLE,
            Some("No command to run".to_owned()),
            None,
        );
        return;
    };

    // The result lock is not held while the command runs: force-cancel may need it.
    match run_guarded(&**command, item.context()) {
        Ok(outcome) => item
            .lock_result()
            .set_result(outcome.state, outcome.message, None),
        Err(err) => item.lock_result().record_exception(&err, FailureSite::Test),
    }
}
