// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting progress to listeners.
//!
//! Work items notify a [`TestListener`] as they start and finish. During a run the listener the
//! work items see is a [`QueuingEventListener`], which only enqueues; an [`EventPump`] thread
//! drains the queue and forwards to the real listener, so slow listeners never hold up workers.

mod events;
mod pump;
mod queue;

pub use events::*;
pub use pump::*;
pub use queue::*;

use crate::{result::TestResult, tree::TestNode};
use std::sync::Arc;

/// A push sink for run progress.
///
/// Methods may be called from any scheduler thread.
pub trait TestListener {
    /// A test or suite started.
    fn test_started(&self, test: &Arc<TestNode>);

    /// A test or suite finished.
    fn test_finished(&self, result: &Arc<TestResult>);

    /// A test wrote output.
    fn test_output(&self, _test: &Arc<TestNode>, _text: &str) {}

    /// A test sent a message.
    fn send_message(&self, _test: &Arc<TestNode>, _message: &str) {}

    /// A suite's one-time setup is about to run.
    fn one_time_setup_started(&self, _suite: &Arc<TestNode>) {}

    /// A suite's one-time setup finished.
    fn one_time_setup_finished(&self, _suite: &Arc<TestNode>) {}

    /// A suite's one-time teardown is about to run.
    fn one_time_teardown_started(&self, _suite: &Arc<TestNode>) {}

    /// A suite's one-time teardown finished.
    fn one_time_teardown_finished(&self, _suite: &Arc<TestNode>) {}
}

/// A listener that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullListener;

impl TestListener for NullListener {
    fn test_started(&self, _test: &Arc<TestNode>) {}

    fn test_finished(&self, _result: &Arc<TestResult>) {}
}

impl<T: TestListener + ?Sized> TestListener for Arc<T> {
    fn test_started(&self, test: &Arc<TestNode>) {
        (**self).test_started(test)
    }

    fn test_finished(&self, result: &Arc<TestResult>) {
        (**self).test_finished(result)
    }

    fn test_output(&self, test: &Arc<TestNode>, text: &str) {
        (**self).test_output(test, text)
    }

    fn send_message(&self, test: &Arc<TestNode>, message: &str) {
        (**self).send_message(test, message)
    }

    fn one_time_setup_started(&self, suite: &Arc<TestNode>) {
        (**self).one_time_setup_started(suite)
    }

    fn one_time_setup_finished(&self, suite: &Arc<TestNode>) {
        (**self).one_time_setup_finished(suite)
    }

    fn one_time_teardown_started(&self, suite: &Arc<TestNode>) {
        (**self).one_time_teardown_started(suite)
    }

    fn one_time_teardown_finished(&self, suite: &Arc<TestNode>) {
        (**self).one_time_teardown_finished(suite)
    }
}
