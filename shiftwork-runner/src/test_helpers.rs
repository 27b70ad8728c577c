// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures for unit tests.

use crate::{
    command::Outcome,
    context::{ExecutionContext, RunSettings},
    dispatcher::MainThreadDispatcher,
    errors::CommandError,
    reporter::{NullListener, TestListener},
    result::TestResult,
    tree::{TestNode, TestNodeBuilder},
};
use parking_lot::Mutex;
use std::sync::Arc;

/// A tree made of a single passing test case.
pub(crate) fn single_case(name: &str) -> Arc<TestNode> {
    TestNodeBuilder::case(name, |_: &ExecutionContext| {
        Ok::<_, CommandError>(Outcome::passed())
    })
    .build()
}

/// A root context that runs inline and reports to nobody.
pub(crate) fn quiet_context(tree: &Arc<TestNode>) -> ExecutionContext {
    context_with_listener(tree, Arc::new(NullListener))
}

/// A root context that runs inline and reports to `listener`.
pub(crate) fn context_with_listener<L>(tree: &Arc<TestNode>, listener: Arc<L>) -> ExecutionContext
where
    L: TestListener + Send + Sync + 'static,
{
    context_with_settings(tree, listener, RunSettings::default())
}

/// A root context that runs inline with the given settings.
pub(crate) fn context_with_settings<L>(
    tree: &Arc<TestNode>,
    listener: Arc<L>,
    settings: RunSettings,
) -> ExecutionContext
where
    L: TestListener + Send + Sync + 'static,
{
    ExecutionContext::root(
        tree.clone(),
        listener,
        Arc::new(MainThreadDispatcher::new()),
        settings,
    )
}

/// Records every notification as a line of text.
#[derive(Debug, Default)]
pub(crate) struct RecordingListener {
    lines: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().push(line);
    }
}

impl TestListener for RecordingListener {
    fn test_started(&self, test: &Arc<TestNode>) {
        self.push(format!("started {}", test.full_name()));
    }

    fn test_finished(&self, result: &Arc<TestResult>) {
        self.push(format!(
            "finished {} {}",
            result.test().full_name(),
            result.state()
        ));
    }

    fn test_output(&self, test: &Arc<TestNode>, text: &str) {
        self.push(format!("output {}: {text}", test.full_name()));
    }

    fn send_message(&self, test: &Arc<TestNode>, message: &str) {
        self.push(format!("message {}: {message}", test.full_name()));
    }

    fn one_time_setup_started(&self, suite: &Arc<TestNode>) {
        self.push(format!("setup-started {}", suite.full_name()));
    }

    fn one_time_setup_finished(&self, suite: &Arc<TestNode>) {
        self.push(format!("setup-finished {}", suite.full_name()));
    }

    fn one_time_teardown_started(&self, suite: &Arc<TestNode>) {
        self.push(format!("teardown-started {}", suite.full_name()));
    }

    fn one_time_teardown_finished(&self, suite: &Arc<TestNode>) {
        self.push(format!("teardown-finished {}", suite.full_name()));
    }
}
