// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns listener notifications into [`TestEvent`]s.
//!
//! The event pump hands every [`ListenerEvent`] to a [`CallbackContext`], which keeps run
//! statistics and the set of running tests, and forwards a [`TestEvent`] to the user's callback.

use crate::{
    reporter::{CancelReason, ListenerEvent, RunStats, TestEvent, TestEventKind, TestListener},
    result::{ResultLabel, TestResult, TestStatus},
    time::StopwatchStart,
    tree::{TestId, TestNode},
};
use chrono::{DateTime, FixedOffset, Local};
use debug_ignore::DebugIgnore;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::debug;

pub(super) struct CallbackContext<F> {
    callback: DebugIgnore<F>,
    listener: Option<Arc<dyn TestListener + Send + Sync>>,
    stopwatch: StopwatchStart,
    run_stats: RunStats,
    running: BTreeMap<TestId, Arc<TestNode>>,
    cancel_state: Option<CancelReason>,
    stop_on_error: bool,
}

impl<F> CallbackContext<F>
where
    F: FnMut(TestEvent) + Send,
{
    pub(super) fn new(
        callback: F,
        listener: Option<Arc<dyn TestListener + Send + Sync>>,
        initial_run_count: usize,
        stop_on_error: bool,
    ) -> Self {
        Self {
            callback: DebugIgnore(callback),
            listener,
            stopwatch: crate::time::stopwatch(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            running: BTreeMap::new(),
            cancel_state: None,
            stop_on_error,
        }
    }

    pub(super) fn run_stats(&self) -> RunStats {
        self.run_stats
    }

    pub(super) fn start_time(&self) -> DateTime<FixedOffset> {
        self.stopwatch.start_time().fixed_offset()
    }

    pub(super) fn elapsed(&self) -> Duration {
        self.stopwatch.snapshot().duration
    }

    pub(super) fn run_started(&mut self, level_of_parallelism: usize) {
        self.basic_callback(TestEventKind::RunStarted {
            test_count: self.run_stats.initial_run_count,
            level_of_parallelism,
        });
    }

    pub(super) fn run_finished(&mut self) {
        let snapshot = self.stopwatch.snapshot();
        self.basic_callback(TestEventKind::RunFinished {
            start_time: snapshot.start_time.fixed_offset(),
            elapsed: snapshot.duration,
            run_stats: self.run_stats,
        });
    }

    pub(super) fn handle_event(&mut self, event: ListenerEvent) {
        if let Some(listener) = &self.listener {
            event.deliver(&**listener);
        }

        match event {
            ListenerEvent::TestStarted(test) => {
                self.running.insert(test.id(), test.clone());
                self.basic_callback(TestEventKind::TestStarted {
                    test,
                    current_stats: self.run_stats,
                    running: self.running.len(),
                    cancel_state: self.cancel_state,
                });
            }
            ListenerEvent::TestFinished(result) => {
                // Synthesized results were never started, so there may be nothing to remove.
                self.running.remove(&result.test().id());
                self.run_stats.on_test_finished(&result);
                let failed = self.stop_on_error && is_failed_leaf(&result);

                self.basic_callback(TestEventKind::TestFinished {
                    result,
                    current_stats: self.run_stats,
                    running: self.running.len(),
                    cancel_state: self.cancel_state,
                });
                if failed {
                    self.begin_cancel(CancelReason::TestFailure);
                }
            }
            ListenerEvent::TestOutput { test, text } => {
                self.basic_callback(TestEventKind::TestOutput { test, text });
            }
            ListenerEvent::Message { test, message } => {
                self.basic_callback(TestEventKind::Message { test, message });
            }
            ListenerEvent::OneTimeSetUpStarted(suite) => {
                self.basic_callback(TestEventKind::OneTimeSetUpStarted { suite });
            }
            ListenerEvent::OneTimeSetUpFinished(suite) => {
                self.basic_callback(TestEventKind::OneTimeSetUpFinished { suite });
            }
            ListenerEvent::OneTimeTearDownStarted(suite) => {
                self.basic_callback(TestEventKind::OneTimeTearDownStarted { suite });
            }
            ListenerEvent::OneTimeTearDownFinished(suite) => {
                self.basic_callback(TestEventKind::OneTimeTearDownFinished { suite });
            }
            ListenerEvent::BeginCancel(reason) => self.begin_cancel(reason),
        }
    }

    /// Records a cancellation. Only escalations are reported.
    fn begin_cancel(&mut self, reason: CancelReason) {
        if self.cancel_state < Some(reason) {
            debug!(?reason, running = self.running.len(), "run cancellation begins");
            self.cancel_state = Some(reason);
            self.basic_callback(TestEventKind::RunBeginCancel {
                running: self.running.len(),
                reason,
            });
        }
    }

    fn basic_callback(&mut self, kind: TestEventKind) {
        let snapshot = self.stopwatch.snapshot();
        let event = TestEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: snapshot.duration,
            kind,
        };
        (self.callback)(event)
    }
}

fn is_failed_leaf(result: &TestResult) -> bool {
    let state = result.state();
    !result.test().is_suite()
        && state.status() == TestStatus::Failed
        && state.label() != ResultLabel::Cancelled
}
