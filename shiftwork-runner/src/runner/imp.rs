// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::callback::CallbackContext;
use crate::{
    config::{DispatcherKind, RunnerConfig, TestThreads},
    context::{ExecutionContext, RunSettings},
    dispatcher::{
        MainThreadDispatcher, ParallelWorkItemDispatcher, SingleThreadDispatcher,
        WorkItemDispatcher,
    },
    errors::{CancelRunError, TestRunnerBuildError, TestRunnerExecuteError},
    helpers::plural,
    reporter::{
        CancelReason, EventPump, EventQueue, ListenerEvent, QueuingEventListener, RunStats,
        TestEvent, TestListener,
    },
    result::TestResult,
    tree::{TestFilter, TestNode},
    work_item::WorkItem,
};
use chrono::{DateTime, FixedOffset};
use std::{fmt, sync::Arc, thread, time::Duration};
use tracing::{debug, info};

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    config: Option<RunnerConfig>,
    test_threads: Option<TestThreads>,
    filter: Option<TestFilter>,
    dispatcher: Option<DebugDispatcher>,
}

impl TestRunnerBuilder {
    /// Sets the configuration. Defaults to [`RunnerConfig::default`].
    pub fn set_config(&mut self, config: RunnerConfig) -> &mut Self {
        self.config = Some(config);
        self
    }

    /// Sets the number of tests to run simultaneously, overriding the configuration.
    pub fn set_test_threads(&mut self, test_threads: TestThreads) -> &mut Self {
        self.test_threads = Some(test_threads);
        self
    }

    /// Sets which tests take part in the run. Defaults to every test.
    pub fn set_filter(&mut self, filter: TestFilter) -> &mut Self {
        self.filter = Some(filter);
        self
    }

    /// Uses the given dispatcher instead of the one the configuration selects.
    pub fn set_dispatcher(&mut self, dispatcher: Arc<dyn WorkItemDispatcher>) -> &mut Self {
        self.dispatcher = Some(DebugDispatcher(dispatcher));
        self
    }

    /// Creates a new test runner for `tree`.
    pub fn build(self, tree: Arc<TestNode>) -> Result<TestRunner, TestRunnerBuildError> {
        let mut config = self.config.unwrap_or_default();
        if config.run_on_main_thread && config.single_threaded {
            return Err(TestRunnerBuildError::ConflictingDispatchers);
        }
        if let Some(test_threads) = self.test_threads {
            config.test_threads = test_threads;
        }

        let dispatcher = match self.dispatcher {
            Some(DebugDispatcher(dispatcher)) => dispatcher,
            None => match config.dispatcher_kind() {
                DispatcherKind::MainThread => Arc::new(MainThreadDispatcher::new()) as Arc<dyn WorkItemDispatcher>,
                DispatcherKind::SingleThread => Arc::new(SingleThreadDispatcher::new()),
                DispatcherKind::Parallel { threads } => ParallelWorkItemDispatcher::new(threads),
            },
        };
        debug!(
            dispatcher = dispatcher.name(),
            level_of_parallelism = dispatcher.level_of_parallelism(),
            "built test runner",
        );

        Ok(TestRunner {
            tree,
            filter: Arc::new(self.filter.unwrap_or(TestFilter::All)),
            config,
            dispatcher,
            queue: Arc::new(EventQueue::new()),
        })
    }
}

struct DebugDispatcher(Arc<dyn WorkItemDispatcher>);

impl fmt::Debug for DebugDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dispatcher").field(&self.0.name()).finish()
    }
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
pub struct TestRunner {
    tree: Arc<TestNode>,
    filter: Arc<TestFilter>,
    config: RunnerConfig,
    dispatcher: Arc<dyn WorkItemDispatcher>,
    queue: Arc<EventQueue>,
}

impl TestRunner {
    /// Returns the effective configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Returns the number of parallel workers, or 0 if tests do not run in parallel.
    pub fn level_of_parallelism(&self) -> usize {
        self.dispatcher.level_of_parallelism()
    }

    /// Returns the number of leaf tests that take part in the run.
    pub fn test_count(&self) -> usize {
        self.tree
            .iter()
            .filter(|node| !node.is_suite() && self.filter.pass(node))
            .count()
    }

    /// Returns a handle that can cancel the run from any thread.
    pub fn cancel_handle(&self) -> RunCancelHandle {
        RunCancelHandle {
            dispatcher: self.dispatcher.clone(),
            queue: self.queue.clone(),
        }
    }

    /// Executes the tests.
    ///
    /// The callback is called on a dedicated thread, in order, for every event of the run.
    /// `RunStarted` and `RunFinished` are delivered on the calling thread.
    pub fn execute<F>(self, callback: F) -> Result<RunSummary, TestRunnerExecuteError>
    where
        F: FnMut(TestEvent) + Send,
    {
        self.execute_impl(None, callback)
    }

    /// Executes the tests, forwarding progress to a [`TestListener`].
    pub fn execute_with_listener<L>(self, listener: L) -> Result<RunSummary, TestRunnerExecuteError>
    where
        L: TestListener + Send + Sync + 'static,
    {
        self.execute_impl(Some(Arc::new(listener)), |_| {})
    }

    fn execute_impl<F>(
        self,
        listener: Option<Arc<dyn TestListener + Send + Sync>>,
        callback: F,
    ) -> Result<RunSummary, TestRunnerExecuteError>
    where
        F: FnMut(TestEvent) + Send,
    {
        let test_count = self.test_count();
        let level_of_parallelism = self.level_of_parallelism();
        let settings = RunSettings {
            stop_on_error: self.config.stop_on_error,
            run_explicit: self.config.run_explicit,
            force_cancel_wait: self.config.force_cancel_wait,
            filter: self.filter.clone(),
        };
        let context = ExecutionContext::root(
            self.tree.clone(),
            Arc::new(QueuingEventListener::new(self.queue.clone())),
            self.dispatcher.clone(),
            settings,
        );
        let root = WorkItem::create(self.tree.clone(), context, None);

        info!(
            "starting {test_count} {} on the {} dispatcher",
            plural::tests_str(test_count),
            self.dispatcher.name(),
        );
        let mut cx = CallbackContext::new(callback, listener, test_count, self.config.stop_on_error);
        cx.run_started(level_of_parallelism);

        let panicked = thread::scope(|scope| {
            let pump = EventPump::new(self.queue.clone(), |event: ListenerEvent| {
                cx.handle_event(event)
            })
            .start(scope)
            .map_err(TestRunnerExecuteError::EventPumpSpawn)?;

            if let Err(err) = self.dispatcher.start(root.clone()) {
                self.dispatcher.shut_down();
                pump.stop();
                return Err(TestRunnerExecuteError::DispatcherSpawn {
                    dispatcher: self.dispatcher.name(),
                    err,
                });
            }
            root.wait_for_completion();
            self.dispatcher.shut_down();

            Ok(pump.stop())
        })?;

        if let Some(message) = panicked {
            return Err(TestRunnerExecuteError::CallbackPanicked { message });
        }

        cx.run_finished();
        let stats = cx.run_stats();
        info!(
            finished = stats.finished_count,
            passed = stats.passed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            elapsed = ?cx.elapsed(),
            "run finished",
        );

        let result = root
            .final_result()
            .unwrap_or_else(|| Arc::new(TestResult::new(self.tree.clone())));
        Ok(RunSummary {
            result,
            stats,
            start_time: cx.start_time(),
            elapsed: cx.elapsed(),
        })
    }
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRunner")
            .field("root", &self.tree.full_name())
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher.name())
            .finish_non_exhaustive()
    }
}

/// The outcome of [`TestRunner::execute`].
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// The result tree for the root of the run.
    pub result: Arc<TestResult>,

    /// Statistics for the run.
    pub stats: RunStats,

    /// When the run started.
    pub start_time: DateTime<FixedOffset>,

    /// How long the run took.
    pub elapsed: Duration,
}

/// Cancels a run from any thread.
///
/// Created using [`TestRunner::cancel_handle`].
#[derive(Clone)]
pub struct RunCancelHandle {
    dispatcher: Arc<dyn WorkItemDispatcher>,
    queue: Arc<EventQueue>,
}

impl RunCancelHandle {
    /// Requests cancellation of the run.
    ///
    /// Without `force`, running tests finish and everything not yet started completes as
    /// Cancelled. With `force`, this also waits for the configured force-cancel wait and then
    /// completes anything still outstanding as Cancelled.
    pub fn cancel_run(&self, force: bool) -> Result<(), CancelRunError> {
        if self.dispatcher.supports_cancel() {
            let reason = if force {
                CancelReason::Abort
            } else {
                CancelReason::Stop
            };
            self.queue.enqueue(ListenerEvent::BeginCancel(reason));
        }
        self.dispatcher.cancel_run(force)
    }

    /// Returns the number of parallel workers, or 0 if tests do not run in parallel.
    pub fn level_of_parallelism(&self) -> usize {
        self.dispatcher.level_of_parallelism()
    }
}

impl fmt::Debug for RunCancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunCancelHandle")
            .field("dispatcher", &self.dispatcher.name())
            .finish_non_exhaustive()
    }
}
