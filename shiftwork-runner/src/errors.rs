// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by shiftwork.
//!
//! Test-body, setup and teardown failures are *not* errors at this level: they are recorded into
//! results. The types here cover the runner's own failure domains.

use std::{borrow::Cow, fmt, io};
use thiserror::Error;

/// An error that occurred while parsing a `test-threads` value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for test-threads: {input}")]
pub struct TestThreadsParseError {
    input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while loading the runner configuration.
#[derive(Debug, Error)]
#[error("failed to parse runner config from {source_desc}")]
#[non_exhaustive]
pub struct RunnerConfigError {
    source_desc: Cow<'static, str>,
    #[source]
    err: config::ConfigError,
}

impl RunnerConfigError {
    pub(crate) fn new(source_desc: impl Into<Cow<'static, str>>, err: config::ConfigError) -> Self {
        Self {
            source_desc: source_desc.into(),
            err,
        }
    }

    /// Returns a description of where the configuration was loaded from.
    pub fn source_desc(&self) -> &str {
        &self.source_desc
    }
}

/// An error returned by [`WorkItemDispatcher::cancel_run`](crate::dispatcher::WorkItemDispatcher::cancel_run).
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum CancelRunError {
    /// The dispatcher runs everything inline on the calling thread, so there is no independent
    /// execution to interrupt.
    #[error("the {dispatcher} dispatcher does not support cancelling a run")]
    Unsupported {
        /// The name of the dispatcher.
        dispatcher: &'static str,
    },
}

/// An error that occurred while building a [`TestRunner`](crate::runner::TestRunner).
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// Both `run-on-main-thread` and `single-threaded` were requested.
    #[error(
        "`run-on-main-thread` and `single-threaded` are mutually exclusive \
         (the main-thread dispatcher never spawns a thread)"
    )]
    ConflictingDispatchers,
}

/// An error that occurred while executing a test run.
///
/// Test failures are never reported through this type: they are part of the result tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerExecuteError {
    /// The event pump thread could not be spawned.
    #[error("failed to spawn the event pump thread")]
    EventPumpSpawn(#[source] io::Error),

    /// The dispatcher's runner thread could not be spawned.
    #[error("failed to spawn the {dispatcher} dispatcher thread")]
    DispatcherSpawn {
        /// The name of the dispatcher.
        dispatcher: &'static str,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The event callback panicked while handling an event.
    #[error("event callback panicked: {message}")]
    CallbackPanicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// The kind of failure a [`TestCommand`](crate::command::TestCommand) reports.
///
/// This mirrors the result states a test body can end in when it stops early.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CommandErrorKind {
    /// An unexpected error (an uncaught exception or a panic).
    Error,

    /// An assertion failed.
    Failure,

    /// The body asked to be ignored.
    Ignore,

    /// The body could not reach a verdict.
    Inconclusive,

    /// The body observed a cancellation request and stopped.
    Cancelled,
}

/// An error returned by a [`TestCommand`](crate::command::TestCommand).
///
/// The scheduler records these into the relevant result; they never propagate further.
#[derive(Clone, Debug, Error)]
pub struct CommandError {
    kind: CommandErrorKind,
    message: String,
    stack_trace: Option<String>,
}

impl CommandError {
    /// Creates a new error of the given kind.
    pub fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Creates an unexpected error.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Error, message)
    }

    /// Creates an assertion failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Failure, message)
    }

    /// Creates a request to ignore the test.
    pub fn ignore(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Ignore, message)
    }

    /// Attaches a stack trace to this error.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> CommandErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the stack trace for this error, if any.
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CommandErrorKind::Error => write!(f, "{}", self.message),
            CommandErrorKind::Failure => write!(f, "assertion failed: {}", self.message),
            CommandErrorKind::Ignore => write!(f, "ignored: {}", self.message),
            CommandErrorKind::Inconclusive => write!(f, "inconclusive: {}", self.message),
            CommandErrorKind::Cancelled => write!(f, "cancelled: {}", self.message),
        }
    }
}
