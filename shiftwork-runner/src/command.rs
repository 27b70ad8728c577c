// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The runnable-command seam.
//!
//! The scheduler treats every test body, one-time setup and one-time teardown as an opaque
//! [`TestCommand`]. Whatever decoration a command carries (timeouts, retries, repeats) is
//! invisible here.

use crate::{
    context::ExecutionContext,
    errors::CommandError,
    helpers::panic_message,
    result::ResultState,
};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A runnable command.
pub trait TestCommand: Send + Sync {
    /// Runs the command in the given context.
    fn execute(&self, cx: &ExecutionContext) -> Result<Outcome, CommandError>;
}

impl<F> TestCommand for F
where
    F: Fn(&ExecutionContext) -> Result<Outcome, CommandError> + Send + Sync,
{
    fn execute(&self, cx: &ExecutionContext) -> Result<Outcome, CommandError> {
        self(cx)
    }
}

/// The outcome of a command that ran to completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outcome {
    /// The resulting state.
    pub state: ResultState,

    /// An optional message.
    pub message: Option<String>,
}

impl Outcome {
    /// Creates an outcome with the given state and message.
    pub fn new(state: ResultState, message: Option<String>) -> Self {
        Self { state, message }
    }

    /// The command passed.
    pub fn passed() -> Self {
        Self::new(ResultState::SUCCESS, None)
    }

    /// The command failed an assertion.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ResultState::FAILURE, Some(message.into()))
    }

    /// The command passed with a warning.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ResultState::WARNING, Some(message.into()))
    }

    /// The command could not reach a verdict.
    pub fn inconclusive(message: impl Into<String>) -> Self {
        Self::new(ResultState::INCONCLUSIVE, Some(message.into()))
    }

    /// The command asked to be ignored.
    pub fn ignored(message: impl Into<String>) -> Self {
        Self::new(ResultState::IGNORED, Some(message.into()))
    }
}

/// Runs a command, converting a panic into an unexpected-error [`CommandError`].
pub fn run_guarded(command: &dyn TestCommand, cx: &ExecutionContext) -> Result<Outcome, CommandError> {
    match catch_unwind(AssertUnwindSafe(|| command.execute(cx))) {
        Ok(result) => result,
        Err(payload) => Err(CommandError::error(format!(
            "test panicked: {}",
            panic_message(&*payload)
        ))),
    }
}
