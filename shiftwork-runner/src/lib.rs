// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core scheduling for shiftwork.
//!
//! A discovered test tree ([`tree::TestNode`]) is turned into a tree of
//! [`work_item::WorkItem`]s, which a [`dispatcher::WorkItemDispatcher`] runs to
//! completion. Suites fan their children out asynchronously and count them
//! back in; results aggregate up the tree exactly once per node, and progress
//! is relayed to listeners through an event pump.
//!
//! The entry point for most users is [`runner::TestRunnerBuilder`].

pub mod affinity;
pub mod command;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod errors;
mod helpers;
pub mod reporter;
pub mod result;
pub mod runner;
#[cfg(test)]
mod test_helpers;
mod time;
pub mod tree;
pub mod work_item;
