// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::WorkItemDispatcher;
use crate::{errors::CancelRunError, work_item::WorkItem};
use std::{io, sync::Arc};
use tracing::debug;

/// Runs every item inline on the thread that calls [`WorkItemDispatcher::start`].
///
/// `start` returns only once the whole tree has completed. There is nothing to interrupt, so
/// cancellation is not supported.
#[derive(Clone, Copy, Debug, Default)]
pub struct MainThreadDispatcher;

impl MainThreadDispatcher {
    /// Creates a new main-thread dispatcher.
    pub fn new() -> Self {
        Self
    }
}

impl WorkItemDispatcher for MainThreadDispatcher {
    fn name(&self) -> &'static str {
        "main-thread"
    }

    fn level_of_parallelism(&self) -> usize {
        0
    }

    fn start(&self, top_level: Arc<WorkItem>) -> io::Result<()> {
        debug!(test = %top_level.name(), "executing on the main thread");
        top_level.execute();
        Ok(())
    }

    fn dispatch(&self, item: Arc<WorkItem>) {
        item.execute();
    }

    fn supports_cancel(&self) -> bool {
        false
    }

    fn cancel_run(&self, _force: bool) -> Result<(), CancelRunError> {
        Err(CancelRunError::Unsupported {
            dispatcher: self.name(),
        })
    }
}
