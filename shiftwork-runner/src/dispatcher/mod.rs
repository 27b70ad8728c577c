// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatchers decide where and when work items execute.
//!
//! Three strategies are provided:
//!
//! * [`MainThreadDispatcher`] runs everything inline on the calling thread.
//! * [`SingleThreadDispatcher`] runs everything inline on one dedicated thread.
//! * [`ParallelWorkItemDispatcher`] routes items through four queues grouped into three
//!   [shifts](ShiftKind), each with its own workers.

mod main_thread;
mod parallel;
mod queue;
mod shift;
mod single_thread;
mod worker;

pub use main_thread::*;
pub use parallel::*;
pub use queue::*;
pub use shift::ShiftKind;
pub use single_thread::*;

use crate::{errors::CancelRunError, work_item::WorkItem};
use std::{io, sync::Arc};

/// Runs work items.
pub trait WorkItemDispatcher: Send + Sync {
    /// A short name for this dispatcher, used in errors and logs.
    fn name(&self) -> &'static str;

    /// The number of parallel workers, or 0 if this dispatcher never runs items in parallel.
    fn level_of_parallelism(&self) -> usize;

    /// Starts execution of the top-level item.
    ///
    /// Depending on the dispatcher this either returns once the item has completed or as soon as
    /// execution has been handed off. Use [`WorkItem::wait_for_completion`] to wait.
    fn start(&self, top_level: Arc<WorkItem>) -> io::Result<()>;

    /// Dispatches an item for execution, according to its [execution
    /// strategy](crate::work_item::ExecutionStrategy).
    fn dispatch(&self, item: Arc<WorkItem>);

    /// Returns false if [`Self::cancel_run`] always fails for this dispatcher.
    fn supports_cancel(&self) -> bool {
        true
    }

    /// Cancels the run. With `force`, outstanding items are force-completed as Cancelled after a
    /// bounded wait.
    fn cancel_run(&self, force: bool) -> Result<(), CancelRunError>;

    /// Sets aside all pending work so that only `item`'s descendants run until they are
    /// exhausted.
    fn isolate_queues(&self, _item: &Arc<WorkItem>) {}

    /// Releases threads and breaks reference cycles once the top-level item has completed.
    fn shut_down(&self) {}
}
