// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ParallelWorkItemDispatcher, WorkItemQueue, shift::ShiftKind};
use crate::{
    affinity::{ThreadAffinity, set_current_affinity},
    work_item::WorkItem,
};
use parking_lot::Mutex;
use std::{
    io,
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
};
use tracing::{trace, warn};

/// A thread that executes items from one queue for one shift.
#[derive(Debug)]
pub(super) struct TestWorker {
    name: String,
    queue: Arc<WorkItemQueue>,
    affinity: ThreadAffinity,
    current: Arc<Mutex<Option<Arc<WorkItem>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TestWorker {
    pub(super) fn new(name: String, queue: Arc<WorkItemQueue>, affinity: ThreadAffinity) -> Self {
        Self {
            name,
            queue,
            affinity,
            current: Arc::new(Mutex::new(None)),
            handle: Mutex::new(None),
        }
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn is_busy(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Spawns the worker thread.
    pub(super) fn start(
        &self,
        shift: ShiftKind,
        dispatcher: Weak<ParallelWorkItemDispatcher>,
    ) -> io::Result<()> {
        let queue = self.queue.clone();
        let current = self.current.clone();
        let affinity = self.affinity;
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                set_current_affinity(affinity);
                trace!(worker = %name, queue = queue.name(), %affinity, "worker started");

                loop {
                    let item = queue.dequeue(|| {
                        if let Some(dispatcher) = dispatcher.upgrade() {
                            dispatcher.shift(shift).on_worker_busy();
                        }
                    });
                    let Some(item) = item else {
                        break;
                    };

                    trace!(worker = %name, test = %item.name(), kind = ?item.kind(), "executing");
                    *current.lock() = Some(item.clone());
                    item.execute();
                    current.lock().take();

                    match dispatcher.upgrade() {
                        Some(dispatcher) => dispatcher.on_worker_idle(shift),
                        None => break,
                    }
                }

                trace!(worker = %name, "worker exiting");
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Passes a cancellation request on to the item this worker is executing, if any.
    pub(super) fn cancel(&self, force: bool) {
        let current = self.current.lock().clone();
        if let Some(item) = current {
            item.request_cancel(force);
        }
    }

    /// Waits for the worker thread to exit. A worker stuck in an item after a forced cancel is
    /// detached instead.
    pub(super) fn join(&self, aborted: bool) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if aborted && !handle.is_finished() && self.is_busy() {
            warn!(worker = %self.name, "worker still busy after forced cancellation, detaching it");
            return;
        }
        if handle.join().is_err() {
            warn!(worker = %self.name, "worker thread panicked");
        }
    }
}
