// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::WorkItemDispatcher;
use crate::{
    affinity::{ThreadAffinity, set_current_affinity},
    errors::CancelRunError,
    work_item::WorkItem,
};
use parking_lot::Mutex;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, warn};

/// Runs the whole tree on one dedicated thread, created with the top-level item's affinity.
#[derive(Debug, Default)]
pub struct SingleThreadDispatcher {
    top_level: Mutex<Option<Arc<WorkItem>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    aborted: AtomicBool,
}

impl SingleThreadDispatcher {
    /// Creates a new single-thread dispatcher.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkItemDispatcher for SingleThreadDispatcher {
    fn name(&self) -> &'static str {
        "single-thread"
    }

    fn level_of_parallelism(&self) -> usize {
        0
    }

    fn start(&self, top_level: Arc<WorkItem>) -> io::Result<()> {
        let affinity = top_level.affinity().unwrap_or(ThreadAffinity::MultiThreaded);
        *self.top_level.lock() = Some(top_level.clone());

        let handle = thread::Builder::new()
            .name("shiftwork-runner".to_owned())
            .spawn(move || {
                set_current_affinity(affinity);
                debug!(test = %top_level.name(), %affinity, "executing on the runner thread");
                top_level.execute();
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    fn dispatch(&self, item: Arc<WorkItem>) {
        item.execute();
    }

    fn cancel_run(&self, force: bool) -> Result<(), CancelRunError> {
        if force {
            self.aborted.store(true, Ordering::Release);
        }
        let top_level = self.top_level.lock().clone();
        if let Some(top_level) = top_level {
            top_level.cancel(force);
        }
        Ok(())
    }

    fn shut_down(&self) {
        self.top_level.lock().take();
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if self.aborted.load(Ordering::Acquire) && !handle.is_finished() {
            // The thread is stuck in a test body that ignored the abort.
            warn!("runner thread still busy after forced cancellation, detaching it");
            return;
        }
        if handle.join().is_err() {
            warn!("runner thread panicked");
        }
    }
}
