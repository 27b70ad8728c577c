// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ParallelWorkItemDispatcher, WorkItemQueue, worker::TestWorker};
use parking_lot::Mutex;
use std::{
    fmt, io,
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering},
    },
};
use tracing::debug;

/// The shifts of the parallel dispatcher, in the order they are considered for starting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ShiftKind {
    /// Parallel items. N multi-threaded workers plus one single-threaded-affinity worker.
    Parallel,

    /// Non-parallel items with default affinity. One worker.
    NonParallel,

    /// Non-parallel items with single-threaded affinity. One worker.
    NonParallelSingleThreaded,
}

impl ShiftKind {
    pub(super) const ALL: [ShiftKind; 3] = [
        ShiftKind::Parallel,
        ShiftKind::NonParallel,
        ShiftKind::NonParallelSingleThreaded,
    ];

    pub(super) fn index(self) -> usize {
        match self {
            ShiftKind::Parallel => 0,
            ShiftKind::NonParallel => 1,
            ShiftKind::NonParallelSingleThreaded => 2,
        }
    }
}

impl fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftKind::Parallel => write!(f, "parallel"),
            ShiftKind::NonParallel => write!(f, "non-parallel"),
            ShiftKind::NonParallelSingleThreaded => write!(f, "non-parallel single-threaded"),
        }
    }
}

struct ShiftState {
    active: bool,
    workers_started: bool,
}

/// A set of queues and the workers that serve them. Only one shift is active at a time; a shift
/// ends once none of its workers is busy and all of its queues are empty.
pub(super) struct WorkShift {
    kind: ShiftKind,
    queues: Vec<Arc<WorkItemQueue>>,
    workers: Vec<TestWorker>,
    state: Mutex<ShiftState>,
    busy: AtomicUsize,
}

impl WorkShift {
    pub(super) fn new(
        kind: ShiftKind,
        queues: Vec<Arc<WorkItemQueue>>,
        workers: Vec<TestWorker>,
    ) -> Self {
        Self {
            kind,
            queues,
            workers,
            state: Mutex::new(ShiftState {
                active: false,
                workers_started: false,
            }),
            busy: AtomicUsize::new(0),
        }
    }

    pub(super) fn kind(&self) -> ShiftKind {
        self.kind
    }

    pub(super) fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub(super) fn has_work(&self) -> bool {
        self.queues.iter().any(|queue| !queue.is_empty())
    }

    /// Activates the shift, spawning its workers the first time.
    pub(super) fn start(&self, dispatcher: &Weak<ParallelWorkItemDispatcher>) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.workers_started {
            for worker in &self.workers {
                worker.start(self.kind, dispatcher.clone())?;
            }
            state.workers_started = true;
            debug!(
                shift = %self.kind,
                workers = ?self.workers.iter().map(TestWorker::name).collect::<Vec<_>>(),
                "spawned workers",
            );
        }
        state.active = true;
        for queue in &self.queues {
            queue.start();
        }
        debug!(shift = %self.kind, "shift started");
        Ok(())
    }

    pub(super) fn on_worker_busy(&self) {
        self.busy.fetch_add(1, Ordering::AcqRel);
    }

    /// Records that a worker finished an item. Returns true if this ended the shift.
    pub(super) fn on_worker_idle(&self) -> bool {
        self.busy.fetch_sub(1, Ordering::AcqRel);

        let mut state = self.state.lock();
        // Emptiness first: a worker that takes the last item is counted busy before the queue
        // reads as empty.
        if state.active && !self.has_work() && self.busy.load(Ordering::Acquire) == 0 {
            state.active = false;
            for queue in &self.queues {
                queue.pause();
            }
            debug!(shift = %self.kind, "shift ended");
            return true;
        }
        false
    }

    pub(super) fn cancel(&self, force: bool) {
        if force {
            for queue in &self.queues {
                queue.stop();
            }
        }
        for worker in &self.workers {
            worker.cancel(force);
        }
    }

    pub(super) fn shut_down(&self) {
        self.state.lock().active = false;
        for queue in &self.queues {
            queue.stop();
        }
    }

    pub(super) fn join_workers(&self, aborted: bool) {
        for worker in &self.workers {
            worker.join(aborted);
        }
    }
}
