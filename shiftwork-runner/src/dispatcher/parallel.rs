// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    WorkItemDispatcher, WorkItemQueue,
    shift::{ShiftKind, WorkShift},
    worker::TestWorker,
};
use crate::{
    affinity::ThreadAffinity,
    errors::CancelRunError,
    tree::ParallelScope,
    work_item::{ExecutionStrategy, WorkItem, WorkItemKind},
};
use parking_lot::Mutex;
use std::{
    fmt, io,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tracing::{debug, info, trace, warn};

/// A shift transition, as reported to a [shift observer](ParallelWorkItemDispatcher::set_shift_observer).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ShiftEvent {
    /// A shift became active.
    Started(ShiftKind),

    /// A shift ran out of work.
    Finished(ShiftKind),
}

type ShiftObserver = Arc<dyn Fn(ShiftEvent) + Send + Sync>;

struct QueueLockState {
    top_level: Option<Arc<WorkItem>>,
    // Items that isolated the queues, innermost last.
    isolated: Vec<Arc<WorkItem>>,
}

/// Runs items on worker threads, in shifts.
///
/// Four queues are grouped into three shifts:
///
/// | shift | queues | workers |
/// |---|---|---|
/// | [`ShiftKind::Parallel`] | parallel, parallel single-threaded | N + 1 |
/// | [`ShiftKind::NonParallel`] | non-parallel | 1 |
/// | [`ShiftKind::NonParallelSingleThreaded`] | non-parallel single-threaded | 1 |
///
/// Shifts run one at a time, considered in that order. When a shift ends, the next one with
/// pending work starts. Workers are spawned the first time their shift starts.
pub struct ParallelWorkItemDispatcher {
    this: Weak<ParallelWorkItemDispatcher>,
    level_of_parallelism: usize,
    parallel_queue: Arc<WorkItemQueue>,
    parallel_sta_queue: Arc<WorkItemQueue>,
    non_parallel_queue: Arc<WorkItemQueue>,
    non_parallel_sta_queue: Arc<WorkItemQueue>,
    shifts: [WorkShift; 3],
    queue_lock: Mutex<QueueLockState>,
    active_composites: Mutex<Vec<Arc<WorkItem>>>,
    items_dispatched: AtomicUsize,
    aborted: AtomicBool,
    observer: Mutex<Option<ShiftObserver>>,
}

impl ParallelWorkItemDispatcher {
    /// Creates a dispatcher with `level_of_parallelism` workers for the parallel shift. A level of
    /// zero is treated as one.
    pub fn new(level_of_parallelism: usize) -> Arc<Self> {
        let level_of_parallelism = level_of_parallelism.max(1);
        let parallel_queue = Arc::new(WorkItemQueue::new("parallel"));
        let parallel_sta_queue = Arc::new(WorkItemQueue::new("parallel-sta"));
        let non_parallel_queue = Arc::new(WorkItemQueue::new("non-parallel"));
        let non_parallel_sta_queue = Arc::new(WorkItemQueue::new("non-parallel-sta"));

        let mut parallel_workers: Vec<_> = (1..=level_of_parallelism)
            .map(|n| {
                TestWorker::new(
                    format!("shiftwork-worker-{n}"),
                    parallel_queue.clone(),
                    ThreadAffinity::MultiThreaded,
                )
            })
            .collect();
        parallel_workers.push(TestWorker::new(
            "shiftwork-worker-sta".to_owned(),
            parallel_sta_queue.clone(),
            ThreadAffinity::SingleThreaded,
        ));

        let shifts = [
            WorkShift::new(
                ShiftKind::Parallel,
                vec![parallel_queue.clone(), parallel_sta_queue.clone()],
                parallel_workers,
            ),
            WorkShift::new(
                ShiftKind::NonParallel,
                vec![non_parallel_queue.clone()],
                vec![TestWorker::new(
                    "shiftwork-worker-np".to_owned(),
                    non_parallel_queue.clone(),
                    ThreadAffinity::MultiThreaded,
                )],
            ),
            WorkShift::new(
                ShiftKind::NonParallelSingleThreaded,
                vec![non_parallel_sta_queue.clone()],
                vec![TestWorker::new(
                    "shiftwork-worker-np-sta".to_owned(),
                    non_parallel_sta_queue.clone(),
                    ThreadAffinity::SingleThreaded,
                )],
            ),
        ];

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            level_of_parallelism,
            parallel_queue,
            parallel_sta_queue,
            non_parallel_queue,
            non_parallel_sta_queue,
            shifts,
            queue_lock: Mutex::new(QueueLockState {
                top_level: None,
                isolated: Vec::new(),
            }),
            active_composites: Mutex::new(Vec::new()),
            items_dispatched: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            observer: Mutex::new(None),
        })
    }

    /// Registers a callback for shift transitions. It runs on whichever thread caused the
    /// transition.
    pub fn set_shift_observer(&self, observer: impl Fn(ShiftEvent) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Arc::new(observer));
    }

    /// The number of items dispatched so far, including those executed inline.
    pub fn items_dispatched(&self) -> usize {
        self.items_dispatched.load(Ordering::Relaxed)
    }

    /// The number of nested isolations currently in effect.
    pub fn isolation_depth(&self) -> usize {
        self.queue_lock.lock().isolated.len()
    }

    /// The queues, in routing order: parallel, parallel single-threaded, non-parallel,
    /// non-parallel single-threaded.
    pub fn queues(&self) -> [&WorkItemQueue; 4] {
        [
            &*self.parallel_queue,
            &*self.parallel_sta_queue,
            &*self.non_parallel_queue,
            &*self.non_parallel_sta_queue,
        ]
    }

    /// Returns the shift that is currently active, if any.
    pub fn active_shift(&self) -> Option<ShiftKind> {
        self.shifts
            .iter()
            .find(|shift| shift.is_active())
            .map(WorkShift::kind)
    }

    pub(super) fn shift(&self, kind: ShiftKind) -> &WorkShift {
        &self.shifts[kind.index()]
    }

    pub(super) fn on_worker_idle(&self, kind: ShiftKind) {
        if self.shift(kind).on_worker_idle() {
            self.on_end_of_shift(kind);
        }
    }

    fn notify(&self, event: ShiftEvent) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer(event);
        }
    }

    fn on_end_of_shift(&self, ended: ShiftKind) {
        self.notify(ShiftEvent::Finished(ended));

        loop {
            if self.aborted.load(Ordering::Acquire) {
                self.shut_down_shifts();
                return;
            }

            match self.start_next_shift() {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => {
                    warn!(%err, "failed to spawn workers, abandoning the run");
                    self.abandon();
                    return;
                }
            }

            // Nothing is pending: the innermost isolated subtree is exhausted.
            if self.isolation_depth() > 0 {
                self.restore_queues();
                continue;
            }

            let top_complete = self
                .queue_lock
                .lock()
                .top_level
                .as_ref()
                .is_none_or(|top| top.is_complete());
            if top_complete {
                debug!("all work complete, shutting down shifts");
                self.shut_down_shifts();
            } else {
                // The top-level item is still finishing up on some thread; its completion does
                // not need a shift.
                debug!("no shift has pending work");
            }
            return;
        }
    }

    fn start_next_shift(&self) -> io::Result<bool> {
        for kind in ShiftKind::ALL {
            let shift = self.shift(kind);
            if shift.has_work() {
                shift.start(&self.this)?;
                self.notify(ShiftEvent::Started(kind));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn restore_queues(&self) {
        let mut state = self.queue_lock.lock();
        if let Some(item) = state.isolated.pop() {
            for queue in self.queues() {
                queue.restore();
            }
            debug!(
                test = %item.name(),
                depth = state.isolated.len(),
                "restored queues after isolation",
            );
        }
    }

    fn shut_down_shifts(&self) {
        for shift in &self.shifts {
            shift.shut_down();
        }
    }

    // Used when no further progress is possible. Completes everything as cancelled so nobody
    // waits forever.
    fn abandon(&self) {
        self.aborted.store(true, Ordering::Release);
        self.shut_down_shifts();
        let top_level = self.queue_lock.lock().top_level.clone();
        if let Some(top_level) = top_level {
            top_level.request_cancel(true);
            top_level.force_cancel();
        }
    }

    fn queue_for(&self, strategy: ExecutionStrategy, item: &WorkItem) -> &WorkItemQueue {
        let single_threaded = item.affinity() == Some(ThreadAffinity::SingleThreaded);
        match (strategy, single_threaded) {
            (ExecutionStrategy::NonParallel, false) => &self.non_parallel_queue,
            (ExecutionStrategy::NonParallel, true) => &self.non_parallel_sta_queue,
            (_, false) => &self.parallel_queue,
            (_, true) => &self.parallel_sta_queue,
        }
    }

    fn track_composite(&self, item: &Arc<WorkItem>) {
        self.active_composites.lock().push(item.clone());
        let this = self.this.clone();
        item.on_completion(Box::new(move |item| {
            if let Some(this) = this.upgrade() {
                this.active_composites
                    .lock()
                    .retain(|active| !Arc::ptr_eq(active, item));
            }
        }));
    }
}

impl WorkItemDispatcher for ParallelWorkItemDispatcher {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn level_of_parallelism(&self) -> usize {
        self.level_of_parallelism
    }

    fn start(&self, top_level: Arc<WorkItem>) -> io::Result<()> {
        // The root's own scope decides, whatever its context says.
        let scope = top_level.test().properties().parallel_scope.unwrap_or_default();
        let strategy = if scope.contains(ParallelScope::NONE) {
            ExecutionStrategy::NonParallel
        } else {
            ExecutionStrategy::Parallel
        };
        top_level.init_strategy(strategy);
        self.queue_lock.lock().top_level = Some(top_level.clone());

        info!(
            test = %top_level.name(),
            ?strategy,
            workers = self.level_of_parallelism,
            "starting parallel run",
        );
        self.dispatch(top_level);
        if !self.start_next_shift()? {
            warn!("nothing to run after dispatching the top-level item");
        }
        Ok(())
    }

    fn dispatch(&self, item: Arc<WorkItem>) {
        self.items_dispatched.fetch_add(1, Ordering::Relaxed);
        if item.kind() == WorkItemKind::Composite {
            self.track_composite(&item);
        }

        let strategy = item.execution_strategy();
        trace!(test = %item.name(), ?strategy, "dispatching");
        match strategy {
            ExecutionStrategy::Direct => item.execute(),
            ExecutionStrategy::Parallel | ExecutionStrategy::NonParallel => {
                self.queue_for(strategy, &item).enqueue(item)
            }
        }
    }

    fn cancel_run(&self, force: bool) -> Result<(), CancelRunError> {
        info!(force, "cancelling run");
        if force {
            self.aborted.store(true, Ordering::Release);
        }
        for shift in &self.shifts {
            shift.cancel(force);
        }

        let top_level = self.queue_lock.lock().top_level.clone();
        if let Some(top_level) = top_level {
            top_level.cancel(force);
        }

        if force {
            let stragglers = std::mem::take(&mut *self.active_composites.lock());
            for composite in stragglers.iter().rev() {
                composite.force_cancel();
            }
            self.shut_down_shifts();
        }
        Ok(())
    }

    fn isolate_queues(&self, item: &Arc<WorkItem>) {
        let mut state = self.queue_lock.lock();
        for queue in self.queues() {
            queue.save();
        }
        state.isolated.push(item.clone());
        debug!(test = %item.name(), depth = state.isolated.len(), "isolated queues");
    }

    fn shut_down(&self) {
        self.shut_down_shifts();
        let aborted = self.aborted.load(Ordering::Acquire);
        for shift in &self.shifts {
            shift.join_workers(aborted);
        }

        // Queued items hold contexts, and contexts hold this dispatcher.
        for queue in self.queues() {
            queue.clear();
        }
        let mut state = self.queue_lock.lock();
        state.top_level = None;
        state.isolated.clear();
        self.active_composites.lock().clear();
    }
}

impl fmt::Debug for ParallelWorkItemDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelWorkItemDispatcher")
            .field("level_of_parallelism", &self.level_of_parallelism)
            .field("active_shift", &self.active_shift())
            .field("items_dispatched", &self.items_dispatched())
            .field("isolation_depth", &self.isolation_depth())
            .finish_non_exhaustive()
    }
}
