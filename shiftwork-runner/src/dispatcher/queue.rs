// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::work_item::{WorkItem, WorkItemKind};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
};
use tracing::debug;

/// The state of a [`WorkItemQueue`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum WorkItemQueueState {
    /// Items may be enqueued but are not handed out.
    Paused = 0,

    /// Items are handed out to workers.
    Running = 1,

    /// The queue is shut down. Dequeueing returns `None` immediately.
    Stopped = 2,
}

impl WorkItemQueueState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Paused,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// The priority tier an item is queued in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Priority {
    /// Drained before anything else. Used for one-time teardown, so that suites finish as soon
    /// as their children have.
    High,

    /// Everything else.
    Normal,
}

impl Priority {
    /// Returns the tier an item is queued in.
    pub fn of(item: &WorkItem) -> Self {
        match item.kind() {
            WorkItemKind::OneTimeTearDown => Self::High,
            WorkItemKind::Simple | WorkItemKind::Composite => Self::Normal,
        }
    }
}

#[derive(Default)]
struct Tiers {
    high: VecDeque<Arc<WorkItem>>,
    normal: VecDeque<Arc<WorkItem>>,
}

impl Tiers {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    fn pop(&mut self) -> Option<Arc<WorkItem>> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

struct QueueInner {
    tiers: Tiers,
    saved: Vec<Tiers>,
}

/// A two-tier FIFO of work items, served to workers.
pub struct WorkItemQueue {
    name: &'static str,
    inner: Mutex<QueueInner>,
    available: Condvar,
    // Only changed while `inner` is locked, so that waiters never miss a transition.
    state: AtomicU8,
    items_processed: AtomicUsize,
    max_count: AtomicUsize,
}

impl WorkItemQueue {
    /// Creates a new, paused queue.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(QueueInner {
                tiers: Tiers::default(),
                saved: Vec::new(),
            }),
            available: Condvar::new(),
            state: AtomicU8::new(WorkItemQueueState::Paused as u8),
            items_processed: AtomicUsize::new(0),
            max_count: AtomicUsize::new(0),
        }
    }

    /// The name of this queue.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The current state.
    pub fn state(&self) -> WorkItemQueueState {
        WorkItemQueueState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The number of items pending in the current storage. Saved items are not counted.
    pub fn len(&self) -> usize {
        self.inner.lock().tiers.len()
    }

    /// Returns true if no items are pending in the current storage.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of items handed out so far.
    pub fn items_processed(&self) -> usize {
        self.items_processed.load(Ordering::Relaxed)
    }

    /// The largest number of items that were ever pending at once.
    pub fn max_count(&self) -> usize {
        self.max_count.load(Ordering::Relaxed)
    }

    /// Adds an item to the tier matching its [`Priority`].
    pub fn enqueue(&self, item: Arc<WorkItem>) {
        let mut inner = self.inner.lock();
        match Priority::of(&item) {
            Priority::High => inner.tiers.high.push_back(item),
            Priority::Normal => inner.tiers.normal.push_back(item),
        }
        self.max_count
            .fetch_max(inner.tiers.len(), Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Blocks until an item is available in a running queue, or the queue is stopped.
    ///
    /// `on_taken` runs while the queue is still locked, so that any observer that sees this
    /// queue empty also sees the consequences of `on_taken`.
    pub fn dequeue(&self, on_taken: impl FnOnce()) -> Option<Arc<WorkItem>> {
        let mut inner = self.inner.lock();
        loop {
            match self.state() {
                WorkItemQueueState::Stopped => return None,
                WorkItemQueueState::Running => {
                    if let Some(item) = inner.tiers.pop() {
                        on_taken();
                        self.items_processed.fetch_add(1, Ordering::Relaxed);
                        return Some(item);
                    }
                }
                WorkItemQueueState::Paused => {}
            }
            self.available.wait(&mut inner);
        }
    }

    /// Starts handing out items. A stopped queue stays stopped.
    pub fn start(&self) {
        self.transition(WorkItemQueueState::Running);
    }

    /// Stops handing out items until the next [`Self::start`]. A stopped queue stays stopped.
    pub fn pause(&self) {
        self.transition(WorkItemQueueState::Paused);
    }

    /// Shuts the queue down and wakes every waiting worker.
    pub fn stop(&self) {
        let _inner = self.inner.lock();
        let previous = self
            .state
            .swap(WorkItemQueueState::Stopped as u8, Ordering::AcqRel);
        self.available.notify_all();
        if previous != WorkItemQueueState::Stopped as u8 {
            debug!(
                queue = self.name,
                items_processed = self.items_processed(),
                max_count = self.max_count(),
                "queue stopped",
            );
        }
    }

    fn transition(&self, to: WorkItemQueueState) {
        let _inner = self.inner.lock();
        let from = self.state();
        if from == WorkItemQueueState::Stopped {
            return;
        }
        self.state.store(to as u8, Ordering::Release);
        self.available.notify_all();
        if from != to {
            debug!(queue = self.name, ?from, ?to, "queue state changed");
        }
    }

    /// Sets the pending items aside and substitutes empty storage.
    pub fn save(&self) {
        let mut inner = self.inner.lock();
        let pending = std::mem::take(&mut inner.tiers);
        debug!(
            queue = self.name,
            pending = pending.len(),
            depth = inner.saved.len() + 1,
            "queue saved",
        );
        inner.saved.push(pending);
    }

    /// Brings back the items set aside by the matching [`Self::save`]. Anything pending in the
    /// substitute storage goes after them.
    pub fn restore(&self) {
        let mut inner = self.inner.lock();
        let Some(mut saved) = inner.saved.pop() else {
            return;
        };
        let leftover = std::mem::take(&mut inner.tiers);
        saved.high.extend(leftover.high);
        saved.normal.extend(leftover.normal);
        inner.tiers = saved;
        debug!(
            queue = self.name,
            pending = inner.tiers.len(),
            depth = inner.saved.len(),
            "queue restored",
        );
        if inner.tiers.len() > 0 {
            self.available.notify_all();
        }
    }

    /// The number of saved generations.
    pub fn save_depth(&self) -> usize {
        self.inner.lock().saved.len()
    }

    /// Drops every pending and saved item.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.tiers = Tiers::default();
        inner.saved.clear();
    }
}

impl fmt::Debug for WorkItemQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItemQueue")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("len", &self.len())
            .field("items_processed", &self.items_processed())
            .finish()
    }
}
