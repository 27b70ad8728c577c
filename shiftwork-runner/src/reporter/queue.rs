// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{CancelReason, TestListener};
use crate::{result::TestResult, tree::TestNode};
use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A listener notification waiting in an [`EventQueue`].
#[derive(Clone, Debug)]
pub enum ListenerEvent {
    /// A test or suite started.
    TestStarted(Arc<TestNode>),

    /// A test or suite finished.
    TestFinished(Arc<TestResult>),

    /// A test wrote output.
    TestOutput {
        /// The test that wrote the output.
        test: Arc<TestNode>,
        /// The output.
        text: String,
    },

    /// A test sent a message.
    Message {
        /// The test that sent the message.
        test: Arc<TestNode>,
        /// The message.
        message: String,
    },

    /// A suite's one-time setup is about to run.
    OneTimeSetUpStarted(Arc<TestNode>),

    /// A suite's one-time setup finished.
    OneTimeSetUpFinished(Arc<TestNode>),

    /// A suite's one-time teardown is about to run.
    OneTimeTearDownStarted(Arc<TestNode>),

    /// A suite's one-time teardown finished.
    OneTimeTearDownFinished(Arc<TestNode>),

    /// Cancellation of the run was requested.
    ///
    /// This is not a listener notification: it is how a cancel request reaches the runner's
    /// event handler in order with the other events.
    BeginCancel(CancelReason),
}

impl ListenerEvent {
    /// Forwards this event to a listener. Returns false for [`ListenerEvent::BeginCancel`], which
    /// listeners have no method for.
    pub fn deliver(&self, listener: &dyn TestListener) -> bool {
        match self {
            Self::TestStarted(test) => listener.test_started(test),
            Self::TestFinished(result) => listener.test_finished(result),
            Self::TestOutput { test, text } => listener.test_output(test, text),
            Self::Message { test, message } => listener.send_message(test, message),
            Self::OneTimeSetUpStarted(suite) => listener.one_time_setup_started(suite),
            Self::OneTimeSetUpFinished(suite) => listener.one_time_setup_finished(suite),
            Self::OneTimeTearDownStarted(suite) => listener.one_time_teardown_started(suite),
            Self::OneTimeTearDownFinished(suite) => listener.one_time_teardown_finished(suite),
            Self::BeginCancel(_) => return false,
        }
        true
    }
}

/// A thread-safe FIFO of listener events.
///
/// Any number of producers may enqueue. A single consumer (the [`EventPump`](super::EventPump))
/// dequeues, blocking while the queue is empty until [`stop`](Self::stop) is called. Once stopped,
/// blocking dequeues still drain whatever was enqueued before returning `None`.
#[derive(Debug)]
pub struct EventQueue {
    sender: Sender<ListenerEvent>,
    receiver: Receiver<ListenerEvent>,
    // Dropped on stop, which disconnects `stop_receiver` and wakes blocked consumers.
    stop_sender: Mutex<Option<Sender<()>>>,
    stop_receiver: Receiver<()>,
    stopped: AtomicBool,
}

impl EventQueue {
    /// Creates a new, empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let (stop_sender, stop_receiver) = crossbeam_channel::bounded(0);
        Self {
            sender,
            receiver,
            stop_sender: Mutex::new(Some(stop_sender)),
            stop_receiver,
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns the number of events waiting in the queue.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Adds an event to the back of the queue.
    pub fn enqueue(&self, event: ListenerEvent) {
        // The queue owns a receiver, so the channel is never disconnected.
        let _ = self.sender.send(event);
    }

    /// Removes the event at the front of the queue.
    ///
    /// If `blocking` is true and the queue is empty, waits until an event arrives or the queue is
    /// stopped. Returns `None` if the queue is empty and either `blocking` is false or the queue
    /// has been stopped.
    pub fn dequeue(&self, blocking: bool) -> Option<ListenerEvent> {
        if !blocking || self.is_stopped() {
            return self.receiver.try_recv().ok();
        }
        select! {
            recv(self.receiver) -> event => event.ok(),
            recv(self.stop_receiver) -> _ => self.receiver.try_recv().ok(),
        }
    }

    /// Stops the queue, waking any blocked consumer. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.stop_sender.lock().take();
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`TestListener`] that places every notification on an [`EventQueue`].
#[derive(Clone, Debug)]
pub struct QueuingEventListener {
    queue: Arc<EventQueue>,
}

impl QueuingEventListener {
    /// Creates a new listener enqueuing onto `queue`.
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    /// Returns the underlying queue.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}

impl TestListener for QueuingEventListener {
    fn test_started(&self, test: &Arc<TestNode>) {
        self.queue.enqueue(ListenerEvent::TestStarted(test.clone()));
    }

    fn test_finished(&self, result: &Arc<TestResult>) {
        self.queue
            .enqueue(ListenerEvent::TestFinished(result.clone()));
    }

    fn test_output(&self, test: &Arc<TestNode>, text: &str) {
        self.queue.enqueue(ListenerEvent::TestOutput {
            test: test.clone(),
            text: text.to_owned(),
        });
    }

    fn send_message(&self, test: &Arc<TestNode>, message: &str) {
        self.queue.enqueue(ListenerEvent::Message {
            test: test.clone(),
            message: message.to_owned(),
        });
    }

    fn one_time_setup_started(&self, suite: &Arc<TestNode>) {
        self.queue
            .enqueue(ListenerEvent::OneTimeSetUpStarted(suite.clone()));
    }

    fn one_time_setup_finished(&self, suite: &Arc<TestNode>) {
        self.queue
            .enqueue(ListenerEvent::OneTimeSetUpFinished(suite.clone()));
    }

    fn one_time_teardown_started(&self, suite: &Arc<TestNode>) {
        self.queue
            .enqueue(ListenerEvent::OneTimeTearDownStarted(suite.clone()));
    }

    fn one_time_teardown_finished(&self, suite: &Arc<TestNode>) {
        self.queue
            .enqueue(ListenerEvent::OneTimeTearDownFinished(suite.clone()));
    }
}
