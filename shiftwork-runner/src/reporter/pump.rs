// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{EventQueue, ListenerEvent, TestListener};
use crate::helpers::panic_message;
use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, Scope, ScopedJoinHandle},
};
use tracing::{trace, warn};

/// The state of an [`EventPump`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum EventPumpState {
    /// The pump thread is not running.
    Stopped = 0,

    /// The pump thread is forwarding events.
    Pumping = 1,

    /// A stop was requested. The pump thread is draining what is left in the queue.
    Stopping = 2,
}

impl EventPumpState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Pumping,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Something an [`EventPump`] forwards events to.
pub trait EventSink {
    /// Handles one event.
    fn handle(&mut self, event: ListenerEvent);
}

impl<F> EventSink for F
where
    F: FnMut(ListenerEvent),
{
    fn handle(&mut self, event: ListenerEvent) {
        self(event)
    }
}

/// An [`EventSink`] that forwards listener notifications to a [`TestListener`].
///
/// [`ListenerEvent::BeginCancel`] has no listener counterpart and is dropped.
#[derive(Debug)]
pub struct ListenerSink<L>(pub L);

impl<L: TestListener> EventSink for ListenerSink<L> {
    fn handle(&mut self, event: ListenerEvent) {
        event.deliver(&self.0);
    }
}

/// Forwards events from an [`EventQueue`] to a sink on a dedicated thread.
///
/// A panic in the sink is caught and logged. The pump keeps draining the queue afterwards but no
/// longer calls the sink; the first panic message is returned by [`EventPumpHandle::stop`].
pub struct EventPump<S> {
    queue: Arc<EventQueue>,
    sink: S,
}

impl<S> EventPump<S>
where
    S: EventSink + Send,
{
    /// Creates a pump that forwards every event in `queue` to `sink`.
    pub fn new(queue: Arc<EventQueue>, sink: S) -> Self {
        Self { queue, sink }
    }

    /// Starts the pump thread within `scope`.
    pub fn start<'scope, 'env>(
        self,
        scope: &'scope Scope<'scope, 'env>,
    ) -> io::Result<EventPumpHandle<'scope>>
    where
        S: 'scope,
    {
        let state = Arc::new(AtomicU8::new(EventPumpState::Pumping as u8));
        let Self { queue, mut sink } = self;

        let join_handle = {
            let queue = queue.clone();
            let state = state.clone();
            thread::Builder::new()
                .name("shiftwork-event-pump".to_owned())
                .spawn_scoped(scope, move || {
                    let mut panicked: Option<String> = None;
                    let mut forwarded = 0_usize;
                    while let Some(event) = queue.dequeue(true) {
                        if panicked.is_some() {
                            continue;
                        }
                        match catch_unwind(AssertUnwindSafe(|| sink.handle(event))) {
                            Ok(()) => forwarded += 1,
                            Err(payload) => {
                                let message = panic_message(&*payload);
                                warn!(%message, "event sink panicked, dropping further events");
                                panicked = Some(message);
                            }
                        }
                    }
                    trace!(forwarded, "event pump exiting");
                    state.store(EventPumpState::Stopped as u8, Ordering::Release);
                    panicked
                })?
        };

        Ok(EventPumpHandle {
            queue,
            state,
            join_handle,
        })
    }
}

/// A running [`EventPump`].
pub struct EventPumpHandle<'scope> {
    queue: Arc<EventQueue>,
    state: Arc<AtomicU8>,
    join_handle: ScopedJoinHandle<'scope, Option<String>>,
}

impl EventPumpHandle<'_> {
    /// Returns the current state of the pump.
    pub fn state(&self) -> EventPumpState {
        EventPumpState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stops the pump after it has drained the queue and waits for the thread to exit.
    ///
    /// Returns the message of the first panic raised by the sink, if any.
    pub fn stop(self) -> Option<String> {
        // Only move Pumping -> Stopping: the thread may already have stored Stopped.
        let _ = self.state.compare_exchange(
            EventPumpState::Pumping as u8,
            EventPumpState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.queue.stop();
        match self.join_handle.join() {
            Ok(panicked) => panicked,
            // The pump body catches sink panics, so this is unreachable in practice.
            Err(payload) => Some(panic_message(&*payload)),
        }
    }
}
