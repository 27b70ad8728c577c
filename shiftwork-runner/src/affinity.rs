// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thread affinity.
//!
//! Some tests must run on a thread configured a particular way. The configuration is modelled as
//! an opaque [`ThreadAffinity`] tag: every thread the scheduler owns records the tag it was set up
//! with, and a work item whose resolved affinity differs from the current thread's runs on a
//! freshly spawned thread instead.

use bitflags::bitflags;
use std::{cell::Cell, fmt, io, thread};
use tracing::debug;

/// A thread-affinity requirement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ThreadAffinity {
    /// The item must run on a single-threaded-affinity thread.
    SingleThreaded,

    /// The item must run on a multi-threaded-affinity thread. This is what every thread starts
    /// with.
    MultiThreaded,
}

impl fmt::Display for ThreadAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleThreaded => f.write_str("single-threaded"),
            Self::MultiThreaded => f.write_str("multi-threaded"),
        }
    }
}

thread_local! {
    static CURRENT_AFFINITY: Cell<ThreadAffinity> = const { Cell::new(ThreadAffinity::MultiThreaded) };
}

/// Returns the affinity of the current thread.
pub fn current_affinity() -> ThreadAffinity {
    CURRENT_AFFINITY.with(Cell::get)
}

/// Sets the affinity of the current thread.
///
/// Called by workers and own threads before they run anything.
pub(crate) fn set_current_affinity(affinity: ThreadAffinity) {
    CURRENT_AFFINITY.with(|current| current.set(affinity));
}

bitflags! {
    /// Why a work item needs a thread of its own.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct OwnThreadReason: u8 {
        /// The node asked for a dedicated thread.
        const REQUIRES_THREAD = 1;
        /// The node's affinity differs from the current thread's.
        const DIFFERENT_AFFINITY = 2;
    }
}

impl OwnThreadReason {
    /// Computes the reasons for running on an own thread, given the node's requirements and the
    /// current thread.
    pub fn compute(requires_thread: bool, target: Option<ThreadAffinity>) -> Self {
        let mut reason = Self::empty();
        if requires_thread {
            reason |= Self::REQUIRES_THREAD;
        }
        if target.is_some_and(|target| target != current_affinity()) {
            reason |= Self::DIFFERENT_AFFINITY;
        }
        reason
    }
}

impl fmt::Display for OwnThreadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, flag) in [
            ("RequiresThread", Self::REQUIRES_THREAD),
            ("DifferentAffinity", Self::DIFFERENT_AFFINITY),
        ] {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Runs `f` on a fresh scoped thread with the given affinity and blocks until it finishes.
///
/// A panic in `f` is resumed on the calling thread. The only error returned is a failure to spawn
/// the thread.
pub(crate) fn run_on_own_thread<T, F>(name: &str, affinity: ThreadAffinity, f: F) -> io::Result<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    debug!(thread = name, %affinity, "running on own thread");
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn_scoped(scope, move || {
                set_current_affinity(affinity);
                f()
            })?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}
