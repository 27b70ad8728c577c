// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for shiftwork-runner.

use std::any::Any;

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "item" if `count` is 1, otherwise "items".
    pub(crate) fn items_str(count: usize) -> &'static str {
        if count == 1 { "item" } else { "items" }
    }
}

/// Extracts a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic payload)".to_owned()
    }
}
