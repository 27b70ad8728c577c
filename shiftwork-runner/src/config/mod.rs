// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runner configuration.
//!
//! Configuration is layered: the embedded default config, then an optional TOML file, then an
//! optional inline TOML string, then `SHIFTWORK_*` environment variables.

mod runner_config;
mod test_threads;

pub use runner_config::*;
pub use test_threads::*;
