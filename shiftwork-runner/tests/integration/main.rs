// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod cancellation;
mod fixtures;
mod ordering;
mod parallelism;
mod scenarios;
