// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestThreads;
use crate::errors::RunnerConfigError;
use config::{
    Case, Config, ConfigBuilder, Environment, File, FileFormat, Map, builder::DefaultState,
};
use serde::Deserialize;
use std::{path::Path, time::Duration};

/// Runner configuration.
///
/// Keys are kebab-case in TOML (`test-threads`). Environment variables use the upper snake-case
/// form with a prefix (`SHIFTWORK_TEST_THREADS`).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// The level of parallelism for the parallel dispatcher.
    pub test_threads: TestThreads,

    /// Execute everything inline on the thread that starts the run.
    pub run_on_main_thread: bool,

    /// Execute everything on a single dedicated thread.
    pub single_threaded: bool,

    /// Request a stop of the run when any test fails.
    pub stop_on_error: bool,

    /// The bounded wait used by forced cancellation.
    #[serde(with = "humantime_serde")]
    pub force_cancel_wait: Duration,

    /// Whether explicit tests run when they are not selected by name.
    pub run_explicit: bool,
}

/// The dispatcher a [`RunnerConfig`] selects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatcherKind {
    /// Every item runs inline on the calling thread.
    MainThread,

    /// Every item runs on one dedicated thread.
    SingleThread,

    /// Items are routed through queues and shifts.
    Parallel {
        /// The number of workers in the parallel shift.
        threads: usize,
    },
}

impl RunnerConfig {
    /// The embedded default configuration.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Environment configuration uses this prefix, plus a _.
    pub const ENVIRONMENT_PREFIX: &'static str = "SHIFTWORK";

    /// Loads configuration from the embedded defaults, an optional TOML file, an optional inline
    /// TOML string and the process environment, in increasing order of precedence.
    pub fn from_sources(
        file: Option<&Path>,
        inline: Option<&str>,
    ) -> Result<Self, RunnerConfigError> {
        Self::read_from_sources(file, inline, None)
    }

    /// Like [`Self::from_sources`], but reads environment overrides from `env` instead of the
    /// process environment.
    pub fn from_sources_with_env(
        file: Option<&Path>,
        inline: Option<&str>,
        env: Map<String, String>,
    ) -> Result<Self, RunnerConfigError> {
        Self::read_from_sources(file, inline, Some(env))
    }

    fn read_from_sources(
        file: Option<&Path>,
        inline: Option<&str>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, RunnerConfigError> {
        let mut builder = Self::make_default_config();
        let mut source_desc = String::from("default config");

        if let Some(file) = file {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml));
            source_desc = format!("{source_desc}, {}", file.display());
        }
        if let Some(inline) = inline {
            builder = builder.add_source(File::from_str(inline, FileFormat::Toml));
            source_desc.push_str(", inline config");
        }
        // A `None` source reads the process environment.
        builder = builder.add_source(
            Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .convert_case(Case::Kebab)
                .source(env),
        );
        source_desc.push_str(", environment");

        builder
            .build()
            .and_then(|config| config.try_deserialize::<RunnerConfig>())
            .map_err(|err| RunnerConfigError::new(source_desc, err))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// Returns the dispatcher this configuration selects.
    pub fn dispatcher_kind(&self) -> DispatcherKind {
        if self.run_on_main_thread {
            return DispatcherKind::MainThread;
        }
        let threads = self.test_threads.compute();
        if self.single_threaded || threads == 0 {
            DispatcherKind::SingleThread
        } else {
            DispatcherKind::Parallel { threads }
        }
    }

    /// Returns the effective level of parallelism: the number of parallel workers, or 0 when
    /// a non-parallel dispatcher is selected.
    pub fn level_of_parallelism(&self) -> usize {
        match self.dispatcher_kind() {
            DispatcherKind::MainThread | DispatcherKind::SingleThread => 0,
            DispatcherKind::Parallel { threads } => threads,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            test_threads: TestThreads::NumCpus,
            run_on_main_thread: false,
            single_threaded: false,
            stop_on_error: false,
            force_cancel_wait: Duration::from_secs(5),
            run_explicit: false,
        }
    }
}
