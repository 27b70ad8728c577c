// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test tree consumed by the scheduler.
//!
//! A tree is produced by discovery and is read-only from the scheduler's point of view. Each
//! [`TestNode`] describes either a leaf test case or a suite, carries a [`RunState`] and a bag of
//! [`TestProperties`], and (for suites) owns its children.

mod filter;

pub use filter::*;

use crate::{affinity::ThreadAffinity, command::TestCommand};
use bitflags::bitflags;
use debug_ignore::DebugIgnore;
use smol_str::SmolStr;
use std::{fmt, sync::Arc};

/// A unique identifier for a node within one test tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TestId(u64);

impl TestId {
    /// Returns the raw identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a node can be run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum RunState {
    /// The node runs normally.
    #[default]
    Runnable,

    /// The node is skipped.
    Skipped,

    /// The node was marked ignored.
    Ignored,

    /// The node runs only when selected explicitly.
    Explicit,

    /// The node is invalid and cannot be run.
    NotRunnable,
}

/// The kind of a suite.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SuiteKind {
    /// A pure grouping of other suites, with no executable body of its own.
    Grouping,

    /// A fixture: a suite with its own one-time setup and teardown.
    Fixture,

    /// A setup fixture that wraps every suite beneath it.
    SetUpFixture,
}

/// The kind of a test node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TestKind {
    /// A leaf test case.
    Case,

    /// A suite of other nodes.
    Suite(SuiteKind),
}

impl TestKind {
    /// Returns true if this is a suite of any kind.
    pub fn is_suite(self) -> bool {
        matches!(self, Self::Suite(_))
    }
}

bitflags! {
    /// The declared parallel scope of a node.
    ///
    /// The low bits describe the node itself, and the high bits describe what the node's
    /// context allows for its descendants.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct ParallelScope: u32 {
        /// The node itself may run in parallel with others.
        const SELF = 1;
        /// The node must not run in parallel with others.
        const NONE = 2;
        /// The node's descendants may run in parallel with each other.
        const CHILDREN = 256;
        /// Fixtures beneath the node may run in parallel with each other.
        const FIXTURES = 512;

        /// The bits that apply to the node itself.
        const ITEM_MASK = Self::SELF.bits() | Self::NONE.bits();
        /// The bits that apply to the node's context.
        const CONTEXT_MASK = Self::CHILDREN.bits() | Self::FIXTURES.bits();
        /// The node and all its descendants may run in parallel.
        const ALL = Self::SELF.bits() | Self::CHILDREN.bits();
    }
}

/// Properties attached to a node by discovery.
#[derive(Clone, Debug, Default)]
pub struct TestProperties {
    /// The declared parallel scope, if any.
    pub parallel_scope: Option<ParallelScope>,

    /// The declared thread affinity, if any. Descendants inherit it unless they declare their
    /// own.
    pub thread_affinity: Option<ThreadAffinity>,

    /// An explicit ordering key among siblings. Lower keys run first.
    pub order: Option<i32>,

    /// The node requires a dedicated thread.
    pub requires_thread: bool,

    /// Descendants of this node run one at a time, on the same thread as the node.
    pub single_threaded: bool,

    /// Why the node is skipped, ignored, explicit or not runnable.
    pub skip_reason: Option<String>,

    /// Free-form categories.
    pub categories: Vec<SmolStr>,
}

/// A node in the test tree.
#[derive(Debug)]
pub struct TestNode {
    id: TestId,
    name: SmolStr,
    full_name: String,
    kind: TestKind,
    run_state: RunState,
    properties: TestProperties,
    command: Option<DebugIgnore<Arc<dyn TestCommand>>>,
    one_time_setup: DebugIgnore<Vec<Arc<dyn TestCommand>>>,
    one_time_teardown: DebugIgnore<Vec<Arc<dyn TestCommand>>>,
    children: Vec<Arc<TestNode>>,
}

impl TestNode {
    /// Returns this node's identifier.
    pub fn id(&self) -> TestId {
        self.id
    }

    /// Returns the node's own name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dot-joined names of this node and its ancestors.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Returns the kind of this node.
    pub fn kind(&self) -> TestKind {
        self.kind
    }

    /// Returns true if this node is a suite.
    pub fn is_suite(&self) -> bool {
        self.kind.is_suite()
    }

    /// Returns true if this node is a fixture.
    pub fn is_fixture(&self) -> bool {
        self.kind == TestKind::Suite(SuiteKind::Fixture)
    }

    /// Returns true if this node has nothing to execute other than its children.
    pub fn is_grouping(&self) -> bool {
        self.kind == TestKind::Suite(SuiteKind::Grouping)
    }

    /// Returns the run state of this node.
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Returns this node's properties.
    pub fn properties(&self) -> &TestProperties {
        &self.properties
    }

    /// Returns the command that runs this leaf, if any.
    pub fn command(&self) -> Option<&Arc<dyn TestCommand>> {
        self.command.as_deref()
    }

    /// Returns the one-time setup commands for this suite, in execution order.
    pub fn one_time_setup(&self) -> &[Arc<dyn TestCommand>] {
        &self.one_time_setup
    }

    /// Returns the one-time teardown commands for this suite, in declaration order.
    ///
    /// Teardowns run in reverse order.
    pub fn one_time_teardown(&self) -> &[Arc<dyn TestCommand>] {
        &self.one_time_teardown
    }

    /// Returns this node's children.
    pub fn children(&self) -> &[Arc<TestNode>] {
        &self.children
    }

    /// Returns true if this node has children.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Returns the total number of leaf tests at or beneath this node.
    pub fn test_case_count(&self) -> usize {
        match self.kind {
            TestKind::Case => 1,
            TestKind::Suite(_) => self.children.iter().map(|c| c.test_case_count()).sum(),
        }
    }

    /// Iterates over this node and all of its descendants, in pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &TestNode> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev().map(|c| c.as_ref()));
            Some(node)
        })
    }
}

/// Builds a [`TestNode`] tree.
///
/// Identifiers and full names are assigned when [`build`](Self::build) is called, so subtrees can
/// be assembled in any order.
#[derive(Debug)]
pub struct TestNodeBuilder {
    name: SmolStr,
    kind: TestKind,
    run_state: RunState,
    properties: TestProperties,
    command: Option<DebugIgnore<Arc<dyn TestCommand>>>,
    one_time_setup: Vec<DebugIgnore<Arc<dyn TestCommand>>>,
    one_time_teardown: Vec<DebugIgnore<Arc<dyn TestCommand>>>,
    children: Vec<TestNodeBuilder>,
}

impl TestNodeBuilder {
    fn new(name: impl Into<SmolStr>, kind: TestKind) -> Self {
        Self {
            name: name.into(),
            kind,
            run_state: RunState::Runnable,
            properties: TestProperties::default(),
            command: None,
            one_time_setup: Vec::new(),
            one_time_teardown: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates a leaf test case that runs `command`.
    pub fn case(name: impl Into<SmolStr>, command: impl TestCommand + 'static) -> Self {
        let mut builder = Self::new(name, TestKind::Case);
        builder.command = Some(DebugIgnore(Arc::new(command)));
        builder
    }

    /// Creates a suite of the given kind.
    pub fn suite(name: impl Into<SmolStr>, kind: SuiteKind) -> Self {
        Self::new(name, TestKind::Suite(kind))
    }

    /// Creates a fixture.
    pub fn fixture(name: impl Into<SmolStr>) -> Self {
        Self::suite(name, SuiteKind::Fixture)
    }

    /// Creates a grouping suite.
    pub fn grouping(name: impl Into<SmolStr>) -> Self {
        Self::suite(name, SuiteKind::Grouping)
    }

    /// Sets the run state, with an optional reason.
    pub fn run_state(mut self, run_state: RunState, reason: Option<&str>) -> Self {
        self.run_state = run_state;
        self.properties.skip_reason = reason.map(str::to_owned);
        self
    }

    /// Sets the declared parallel scope.
    pub fn parallel_scope(mut self, scope: ParallelScope) -> Self {
        self.properties.parallel_scope = Some(scope);
        self
    }

    /// Sets the declared thread affinity.
    pub fn thread_affinity(mut self, affinity: ThreadAffinity) -> Self {
        self.properties.thread_affinity = Some(affinity);
        self
    }

    /// Sets the explicit ordering key.
    pub fn order(mut self, order: i32) -> Self {
        self.properties.order = Some(order);
        self
    }

    /// Requires the node to run on a dedicated thread.
    pub fn requires_thread(mut self) -> Self {
        self.properties.requires_thread = true;
        self
    }

    /// Marks the node's descendants as single-threaded.
    pub fn single_threaded(mut self) -> Self {
        self.properties.single_threaded = true;
        self
    }

    /// Adds a category.
    pub fn category(mut self, category: impl Into<SmolStr>) -> Self {
        self.properties.categories.push(category.into());
        self
    }

    /// Adds a one-time setup command.
    pub fn one_time_setup(mut self, command: impl TestCommand + 'static) -> Self {
        self.one_time_setup.push(DebugIgnore(Arc::new(command)));
        self
    }

    /// Adds a one-time teardown command.
    pub fn one_time_teardown(mut self, command: impl TestCommand + 'static) -> Self {
        self.one_time_teardown.push(DebugIgnore(Arc::new(command)));
        self
    }

    /// Adds a child node.
    pub fn child(mut self, child: TestNodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    /// Adds several child nodes.
    pub fn children(mut self, children: impl IntoIterator<Item = TestNodeBuilder>) -> Self {
        self.children.extend(children);
        self
    }

    /// Builds the tree, assigning identifiers in pre-order starting from 1.
    pub fn build(self) -> Arc<TestNode> {
        let mut next_id = 1;
        self.build_impl(None, &mut next_id)
    }

    fn build_impl(self, parent_name: Option<&str>, next_id: &mut u64) -> Arc<TestNode> {
        let id = TestId(*next_id);
        *next_id += 1;

        let full_name = match parent_name {
            Some(parent) => format!("{parent}.{}", self.name),
            None => self.name.to_string(),
        };
        let children = self
            .children
            .into_iter()
            .map(|child| child.build_impl(Some(&full_name), next_id))
            .collect();

        Arc::new(TestNode {
            id,
            name: self.name,
            full_name,
            kind: self.kind,
            run_state: self.run_state,
            properties: self.properties,
            command: self.command,
            one_time_setup: DebugIgnore(self.one_time_setup.into_iter().map(|c| c.0).collect()),
            one_time_teardown: DebugIgnore(
                self.one_time_teardown.into_iter().map(|c| c.0).collect(),
            ),
            children,
        })
    }
}
