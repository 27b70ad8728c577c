// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestNode;
use std::collections::BTreeSet;

/// Selects which nodes of a tree take part in a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TestFilter {
    /// Every node is selected.
    #[default]
    All,

    /// Nodes are selected by full name. Selecting a suite selects everything beneath it.
    FullNames(BTreeSet<String>),
}

impl TestFilter {
    /// Creates a filter from a list of full names.
    pub fn full_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FullNames(names.into_iter().map(Into::into).collect())
    }

    /// Returns true if the node takes part in the run: it, one of its ancestors or one of its
    /// descendants is selected.
    pub fn pass(&self, node: &TestNode) -> bool {
        match self {
            Self::All => true,
            Self::FullNames(names) => names.iter().any(|name| {
                let full_name = node.full_name();
                is_same_or_descendant(full_name, name) || is_same_or_descendant(name, full_name)
            }),
        }
    }

    /// Returns true if the node itself or one of its descendants was selected by name.
    ///
    /// Being beneath a selected suite is not an explicit match.
    pub fn is_explicit_match(&self, node: &TestNode) -> bool {
        match self {
            Self::All => false,
            Self::FullNames(names) => names
                .iter()
                .any(|name| is_same_or_descendant(name, node.full_name())),
        }
    }
}

// "a.b.c" is a descendant of "a.b", but "a.bc" is not.
fn is_same_or_descendant(name: &str, ancestor: &str) -> bool {
    match name.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
