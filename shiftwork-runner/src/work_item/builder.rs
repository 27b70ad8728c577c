// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Shape, WorkItem, composite::CompositeState};
use crate::{affinity::ThreadAffinity, context::ExecutionContext, tree::TestNode};
use std::sync::Arc;

impl WorkItem {
    /// Creates a work item for `test`, running in `context`.
    ///
    /// Suites become composite items and everything else becomes a leaf. The item's thread
    /// affinity is the test's declared affinity, falling back to `inherited` (the affinity of the
    /// enclosing item). Children of a suite are created lazily, when the suite runs.
    pub fn create(
        test: Arc<TestNode>,
        context: ExecutionContext,
        inherited: Option<ThreadAffinity>,
    ) -> Arc<WorkItem> {
        let affinity = test.properties().thread_affinity.or(inherited);
        let shape = if test.is_suite() {
            Shape::Composite(CompositeState::new())
        } else {
            Shape::Simple
        };
        Arc::new(WorkItem::new(test, context, shape, affinity))
    }

    /// Creates the work item for a child test of this item.
    pub(crate) fn create_child(&self, child: &Arc<TestNode>) -> Arc<WorkItem> {
        WorkItem::create(child.clone(), self.context.child(child.clone()), self.affinity)
    }
}

/// Sorts children for dispatch: children with an explicit order come first, ascending, and the
/// rest keep their declaration order.
pub(crate) fn sort_for_dispatch(children: &mut [Arc<WorkItem>]) {
    children.sort_by_key(|child| match child.test().properties().order {
        Some(order) => (0, order),
        None => (1, 0),
    });
}
