// Copyright (c) The shiftwork Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Property tests for dispatch order and queue save/restore.

use crate::fixtures::*;
use proptest::prelude::*;
use shiftwork_runner::{
    config::RunnerConfig,
    context::{ExecutionContext, RunSettings},
    dispatcher::{MainThreadDispatcher, WorkItemQueue},
    reporter::NullListener,
    tree::{TestNode, TestNodeBuilder},
    work_item::WorkItem,
};
use std::sync::Arc;

fn main_thread() -> RunnerConfig {
    RunnerConfig {
        run_on_main_thread: true,
        ..RunnerConfig::default()
    }
}

fn items(tree: &Arc<TestNode>) -> Vec<Arc<WorkItem>> {
    let cx = ExecutionContext::root(
        tree.clone(),
        Arc::new(NullListener),
        Arc::new(MainThreadDispatcher::new()),
        RunSettings::default(),
    );
    tree.children()
        .iter()
        .map(|node| WorkItem::create(node.clone(), cx.child(node.clone()), None))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Ordered children start first, by ascending order, ties and unordered children keeping
    // declaration order.
    #[test]
    fn children_start_in_dispatch_order(orders in prop::collection::vec(prop::option::of(-3i32..3), 1..8)) {
        test_init();

        let tree = TestNodeBuilder::fixture("F")
            .children(orders.iter().enumerate().map(|(i, order)| {
                let case = TestNodeBuilder::case(format!("c{i}"), pass());
                match order {
                    Some(order) => case.order(*order),
                    None => case,
                }
            }))
            .build();

        let mut expected: Vec<_> = orders.iter().enumerate().collect();
        expected.sort_by_key(|(_, order)| match order {
            Some(order) => (0, *order),
            None => (1, 0),
        });
        let expected: Vec<_> = std::iter::once("F".to_owned())
            .chain(expected.into_iter().map(|(i, _)| format!("F.c{i}")))
            .collect();

        let (_, events) = run(&tree, main_thread()).map_err(|err| TestCaseError::fail(format!("{err:?}")))?;
        prop_assert_eq!(started(&events), expected);
    }

    // Whatever happens on the replacement storage, restore yields exactly the saved items, in
    // order, ahead of anything left over.
    #[test]
    fn restore_yields_saved_items_first(
        saved in 0usize..5,
        during in 0usize..5,
        taken in 0usize..5,
    ) {
        let taken = taken.min(during);
        let tree = TestNodeBuilder::grouping("Q")
            .children((0..saved + during).map(|i| TestNodeBuilder::case(format!("i{i}"), pass())))
            .build();
        let mut items = items(&tree).into_iter();

        let queue = WorkItemQueue::new("prop");
        queue.start();
        for item in items.by_ref().take(saved) {
            queue.enqueue(item);
        }
        queue.save();
        for item in items {
            queue.enqueue(item);
        }
        for _ in 0..taken {
            prop_assert!(queue.dequeue(|| ()).is_some());
        }
        queue.restore();

        let yielded: Vec<_> = (0..queue.len())
            .filter_map(|_| queue.dequeue(|| ()))
            .map(|item| item.name().to_owned())
            .collect();
        let expected: Vec<_> = (0..saved)
            .chain(saved + taken..saved + during)
            .map(|i| format!("i{i}"))
            .collect();
        prop_assert_eq!(yielded, expected);
        prop_assert_eq!(queue.save_depth(), 0);
    }
}
