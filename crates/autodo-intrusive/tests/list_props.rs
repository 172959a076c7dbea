// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Property tests for the intrusive list against a `VecDeque` model.

use std::collections::VecDeque;

use autodo_intrusive::{List, ListLink};
use proptest::prelude::*;

const SLOTS: usize = 16;

#[derive(Debug, Clone)]
enum Op {
    PushFront(usize),
    PushBack(usize),
    PopFront,
    PopBack,
    Erase(usize),
    InsertAfterHead(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SLOTS).prop_map(Op::PushFront),
        (0..SLOTS).prop_map(Op::PushBack),
        Just(Op::PopFront),
        Just(Op::PopBack),
        (0..SLOTS).prop_map(Op::Erase),
        (0..SLOTS).prop_map(Op::InsertAfterHead),
    ]
}

fn forward(list: &List, nodes: &Vec<ListLink>) -> Vec<usize> {
    list.iter(nodes).collect()
}

fn backward(list: &List, nodes: &Vec<ListLink>) -> Vec<usize> {
    let mut out = Vec::new();
    let mut cur = list.back();
    while let Some(id) = cur {
        out.push(id);
        cur = list.prev(nodes, id);
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn list_matches_deque_model(ops in proptest::collection::vec(arb_op(), 0..64)) {
        let mut nodes = vec![ListLink::new(); SLOTS];
        let mut list = List::new();
        let mut model: VecDeque<usize> = VecDeque::new();

        for op in ops {
            match op {
                Op::PushFront(id) if !nodes[id].is_linked() => {
                    list.push_front(&mut nodes, id);
                    model.push_front(id);
                }
                Op::PushBack(id) if !nodes[id].is_linked() => {
                    list.push_back(&mut nodes, id);
                    model.push_back(id);
                }
                Op::InsertAfterHead(id) if !nodes[id].is_linked() => {
                    match list.begin() {
                        Some(head) => {
                            list.insert_after(&mut nodes, head, id);
                            model.insert(1, id);
                        }
                        None => {
                            list.push_back(&mut nodes, id);
                            model.push_back(id);
                        }
                    }
                }
                Op::PopFront => {
                    prop_assert_eq!(list.pop_front(&mut nodes), model.pop_front());
                }
                Op::PopBack => {
                    prop_assert_eq!(list.pop_back(&mut nodes), model.pop_back());
                }
                Op::Erase(id) if nodes[id].is_linked() => {
                    list.erase(&mut nodes, id);
                    model.retain(|&m| m != id);
                }
                _ => {}
            }

            prop_assert_eq!(list.len(), model.len());
            prop_assert_eq!(list.is_empty(), model.is_empty());
            let expected: Vec<usize> = model.iter().copied().collect();
            prop_assert_eq!(forward(&list, &nodes), expected.clone());
            let mut reversed = expected;
            reversed.reverse();
            prop_assert_eq!(backward(&list, &nodes), reversed);
        }
    }

    #[test]
    fn migrate_appends_in_order(
        left in proptest::collection::btree_set(0..SLOTS, 0..SLOTS / 2),
        right in proptest::collection::btree_set(0..SLOTS, 0..SLOTS / 2),
    ) {
        let mut nodes = vec![ListLink::new(); SLOTS];
        let mut dst = List::new();
        let mut src = List::new();
        let mut expected = Vec::new();
        for &id in &left {
            dst.push_back(&mut nodes, id);
            expected.push(id);
        }
        for &id in right.difference(&left) {
            src.push_back(&mut nodes, id);
            expected.push(id);
        }

        dst.migrate(&mut nodes, &mut src);

        prop_assert!(src.is_empty());
        prop_assert_eq!(src.begin(), None);
        prop_assert_eq!(dst.len(), expected.len());
        prop_assert_eq!(forward(&dst, &nodes), expected.clone());

        // Every spliced node now belongs to `dst`.
        for &id in expected.iter().rev() {
            dst.erase(&mut nodes, id);
        }
        prop_assert!(dst.is_empty());
    }
}
