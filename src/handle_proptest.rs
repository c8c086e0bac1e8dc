#![cfg(test)]

// Property tests kept inside the crate so the arena statistics can be
// checked against a model without extra feature gates.

use crate::control_block::live_blocks;
use crate::{SharedHandle, WeakHandle};
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

// Value that records its block index in a shared log when dropped.
struct Tracked {
    block: usize,
    log: Rc<RefCell<Vec<usize>>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.log.borrow_mut().push(self.block);
    }
}

#[derive(Clone, Debug)]
enum Op {
    New,
    CloneShared(usize),
    DropShared(usize),
    TakeShared(usize),
    Swap(usize, usize),
    Reset(usize),
    AssignShared(usize, usize),
    Downgrade(usize),
    CloneWeak(usize),
    DropWeak(usize),
    Upgrade(usize),
    Lock(usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let idx = 0usize..16;
    let op = prop_oneof![
        Just(Op::New),
        idx.clone().prop_map(Op::CloneShared),
        idx.clone().prop_map(Op::DropShared),
        idx.clone().prop_map(Op::TakeShared),
        (idx.clone(), idx.clone()).prop_map(|(a, b)| Op::Swap(a, b)),
        idx.clone().prop_map(Op::Reset),
        (idx.clone(), idx.clone()).prop_map(|(a, b)| Op::AssignShared(a, b)),
        idx.clone().prop_map(Op::Downgrade),
        idx.clone().prop_map(Op::CloneWeak),
        idx.clone().prop_map(Op::DropWeak),
        idx.clone().prop_map(Op::Upgrade),
        idx.prop_map(Op::Lock),
    ];
    proptest::collection::vec(op, 1..80)
}

#[derive(Default, Debug)]
struct ModelBlock {
    strong: usize,
    weak: usize,
    has_value: bool,
}

#[derive(Default)]
struct Model {
    blocks: Vec<ModelBlock>,
}

impl Model {
    fn fresh(&mut self, has_value: bool) -> usize {
        self.blocks.push(ModelBlock {
            strong: 1,
            weak: 0,
            has_value,
        });
        self.blocks.len() - 1
    }

    fn live(&self) -> usize {
        self.blocks.iter().filter(|b| b.strong + b.weak > 0).count()
    }

    fn dead_values(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.has_value && b.strong == 0)
            .map(|(i, _)| i)
            .collect();
        v.sort_unstable();
        v
    }
}

// Property: counts, value drops and block frees follow the counting protocol.
// Invariants exercised across random operation sequences:
// - strong/weak counts equal the number of live handles of each kind per block.
// - Each value is dropped exactly once, exactly when its block's strong count hits 0.
// - The arena holds exactly the blocks with strong + weak > 0.
// - Expired weak handles never upgrade; `lock` on them allocates a new block.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_counting_protocol(ops in arb_ops()) {
        let base = live_blocks();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut model = Model::default();
        let mut shared: Vec<(SharedHandle<Tracked>, Option<usize>)> = Vec::new();
        let mut weak: Vec<(WeakHandle<Tracked>, Option<usize>)> = Vec::new();

        let make = |model: &mut Model, log: &Rc<RefCell<Vec<usize>>>| {
            let b = model.fresh(true);
            (SharedHandle::new(Tracked { block: b, log: log.clone() }), Some(b))
        };

        for op in ops {
            match op {
                Op::New => shared.push(make(&mut model, &log)),
                Op::CloneShared(i) if !shared.is_empty() => {
                    let i = i % shared.len();
                    let (h, b) = &shared[i];
                    if let Some(b) = *b { model.blocks[b].strong += 1; }
                    let c = (h.clone(), *b);
                    shared.push(c);
                }
                Op::DropShared(i) if !shared.is_empty() => {
                    let i = i % shared.len();
                    let (h, b) = shared.swap_remove(i);
                    if let Some(b) = b { model.blocks[b].strong -= 1; }
                    drop(h);
                }
                Op::TakeShared(i) if !shared.is_empty() => {
                    let i = i % shared.len();
                    let moved = shared[i].0.take();
                    let b = shared[i].1.take();
                    prop_assert!(shared[i].0.get().is_none());
                    prop_assert_eq!(shared[i].0.strong_count(), 0);
                    shared.push((moved, b));
                }
                Op::Swap(i, j) if !shared.is_empty() => {
                    let (i, j) = (i % shared.len(), j % shared.len());
                    if i != j {
                        let (lo, hi) = (i.min(j), i.max(j));
                        let (left, right) = shared.split_at_mut(hi);
                        left[lo].0.swap(&mut right[0].0);
                        core::mem::swap(&mut left[lo].1, &mut right[0].1);
                    }
                }
                Op::Reset(i) if !shared.is_empty() => {
                    let i = i % shared.len();
                    if let Some(b) = shared[i].1 { model.blocks[b].strong -= 1; }
                    let nb = model.fresh(true);
                    shared[i].0.reset(Tracked { block: nb, log: log.clone() });
                    shared[i].1 = Some(nb);
                }
                Op::AssignShared(i, j) if !shared.is_empty() => {
                    let (i, j) = (i % shared.len(), j % shared.len());
                    let source = shared[j].0.clone();
                    let sb = shared[j].1;
                    if shared[i].1 != sb {
                        if let Some(b) = shared[i].1 { model.blocks[b].strong -= 1; }
                        if let Some(b) = sb { model.blocks[b].strong += 1; }
                    }
                    shared[i].0.clone_from(&source);
                    shared[i].1 = sb;
                }
                Op::Downgrade(i) if !shared.is_empty() => {
                    let i = i % shared.len();
                    let b = shared[i].1;
                    if let Some(b) = b { model.blocks[b].weak += 1; }
                    let w = shared[i].0.downgrade();
                    weak.push((w, b));
                }
                Op::CloneWeak(i) if !weak.is_empty() => {
                    let i = i % weak.len();
                    let b = weak[i].1;
                    if let Some(b) = b { model.blocks[b].weak += 1; }
                    let w = weak[i].0.clone();
                    weak.push((w, b));
                }
                Op::DropWeak(i) if !weak.is_empty() => {
                    let i = i % weak.len();
                    let (w, b) = weak.swap_remove(i);
                    if let Some(b) = b { model.blocks[b].weak -= 1; }
                    drop(w);
                }
                Op::Upgrade(i) if !weak.is_empty() => {
                    let i = i % weak.len();
                    let b = weak[i].1;
                    let alive = b.map_or(false, |b| model.blocks[b].strong > 0);
                    let up = weak[i].0.upgrade();
                    prop_assert_eq!(up.is_some(), alive);
                    if let (Some(h), Some(b)) = (up, b) {
                        model.blocks[b].strong += 1;
                        prop_assert_eq!(h.get().map(|t| t.block), Some(b));
                        shared.push((h, Some(b)));
                    }
                }
                Op::Lock(i) if !weak.is_empty() => {
                    let i = i % weak.len();
                    let b = weak[i].1;
                    let alive = b.map_or(false, |b| model.blocks[b].strong > 0);
                    prop_assert_eq!(weak[i].0.is_expired(), !alive);
                    let h = weak[i].0.lock();
                    match b {
                        Some(b) if alive => {
                            model.blocks[b].strong += 1;
                            shared.push((h, Some(b)));
                        }
                        _ => {
                            prop_assert!(h.get().is_none());
                            let nb = model.fresh(false);
                            shared.push((h, Some(nb)));
                        }
                    }
                }
                _ => {}
            }

            // Invariants after each step
            for (h, b) in &shared {
                match b {
                    Some(b) => {
                        let m = &model.blocks[*b];
                        prop_assert_eq!(h.strong_count(), m.strong);
                        prop_assert_eq!(h.weak_count(), m.weak);
                        prop_assert_eq!(h.get().is_some(), m.has_value);
                    }
                    None => prop_assert_eq!(h.strong_count(), 0),
                }
            }
            for (w, b) in &weak {
                if let Some(b) = b {
                    let m = &model.blocks[*b];
                    prop_assert_eq!(w.strong_count(), m.strong);
                    prop_assert_eq!(w.weak_count(), m.weak);
                    prop_assert_eq!(w.is_expired(), m.strong == 0);
                }
            }
            let mut dropped = log.borrow().clone();
            dropped.sort_unstable();
            prop_assert_eq!(dropped, model.dead_values());
            prop_assert_eq!(live_blocks() - base, model.live());
        }

        drop(shared);
        drop(weak);
        prop_assert_eq!(live_blocks(), base);
        let dropped = log.borrow().len();
        prop_assert_eq!(dropped, model.blocks.iter().filter(|b| b.has_value).count());
    }
}
