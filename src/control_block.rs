//! Control blocks: strong/weak counter pairs kept in a per-thread arena.
//!
//! A block is pure counter storage. It is inserted into the thread's
//! `SlotMap` when a fresh `SharedHandle` is created and removed exactly
//! once, when its strong and weak counts have both reached zero. Handles
//! never see the block directly; they hold a `StrongRef` or `WeakRef`,
//! which pairs the block's generational key with the linear token minted
//! by the matching counter.
//!
//! Arena sections never call user code. Whatever has to happen once a
//! count reaches zero (dropping the owned value) is reported back through
//! `Release` and done by the caller after the section is closed.

use crate::reentrancy::SectionTracker;
use crate::tokens::{Count, Token, UsizeCount};
use core::cell::UnsafeCell;
use core::mem::ManuallyDrop;
use log::{debug, trace};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Generational index of a control block in its thread's arena.
    pub struct BlockKey;
}

/// Brand for strong-count tokens.
pub enum Strong {}
/// Brand for weak-count tokens.
pub enum Weak {}

#[derive(Debug)]
pub struct ControlBlock {
    strong: UsizeCount<Strong>,
    weak: UsizeCount<Weak>,
}

impl ControlBlock {
    fn new() -> Self {
        Self {
            strong: UsizeCount::new(0),
            weak: UsizeCount::new(0),
        }
    }

    fn is_unreferenced(&self) -> bool {
        self.strong.count() == 0 && self.weak.count() == 0
    }
}

/// Outcome of returning a token to its block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Release {
    /// Other references of the same kind remain.
    Live,
    /// The strong count reached zero; weak observers keep the block.
    LastStrong,
    /// Both counts reached zero and the block was removed from the arena.
    BlockFreed,
}

struct Arena {
    slots: UnsafeCell<SlotMap<BlockKey, ControlBlock>>,
    sections: SectionTracker,
}

thread_local! {
    static ARENA: Arena = Arena {
        slots: UnsafeCell::new(SlotMap::with_key()),
        sections: SectionTracker::new(),
    };
}

impl Arena {
    fn section<R>(&self, f: impl FnOnce(&mut SlotMap<BlockKey, ControlBlock>) -> R) -> R {
        let _g = self.sections.enter();
        // SAFETY: the arena is thread-local and sections never nest (checked
        // in debug builds; `f` never runs user code), so this is the only
        // live reference into `slots`.
        let slots = unsafe { &mut *self.slots.get() };
        f(slots)
    }
}

/// Run `f` inside an arena section on the current thread.
///
/// Panics once the thread's arena has been torn down; only releases and
/// count queries degrade in that state.
fn with_slots<R>(f: impl FnOnce(&mut SlotMap<BlockKey, ControlBlock>) -> R) -> R {
    ARENA.with(|arena| arena.section(f))
}

/// Like `with_slots`, but returns `None` once the thread's arena has been
/// torn down (handles dropped from other thread-local destructors).
fn try_with_slots<R>(f: impl FnOnce(&mut SlotMap<BlockKey, ControlBlock>) -> R) -> Option<R> {
    ARENA.try_with(|arena| arena.section(f)).ok()
}

/// Number of control blocks currently allocated on this thread.
pub fn live_blocks() -> usize {
    try_with_slots(|slots| slots.len()).unwrap_or(0)
}

/// One unit of a block's strong count.
#[derive(Debug)]
pub struct StrongRef {
    key: BlockKey,
    token: ManuallyDrop<Token<'static, UsizeCount<Strong>>>,
}

/// One unit of a block's weak count.
#[derive(Debug)]
pub struct WeakRef {
    key: BlockKey,
    token: ManuallyDrop<Token<'static, UsizeCount<Weak>>>,
}

impl StrongRef {
    /// Allocate a fresh block with `strong == 1, weak == 0`.
    pub fn allocate() -> Self {
        let this = with_slots(|slots| {
            let key = slots.insert(ControlBlock::new());
            Self {
                key,
                token: ManuallyDrop::new(slots[key].strong.get()),
            }
        });
        trace!("allocated control block {:?}", this.key);
        this
    }

    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Take another strong unit on the same block.
    pub fn acquire(&self) -> Self {
        let token = with_slots(|slots| {
            ManuallyDrop::new(live_block(slots, self.key).strong.get())
        });
        Self {
            key: self.key,
            token,
        }
    }

    /// Take a weak unit on the same block.
    pub fn downgrade(&self) -> WeakRef {
        let token = with_slots(|slots| {
            ManuallyDrop::new(live_block(slots, self.key).weak.get())
        });
        WeakRef {
            key: self.key,
            token,
        }
    }

    pub fn counts(&self) -> (usize, usize) {
        counts(self.key)
    }

    /// Return this unit to the block.
    ///
    /// If the arena is already gone the unit is leaked and `Live` is
    /// reported, so the caller never frees a value it cannot prove dead.
    pub fn release(self) -> Release {
        let Self { key, token } = self;
        // An unrun closure drops `token` still wrapped, leaking the unit.
        let outcome = try_with_slots(move |slots| {
            let block = live_block(slots, key);
            if !block.strong.put(ManuallyDrop::into_inner(token)) {
                return Release::Live;
            }
            if block.is_unreferenced() {
                slots.remove(key);
                Release::BlockFreed
            } else {
                Release::LastStrong
            }
        });
        log_release(key, outcome)
    }
}

impl WeakRef {
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Take another weak unit on the same block.
    pub fn acquire(&self) -> Self {
        let token = with_slots(|slots| {
            ManuallyDrop::new(live_block(slots, self.key).weak.get())
        });
        Self {
            key: self.key,
            token,
        }
    }

    /// Take a strong unit if the block still has a strong owner.
    ///
    /// Never revives a block whose strong count already reached zero.
    pub fn upgrade(&self) -> Option<StrongRef> {
        with_slots(|slots| {
            let block = live_block(slots, self.key);
            if block.strong.count() == 0 {
                return None;
            }
            Some(StrongRef {
                key: self.key,
                token: ManuallyDrop::new(block.strong.get()),
            })
        })
    }

    pub fn counts(&self) -> (usize, usize) {
        counts(self.key)
    }

    /// Return this unit to the block; frees the block if it was the last
    /// reference of either kind.
    pub fn release(self) -> Release {
        let Self { key, token } = self;
        // An unrun closure drops `token` still wrapped, leaking the unit.
        let outcome = try_with_slots(move |slots| {
            let block = live_block(slots, key);
            block.weak.put(ManuallyDrop::into_inner(token));
            if block.is_unreferenced() {
                slots.remove(key);
                Release::BlockFreed
            } else {
                Release::Live
            }
        });
        log_release(key, outcome)
    }
}

// Runs outside the section: an installed logger may itself use handles.
fn log_release(key: BlockKey, outcome: Option<Release>) -> Release {
    match outcome {
        Some(Release::BlockFreed) => trace!("freed control block {:?}", key),
        Some(Release::LastStrong) => {
            trace!("control block {:?} has no strong owners left", key)
        }
        Some(Release::Live) => {}
        None => debug!("arena torn down; leaking a unit of block {:?}", key),
    }
    outcome.unwrap_or(Release::Live)
}

/// `(strong, weak)` for a block that is still referenced by the caller;
/// `(0, 0)` once the arena has been torn down.
fn counts(key: BlockKey) -> (usize, usize) {
    try_with_slots(|slots| {
        let block = live_block(slots, key);
        (block.strong.count(), block.weak.count())
    })
    .unwrap_or((0, 0))
}

fn live_block(slots: &SlotMap<BlockKey, ControlBlock>, key: BlockKey) -> &ControlBlock {
    // Every StrongRef/WeakRef keeps its block alive, so a miss means the
    // counting protocol itself is broken.
    match slots.get(key) {
        Some(block) => block,
        None => panic!("control block {:?} released while still referenced", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_starts_at_one_strong_zero_weak() {
        let before = live_blocks();
        let s = StrongRef::allocate();
        assert_eq!(s.counts(), (1, 0));
        assert_eq!(live_blocks(), before + 1);
        assert_eq!(s.release(), Release::BlockFreed);
        assert_eq!(live_blocks(), before);
    }

    #[test]
    fn weak_keeps_block_after_last_strong() {
        let s = StrongRef::allocate();
        let w = s.downgrade();
        assert_eq!(w.counts(), (1, 1));
        assert_eq!(s.release(), Release::LastStrong);
        assert_eq!(w.counts(), (0, 1));
        assert!(w.upgrade().is_none());
        assert_eq!(w.release(), Release::BlockFreed);
    }

    #[test]
    fn acquire_and_upgrade_share_the_block() {
        let s = StrongRef::allocate();
        let s2 = s.acquire();
        let w = s.downgrade();
        let w2 = w.acquire();
        let s3 = w.upgrade().expect("block is live");
        assert_eq!(s.key(), s3.key());
        assert_eq!(s.counts(), (3, 2));

        assert_eq!(s3.release(), Release::Live);
        assert_eq!(s2.release(), Release::Live);
        assert_eq!(w2.release(), Release::Live);
        assert_eq!(s.release(), Release::LastStrong);
        assert_eq!(w.release(), Release::BlockFreed);
    }

    #[test]
    fn freed_slot_reuse_gets_a_new_key() {
        let s = StrongRef::allocate();
        let old = s.key();
        assert_eq!(s.release(), Release::BlockFreed);
        let fresh = StrongRef::allocate();
        assert_ne!(old, fresh.key(), "generational keys must not alias");
        fresh.release();
    }
}
