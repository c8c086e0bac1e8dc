//! Debug-only guard against nested entry into the control-block arena.
//!
//! The arena hands out `&mut` access to its slots through an `UnsafeCell`.
//! That is only sound while no other section is open on the same thread,
//! so every section starts with `let _g = arena.sections.enter();`. Debug
//! builds count open sections and panic on nesting; release builds compile
//! the guard away.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-arena section tracker.
#[derive(Debug)]
pub struct SectionTracker {
    #[cfg(debug_assertions)]
    open: Cell<bool>,
    // Thread-local arena only; keep this !Send + !Sync.
    _nosend: PhantomData<*mut ()>,
}

impl SectionTracker {
    /// Const so it can initialise a `thread_local!` without lazy init.
    pub const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            open: Cell::new(false),
            _nosend: PhantomData,
        }
    }

    /// Open a section. In debug builds, panics if one is already open.
    #[inline]
    pub fn enter(&self) -> SectionGuard<'_> {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.open.replace(true),
                "control-block arena entered while a section was already open"
            );
            SectionGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            SectionGuard { _z: PhantomData }
        }
    }

    /// Whether a section is currently open. Always false in release builds.
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        #[cfg(debug_assertions)]
        {
            self.open.get()
        }
        #[cfg(not(debug_assertions))]
        {
            false
        }
    }
}

impl Default for SectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `SectionTracker::enter`; closes the section on drop.
pub struct SectionGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a SectionTracker,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl<'a> Drop for SectionGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(self.owner.open.get());
            self.owner.open.set(false);
        }
    }
}
