//! WeakHandle: non-owning observer of a SharedHandle's control block.

use crate::control_block::{BlockKey, WeakRef};
use crate::shared_handle::SharedHandle;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// Upgrade failed because the observed block has no strong owner left.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Expired;

impl fmt::Display for Expired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("weak handle has expired")
    }
}

impl std::error::Error for Expired {}

/// A weak reference to the block of some `SharedHandle`.
///
/// Holding a `WeakHandle` keeps the control block allocated but not the
/// value: once every `SharedHandle` on the block is gone the handle
/// reports `is_expired()` and can no longer be upgraded.
pub struct WeakHandle<T> {
    // Cached from the originating SharedHandle; only read after a
    // successful upgrade has re-established a strong unit.
    value: Option<NonNull<T>>,
    block: Option<WeakRef>,
    _nosend: PhantomData<*const T>,
}

impl<T> WeakHandle<T> {
    /// A handle observing nothing. Always expired.
    pub fn new() -> Self {
        Self {
            value: None,
            block: None,
            _nosend: PhantomData,
        }
    }

    /// True when no block is observed or its strong count is zero.
    pub fn is_expired(&self) -> bool {
        self.block.as_ref().map_or(true, |b| b.counts().0 == 0)
    }

    /// Upgrade to a shared handle on the observed block.
    ///
    /// When expired, returns `SharedHandle::new_empty()`: a brand-new,
    /// independent block holding no value, not a view of the old one.
    pub fn lock(&self) -> SharedHandle<T> {
        if self.is_expired() {
            SharedHandle::new_empty()
        } else {
            SharedHandle::from_weak(self)
        }
    }

    /// Upgrade to a shared handle on the observed block, or `None` when
    /// expired. Never allocates a block.
    pub fn upgrade(&self) -> Option<SharedHandle<T>> {
        let strong = self.block.as_ref()?.upgrade()?;
        Some(SharedHandle::from_parts(self.value, strong))
    }

    /// Move the observation out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    /// Number of shared handles on the observed block; 0 when empty.
    pub fn strong_count(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.counts().0)
    }

    /// Number of weak handles on the observed block; 0 when empty.
    pub fn weak_count(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.counts().1)
    }

    /// True when both handles observe one control block, or neither
    /// observes any.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.block_key() == other.block_key()
    }

    fn block_key(&self) -> Option<BlockKey> {
        self.block.as_ref().map(WeakRef::key)
    }

    fn release(&mut self) {
        self.value = None;
        if let Some(block) = self.block.take() {
            block.release();
        }
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value,
            block: self.block.as_ref().map(WeakRef::acquire),
            _nosend: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.block_key() == source.block_key() && self.value == source.value {
            return;
        }
        self.release();
        self.value = source.value;
        self.block = source.block.as_ref().map(WeakRef::acquire);
    }
}

impl<T> From<&SharedHandle<T>> for WeakHandle<T> {
    fn from(shared: &SharedHandle<T>) -> Self {
        Self {
            value: shared.value_ptr(),
            block: shared.block().map(|b| b.downgrade()),
            _nosend: PhantomData,
        }
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("expired", &self.is_expired())
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_block::live_blocks;

    #[test]
    fn empty_weak_is_expired() {
        let w: WeakHandle<String> = WeakHandle::new();
        assert!(w.is_expired());
        assert!(w.upgrade().is_none());
        assert_eq!((w.strong_count(), w.weak_count()), (0, 0));
    }

    #[test]
    fn expired_lock_allocates_independent_block() {
        let a = SharedHandle::new(String::from("x"));
        let w = a.downgrade();
        drop(a);
        let before = live_blocks();
        let locked = w.lock();
        assert_eq!(live_blocks(), before + 1);
        assert!(locked.get().is_none());
        assert_eq!((locked.strong_count(), locked.weak_count()), (1, 0));
        assert_eq!(w.strong_count(), 0);
    }

    #[test]
    fn upgrade_and_try_from_agree_on_expiry() {
        let a = SharedHandle::new(5u16);
        let w = WeakHandle::from(&a);
        assert!(SharedHandle::<u16>::try_from(&w).is_ok());
        drop(a);
        assert_eq!(SharedHandle::<u16>::try_from(&w).err(), Some(Expired));
        assert_eq!(Expired.to_string(), "weak handle has expired");
    }

    #[test]
    fn empty_weak_handles_are_ptr_eq() {
        let a = SharedHandle::new(1u8);
        assert!(WeakHandle::<u8>::new().ptr_eq(&WeakHandle::default()));
        assert!(!a.downgrade().ptr_eq(&WeakHandle::new()));
    }

    #[test]
    fn debug_shows_counts_not_value() {
        let a = SharedHandle::new(1u8);
        let w = a.downgrade();
        assert_eq!(
            format!("{:?}", w),
            "WeakHandle { expired: false, strong: 1, weak: 1 }"
        );
    }
}
