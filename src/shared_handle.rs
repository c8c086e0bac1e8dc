//! SharedHandle: shared ownership of one heap value through a control block.

use crate::control_block::{BlockKey, Release, StrongRef};
use crate::weak_handle::{Expired, WeakHandle};
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ptr::NonNull;
use log::{debug, trace};

/// A counted, shared owner of a heap-allocated `T`.
///
/// Cloning takes another strong reference on the same control block;
/// dropping returns it. The value is dropped when the last strong
/// reference goes away, and the block itself once no `WeakHandle`
/// observes it either.
///
/// A handle may hold no value: `new_empty()`/`Default` create a fresh
/// block without one, and `take()` (or upgrading an expired weak handle)
/// leaves a detached handle with neither value nor block. Reads on such
/// handles degrade instead of failing: `get()` returns `None` and
/// `value()` returns `T::default()`.
///
/// Single-threaded: `!Send`/`!Sync`, like `Rc`.
pub struct SharedHandle<T> {
    // Leaked `Box<T>`; freed by whichever handle returns the last strong unit.
    value: Option<NonNull<T>>,
    block: Option<StrongRef>,
    _owns: PhantomData<T>,
    _nosend: PhantomData<*mut ()>,
}

impl<T> SharedHandle<T> {
    /// Move `value` to the heap and own it through a fresh block.
    pub fn new(value: T) -> Self {
        Self::from(Box::new(value))
    }

    /// A fresh, unshared block (`strong == 1, weak == 0`) with no value.
    pub fn new_empty() -> Self {
        Self::from_parts(None, StrongRef::allocate())
    }

    /// Upgrade `weak` into a shared owner of the block it observes.
    ///
    /// An expired `weak` yields a detached handle; the strong count of the
    /// expired block is left at zero.
    pub fn from_weak(weak: &WeakHandle<T>) -> Self {
        weak.upgrade().unwrap_or_else(|| {
            debug!("upgrade of an expired weak handle; returning a detached handle");
            Self::detached()
        })
    }

    pub(crate) fn from_parts(value: Option<NonNull<T>>, block: StrongRef) -> Self {
        Self {
            value,
            block: Some(block),
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    fn detached() -> Self {
        Self {
            value: None,
            block: None,
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    /// Borrow the value, or `None` if this handle owns none.
    pub fn get(&self) -> Option<&T> {
        self.block.as_ref()?;
        // SAFETY: this handle holds one strong unit, so the value it points
        // to has not been freed.
        self.value.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// A copy of the value, or `T::default()` if this handle owns none.
    pub fn value(&self) -> T
    where
        T: Clone + Default,
    {
        self.get().cloned().unwrap_or_default()
    }

    /// True when this handle owns no value.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Exchange value and block with `other`. Counts are untouched.
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.value, &mut other.value);
        core::mem::swap(&mut self.block, &mut other.block);
    }

    /// Give up the current ownership, then own `value` through a brand-new
    /// block. Weak handles on the old block are not carried over.
    pub fn reset(&mut self, value: T) {
        self.release();
        *self = Self::new(value);
    }

    /// Move the ownership out, leaving `self` detached.
    pub fn take(&mut self) -> Self {
        core::mem::replace(self, Self::detached())
    }

    /// Create a weak observer of this handle's block.
    pub fn downgrade(&self) -> WeakHandle<T> {
        WeakHandle::from(self)
    }

    /// Number of shared handles on this block; 0 when detached.
    pub fn strong_count(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.counts().0)
    }

    /// Number of weak handles on this block; 0 when detached.
    pub fn weak_count(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.counts().1)
    }

    /// True when both handles share one control block, or both are
    /// detached. Agrees with `==`.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.block_key() == other.block_key()
    }

    pub(crate) fn block_key(&self) -> Option<BlockKey> {
        self.block.as_ref().map(StrongRef::key)
    }

    pub(crate) fn block(&self) -> Option<&StrongRef> {
        self.block.as_ref()
    }

    pub(crate) fn value_ptr(&self) -> Option<NonNull<T>> {
        self.value
    }

    /// Return the strong unit and, if it was the last one, drop the value.
    /// Leaves `self` detached.
    fn release(&mut self) {
        let value = self.value.take();
        let Some(block) = self.block.take() else {
            return;
        };
        match block.release() {
            Release::Live => {}
            Release::LastStrong | Release::BlockFreed => {
                if let Some(ptr) = value {
                    trace!("dropping shared value");
                    // SAFETY: `ptr` came from `Box::leak` and this was the
                    // last strong unit, so no other handle can reach it.
                    // The arena section is closed, so the value's own drop
                    // may release further handles.
                    drop(unsafe { Box::from_raw(ptr.as_ptr()) });
                }
            }
        }
    }
}

impl<T> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value,
            block: self.block.as_ref().map(StrongRef::acquire),
            _owns: PhantomData,
            _nosend: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        // Assigning from a handle on the same block (itself included)
        // would release and reacquire the same unit.
        if self.block_key() == source.block_key() && self.value == source.value {
            return;
        }
        self.release();
        self.value = source.value;
        self.block = source.block.as_ref().map(StrongRef::acquire);
    }
}

impl<T> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl<T> From<Box<T>> for SharedHandle<T> {
    fn from(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value));
        Self::from_parts(Some(ptr), StrongRef::allocate())
    }
}

impl<T> TryFrom<&WeakHandle<T>> for SharedHandle<T> {
    type Error = Expired;

    fn try_from(weak: &WeakHandle<T>) -> Result<Self, Self::Error> {
        weak.upgrade().ok_or(Expired)
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (strong, weak) = self.block.as_ref().map_or((0, 0), StrongRef::counts);
        f.debug_struct("SharedHandle")
            .field("value", &self.get())
            .field("strong", &strong)
            .field("weak", &weak)
            .finish()
    }
}

impl<T> PartialEq for SharedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for SharedHandle<T> {}

impl<T> Hash for SharedHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.block_key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_block::live_blocks;

    #[test]
    fn new_owns_value_with_fresh_block() {
        let h = SharedHandle::new(String::from("x"));
        assert_eq!(h.get().map(String::as_str), Some("x"));
        assert_eq!((h.strong_count(), h.weak_count()), (1, 0));
        assert!(!h.is_empty());
    }

    #[test]
    fn default_allocates_block_without_value() {
        let before = live_blocks();
        let h: SharedHandle<String> = SharedHandle::default();
        assert_eq!(live_blocks(), before + 1);
        assert_eq!(h.strong_count(), 1);
        assert!(h.get().is_none());
        assert_eq!(h.value(), String::new());
        drop(h);
        assert_eq!(live_blocks(), before);
    }

    #[test]
    fn take_detaches_without_touching_counts() {
        let mut a = SharedHandle::new(3u32);
        let b = a.clone();
        let moved = a.take();
        assert!(a.get().is_none());
        assert_eq!(a.strong_count(), 0);
        assert_eq!(moved.strong_count(), 2);
        assert!(moved.ptr_eq(&b));
        assert_eq!(a.value(), 0);
    }

    #[test]
    fn clone_from_same_block_is_noop() {
        let mut a = SharedHandle::new(7i64);
        let b = a.clone();
        a.clone_from(&b);
        assert_eq!(a.strong_count(), 2);
        assert_eq!(a.get(), Some(&7));
    }

    #[test]
    fn equality_follows_block_identity() {
        let a = SharedHandle::new(1u8);
        let b = SharedHandle::new(1u8);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn detached_handles_are_equal_and_ptr_eq() {
        let mut a = SharedHandle::new(1u8);
        let mut b = SharedHandle::new(2u8);
        let _ = (a.take(), b.take());
        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&SharedHandle::new(1u8)));
    }
}
