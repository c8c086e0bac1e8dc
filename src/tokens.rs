//! Lifetime-tied linear tokens and counting traits.
//!
//! Every strong or weak reference held by a handle is represented by a
//! zero-sized token minted by the counter it was taken from. Dropping a
//! token panics; the only valid way to dispose of it is to hand it back
//! to the originating counter via `Count::put`, so a handle cannot
//! forget to release what it acquired.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;

/// Zero-sized, linear token tied to its originating counter via lifetime.
pub struct Token<'a, C: ?Sized> {
    // Lifetime is tracked separately from the counter type to avoid
    // imposing `'a` bounds on `C`.
    _lt: PhantomData<&'a ()>,
    _ctr: PhantomData<*const C>,
}

impl<'a, C: ?Sized> Token<'a, C> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            _lt: PhantomData,
            _ctr: PhantomData,
        }
    }
}

impl<'a, C: ?Sized> Drop for Token<'a, C> {
    fn drop(&mut self) {
        panic!("Token dropped without Count::put");
    }
}

impl<'a, C: ?Sized> fmt::Debug for Token<'a, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token")
    }
}

/// A source of counted references, enforced by linear Token flow.
pub trait Count {
    /// The token type minted by this counter.
    type Token<'a>: Sized
    where
        Self: 'a;

    /// Acquire one counted reference and return a linear token for it.
    ///
    /// Tokens are minted with a `'static` lifetime; they stay branded to
    /// the counter type and shorten covariantly when returned via `put`.
    fn get(&self) -> Self::Token<'static>;

    /// Return (consume) a previously acquired token.
    /// Returns true if the count is now zero.
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool;
}

/// Single-threaded reference counter.
///
/// `Tag` only brands the tokens, so a strong token can never be returned
/// to a weak counter or the other way round.
pub struct UsizeCount<Tag: ?Sized = ()> {
    count: Cell<usize>,
    _tag: PhantomData<*const Tag>,
}

impl<Tag: ?Sized> UsizeCount<Tag> {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Cell::new(initial),
            _tag: PhantomData,
        }
    }

    /// Current number of outstanding tokens.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.get()
    }
}

impl<Tag: ?Sized> fmt::Debug for UsizeCount<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UsizeCount").field(&self.count.get()).finish()
    }
}

impl<Tag: ?Sized + 'static> Count for UsizeCount<Tag> {
    type Token<'a>
        = Token<'a, Self>
    where
        Self: 'a;

    #[inline]
    fn get(&self) -> Self::Token<'static> {
        let n = self.count.get().wrapping_add(1);
        self.count.set(n);
        if n == 0 {
            // Same policy as Rc: abort on overflow rather than continue unsafely.
            std::process::abort();
        }
        Token::<'static, Self>::new()
    }

    #[inline]
    fn put<'a>(&'a self, t: Self::Token<'a>) -> bool {
        let c = self.count.get();
        assert!(c > 0, "UsizeCount underflow");
        let n = c - 1;
        self.count.set(n);
        core::mem::forget(t);
        n == 0
    }
}
