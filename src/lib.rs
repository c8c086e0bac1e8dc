//! shared-handle: single-threaded shared/weak ownership handles whose
//! control blocks live in a per-thread generational arena.
//!
//! ```
//! use shared_handle::{SharedHandle, WeakHandle};
//!
//! let a = SharedHandle::new(String::from("x"));
//! let w = WeakHandle::from(&a);
//! assert_eq!(a.value(), "x");
//! drop(a);
//! assert!(w.is_expired());
//! assert!(w.lock().get().is_none());
//! ```
//!
//! Internal Design:
//!
//! Summary
//! - Layers:
//!   - `tokens`: linear, zero-sized tokens. Every counted reference a
//!     handle holds is a token that must be returned to the counter that
//!     minted it; forgetting one panics instead of skewing a count.
//!   - `control_block`: strong/weak counter pairs stored in a thread-local
//!     `SlotMap`. `StrongRef`/`WeakRef` pair a block key with a token and
//!     report, on release, whether the value or the whole block died.
//!   - `SharedHandle<T>` / `WeakHandle<T>`: public API. The value is a
//!     leaked `Box<T>` referenced by every strong handle of its block.
//!
//! Counting protocol
//! - Fresh handle: new block, `strong = 1, weak = 0`. This includes
//!   `SharedHandle::new_empty()`, which owns a block but no value.
//! - Clone: +1 on the matching counter. Move/`take`/`swap`: no change.
//! - Drop: -1. The value is dropped when `strong` reaches 0; the block is
//!   removed when `strong + weak` reaches 0.
//! - `reset` releases like a drop, then starts an independent block.
//! - `clone_from` between handles on the same block is a no-op.
//!
//! Upgrading
//! - `WeakHandle::upgrade` and `SharedHandle::try_from(&weak)` fail on an
//!   expired block. `SharedHandle::from_weak` returns a detached handle
//!   instead, and never raises the strong count of an expired block, so a
//!   freed value can never be reached again.
//! - `WeakHandle::lock` on an expired handle returns
//!   `SharedHandle::new_empty()`: a new block, not the old one.
//!
//! Reads
//! - `get()` is strict: `None` for a handle without a live value.
//! - `value()` is lenient: a clone of the value, or `T::default()`.
//!
//! Constraints
//! - Single-threaded: handles are `!Send`/`!Sync`; counters are plain
//!   `Cell<usize>` and each thread has its own arena.
//! - Arena sections never run user code. Values are dropped after the
//!   section closes, so a value that owns handles may release them from
//!   its own `Drop` (cascading release). A debug-only guard asserts that
//!   sections never nest.
//! - Arena sections never log either: records are emitted after the section
//!   closes, so an installed logger may create and drop handles.
//! - Generational keys: a freed block's key never resolves again, even
//!   if its slot is reused.
//! - Count overflow aborts, matching `Rc`.
//!
//! Notes and non-goals
//! - No cycle collection: a cycle of `SharedHandle`s leaks.
//! - No custom deleters or allocators.
//!
//! Thread teardown
//! - Handles reached from other thread-local destructors may outlive their
//!   thread's arena. Dropping one then leaks its block and value rather
//!   than touching freed storage, and count queries read 0.
//! - Creating, cloning, downgrading or upgrading a handle needs the arena
//!   and panics in that state, like any access to a destroyed thread-local.

#[cfg(feature = "bench_internal")]
pub mod control_block;
#[cfg(not(feature = "bench_internal"))]
mod control_block;
mod handle_proptest;
mod reentrancy;
mod shared_handle;
pub mod tokens;
mod weak_handle;

// Public surface
pub use control_block::live_blocks;
pub use shared_handle::SharedHandle;
pub use weak_handle::{Expired, WeakHandle};
