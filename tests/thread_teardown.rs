// Handles that outlive their thread's arena.
//
// Assumes: thread-local destructors run in reverse registration order, so a
// thread-local registered before the arena is destroyed after it.
// Verifies: dropping handles from such a destructor leaks the value and the
// block instead of touching freed storage; counts read as zero and
// creating or copying handles panics without aborting.
use shared_handle::{SharedHandle, WeakHandle};
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

struct Payload(Arc<AtomicUsize>);

impl Drop for Payload {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, PartialEq)]
struct Observed {
    strong: usize,
    readable: bool,
    expired: bool,
    clone_panicked: bool,
    new_panicked: bool,
}

struct Holder {
    shared: SharedHandle<Payload>,
    weak: WeakHandle<Payload>,
    seen: Arc<Mutex<Option<Observed>>>,
}

impl Drop for Holder {
    fn drop(&mut self) {
        let observed = Observed {
            strong: self.shared.strong_count(),
            readable: self.shared.get().is_some(),
            expired: self.weak.is_expired(),
            clone_panicked: catch_unwind(AssertUnwindSafe(|| self.shared.clone())).is_err(),
            new_panicked: catch_unwind(|| SharedHandle::new(5u8)).is_err(),
        };
        if let Ok(mut seen) = self.seen.lock() {
            *seen = Some(observed);
        }
        // Fields drop next, with the arena already gone.
    }
}

thread_local! {
    static HOLDER: RefCell<Option<Holder>> = RefCell::new(None);
}

// Test: release after the arena's destructor has run.
// Verifies: the value is never dropped (leaked) and nothing aborts.
#[test]
fn release_after_arena_teardown_leaks() {
    let drops = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));

    let (d, s) = (drops.clone(), seen.clone());
    thread::spawn(move || {
        // HOLDER is registered first; the arena on the first handle.
        HOLDER.with(|slot| {
            let shared = SharedHandle::new(Payload(d));
            let weak = shared.downgrade();
            *slot.borrow_mut() = Some(Holder { shared, weak, seen: s });
        });
    })
    .join()
    .expect("thread teardown must not panic");

    assert_eq!(drops.load(Ordering::SeqCst), 0);
    let seen = seen.lock().expect("holder mutex").take();
    assert_eq!(
        seen,
        Some(Observed {
            strong: 0,
            readable: true,
            expired: true,
            clone_panicked: true,
            new_panicked: true,
        })
    );
}
