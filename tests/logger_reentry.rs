// Logging from inside the crate.
//
// Assumes: the installed `log::Log` is arbitrary user code and may itself
// create and drop handles.
// Verifies: no log record is emitted while an arena section is open, so a
// logger that stores every record in a `SharedHandle` neither trips the
// reentrancy guard nor corrupts the counts.
use log::{LevelFilter, Log, Metadata, Record};
use shared_handle::{live_blocks, SharedHandle};
use std::cell::{Cell, RefCell};

thread_local! {
    static IN_LOG: Cell<bool> = const { Cell::new(false) };
    static RECORDS: RefCell<Vec<SharedHandle<String>>> = RefCell::new(Vec::new());
}

// Keeps each record it sees in a fresh SharedHandle.
struct HandleLogger;

impl Log for HandleLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        // Records emitted by our own handle traffic are ignored.
        let entered = IN_LOG.try_with(|f| !f.replace(true)).unwrap_or(false);
        if !entered {
            return;
        }
        let handle = SharedHandle::new(record.args().to_string());
        let _ = RECORDS.try_with(move |r| {
            if let Ok(mut r) = r.try_borrow_mut() {
                r.push(handle);
            }
        });
        let _ = IN_LOG.try_with(|f| f.set(false));
    }

    fn flush(&self) {}
}

static LOGGER: HandleLogger = HandleLogger;

// Test: a logger that allocates handles while the crate logs.
// Verifies: allocation and release records reach the logger, and every
// record's block is accounted for in the arena.
#[test]
fn logger_may_create_handles() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);

    let before = live_blocks();
    let a = SharedHandle::new(1u8);
    let w = a.downgrade();
    drop(a);
    drop(w);

    let messages: Vec<String> =
        RECORDS.with(|r| r.borrow().iter().map(SharedHandle::value).collect());
    assert!(messages
        .iter()
        .any(|m| m.starts_with("allocated control block")));
    assert!(messages.iter().any(|m| m.starts_with("freed control block")));
    // The handle's own block is gone; one block per stored record remains.
    assert_eq!(live_blocks(), before + messages.len());

    // Silence the logger before letting the records go.
    IN_LOG.with(|f| f.set(true));
    RECORDS.with(|r| r.borrow_mut().clear());
    assert_eq!(live_blocks(), before);
}
