/// Panic backtraces for node executors
///
/// `catch_unwind` only hands back the payload, and by then the stack is gone.
/// A process-wide hook records a backtrace on the panicking thread while the
/// panic site is still on the stack; the engine picks it up right after the
/// unwind is caught, which happens in the same poll on the same thread.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_PANIC: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Install the recording hook once. The previously installed hook still runs.
pub fn capture_backtraces() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture();
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Backtrace of the most recent panic on this thread, if not taken yet
pub fn take_backtrace() -> Option<Backtrace> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[inline(never)]
    fn exploding_executor_body() {
        panic!("replica set unreachable");
    }

    #[test]
    fn backtrace_names_the_panicking_function() {
        capture_backtraces();
        let caught = catch_unwind(AssertUnwindSafe(exploding_executor_body));
        assert!(caught.is_err());

        let trace = take_backtrace().expect("hook recorded a backtrace").to_string();
        assert!(trace.contains("exploding_executor_body"), "{}", trace);
        assert!(take_backtrace().is_none());
    }
}
