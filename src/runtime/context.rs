//! Thread-local record of the execution context currently running on this thread.
//!
//! A run loop enters its context for its whole duration; nested runs of another
//! context save and restore the previous value. The stored value is the context's
//! identity (the address of its shared state), never dereferenced, so the
//! thread-local holds no ownership.
//!
//! Used to decide whether `stop` must wake a blocked run loop and whether a run is
//! nested inside another run of the same context.

use std::cell::Cell;

thread_local! {
    /// Identity of the context running on this thread, 0 when none.
    static CURRENT_CONTEXT: Cell<usize> = const { Cell::new(0) };
}

/// Restores the previously running context when dropped.
#[must_use = "the context is left as soon as the guard is dropped"]
pub(crate) struct ContextGuard {
    previous: usize,
}

/// Marks the context identified by `id` as running on the current thread.
///
/// # Example
///
/// ```ignore
/// let _guard = enter_context(id);
/// assert!(running_in_this_thread(id));
/// ```
pub(crate) fn enter_context(id: usize) -> ContextGuard {
    let previous = CURRENT_CONTEXT.with(|current| current.replace(id));
    ContextGuard { previous }
}

/// Returns `true` if the context identified by `id` is running on the current thread.
pub(crate) fn running_in_this_thread(id: usize) -> bool {
    CURRENT_CONTEXT.with(|current| current.get() == id)
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|current| current.set(self.previous));
    }
}
