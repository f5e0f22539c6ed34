//! Fluent builder for ExecutionContext construction.
//!
//! Provides a builder pattern interface for creating and configuring execution contexts.

use crate::completion::{CompletionQueue, InProcessQueue};
use crate::runtime::ExecutionContext;

use std::fmt;
use std::sync::Arc;

const DEFAULT_ARENA_CAPACITY: usize = 256;

// One value is kept free so arena indices never collide with the heap marker in tags.
const MAX_CONCURRENCY_HINT: usize = u16::MAX as usize - 1;

/// Builder for constructing [`ExecutionContext`] instances with fluent API.
///
/// # Example
/// ```ignore
/// let queue = Arc::new(InProcessQueue::new());
/// let ctx = ContextBuilder::new()
///     .concurrency_hint(2)
///     .arena_capacity(64)
///     .completion_queue(queue.clone())
///     .build();
/// ```
pub struct ContextBuilder {
    concurrency_hint: usize,
    arena_capacity: usize,
    completion_queue: Option<Arc<dyn CompletionQueue>>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    /// Creates a new builder with a concurrency hint of one and a fresh in-process queue.
    pub fn new() -> Self {
        Self {
            concurrency_hint: 1,
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            completion_queue: None,
        }
    }

    /// Sets the number of threads expected to run the context concurrently.
    ///
    /// One operation arena is created per unit of hint. Values are clamped to at least one;
    /// a hint above one marks the context as multithreaded.
    pub fn concurrency_hint(mut self, hint: usize) -> Self {
        self.concurrency_hint = hint.clamp(1, MAX_CONCURRENCY_HINT);
        self
    }

    /// Sets how many operations an arena holds before allocations fall back to the heap.
    pub fn arena_capacity(mut self, capacity: usize) -> Self {
        self.arena_capacity = capacity;
        self
    }

    /// Uses `queue` as the completion source instead of a fresh [`InProcessQueue`].
    pub fn completion_queue(mut self, queue: Arc<dyn CompletionQueue>) -> Self {
        self.completion_queue = Some(queue);
        self
    }

    /// Builds and returns a configured execution context.
    ///
    /// # Returns
    /// A context in the ready state with no outstanding work.
    pub fn build(self) -> ExecutionContext {
        let queue = self
            .completion_queue
            .unwrap_or_else(|| Arc::new(InProcessQueue::new()));

        ExecutionContext::with_config(
            queue,
            self.concurrency_hint as u16,
            self.arena_capacity,
            self.concurrency_hint > 1,
        )
    }
}

impl fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("concurrency_hint", &self.concurrency_hint)
            .field("arena_capacity", &self.arena_capacity)
            .field("custom_completion_queue", &self.completion_queue.is_some())
            .finish()
    }
}
