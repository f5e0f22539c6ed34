//! Operation storage: fixed-capacity arenas with a heap fallback.
//!
//! The context owns one arena per unit of concurrency hint. A run checks an arena out
//! for its duration, so allocations made by callbacks on that run land in storage that
//! no other run touches. Once an arena is full, or when allocating outside of a run,
//! operations are boxed individually instead. Either way an operation is released
//! back to the storage it came from.

use crate::runtime::operation::{Callback, Home, OperationKey, Slot};
use crate::runtime::queue::Links;

use slab::Slab;
use std::collections::HashMap;
use tracing::trace;

/// Allocation source selected for the current run.
///
/// Obtained from [`ExecutionContext::allocator`](crate::ExecutionContext::allocator).
/// Outside of a run the allocator always refers to the heap fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocator {
    arena: Option<u16>,
}

impl Allocator {
    pub(crate) const HEAP: Allocator = Allocator { arena: None };

    /// Returns `true` when operations are allocated from a pooled arena.
    pub fn is_pooled(&self) -> bool {
        self.arena.is_some()
    }

    /// Index of the arena in use, if any.
    pub fn arena(&self) -> Option<u16> {
        self.arena
    }
}

/// Snapshot of operation storage usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of arenas owned by the context.
    pub arenas: usize,
    /// Operations allocated from an arena since creation.
    pub pooled: u64,
    /// Operations that fell back to an individual heap allocation since creation.
    pub fallback: u64,
    /// Operations currently allocated.
    pub live: usize,
}

struct Arena {
    slots: Slab<Slot>,
    capacity: usize,
    generation: u16,
}

impl Arena {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
            generation: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }
}

pub(crate) struct ArenaPool {
    arenas: Vec<Arena>,
    idle: Vec<u16>,
    heap: HashMap<u32, Box<Slot>>,
    next_heap_index: u32,
    heap_generation: u16,
    pooled: u64,
    fallback: u64,
}

impl ArenaPool {
    pub(crate) fn new(arenas: u16, capacity: usize) -> Self {
        Self {
            arenas: (0..arenas).map(|_| Arena::with_capacity(capacity)).collect(),
            // Popped from the back, so arena 0 is handed out first.
            idle: (0..arenas).rev().collect(),
            heap: HashMap::new(),
            next_heap_index: 0,
            heap_generation: 0,
            pooled: 0,
            fallback: 0,
        }
    }

    /// Hands out an unused arena, or the heap when all are in use.
    pub(crate) fn checkout(&mut self) -> Allocator {
        Allocator {
            arena: self.idle.pop(),
        }
    }

    pub(crate) fn checkin(&mut self, allocator: Allocator) {
        if let Some(arena) = allocator.arena {
            debug_assert!(!self.idle.contains(&arena));
            self.idle.push(arena);
        }
    }

    pub(crate) fn allocate(
        &mut self,
        allocator: Allocator,
        callback: Option<Callback>,
    ) -> OperationKey {
        if let Some(index) = allocator.arena {
            let arena = &mut self.arenas[usize::from(index)];

            if !arena.is_full() {
                arena.generation = arena.generation.wrapping_add(1);
                let generation = arena.generation;
                let slot = arena.slots.insert(Slot::new(callback, generation));
                self.pooled += 1;

                return OperationKey {
                    home: Home::Arena(index),
                    index: slot as u32,
                    generation,
                };
            }

            trace!(arena = index, "arena exhausted, falling back to heap");
        }

        self.allocate_heap(callback)
    }

    fn allocate_heap(&mut self, callback: Option<Callback>) -> OperationKey {
        let mut index = self.next_heap_index;
        // u32::MAX is never used so that no key encodes to the wake-up tag.
        while index == u32::MAX || self.heap.contains_key(&index) {
            index = index.wrapping_add(1);
        }
        self.next_heap_index = index.wrapping_add(1);

        self.heap_generation = self.heap_generation.wrapping_add(1);
        let generation = self.heap_generation;
        self.heap
            .insert(index, Box::new(Slot::new(callback, generation)));
        self.fallback += 1;

        OperationKey {
            home: Home::Heap,
            index,
            generation,
        }
    }

    /// Stores the callback of a reserved operation. Returns `false` if `key` is stale or
    /// already holds one.
    pub(crate) fn install(&mut self, key: OperationKey, callback: Callback) -> bool {
        match self.slot_mut(key) {
            Some(slot) if slot.callback.is_none() => {
                slot.callback = Some(callback);
                true
            }
            _ => false,
        }
    }

    /// Frees the slot named by `key`, returning its contents. Stale keys yield `None`.
    pub(crate) fn release(&mut self, key: OperationKey) -> Option<Slot> {
        match key.home {
            Home::Arena(index) => {
                let slots = &mut self.arenas.get_mut(usize::from(index))?.slots;
                let index = key.index as usize;

                let current = slots
                    .get(index)
                    .is_some_and(|slot| slot.generation == key.generation);
                current.then(|| slots.remove(index))
            }
            Home::Heap => {
                let current = self
                    .heap
                    .get(&key.index)
                    .is_some_and(|slot| slot.generation == key.generation);
                if !current {
                    return None;
                }
                self.heap.remove(&key.index).map(|slot| *slot)
            }
        }
    }

    pub(crate) fn slot_mut(&mut self, key: OperationKey) -> Option<&mut Slot> {
        let slot = match key.home {
            Home::Arena(index) => self
                .arenas
                .get_mut(usize::from(index))?
                .slots
                .get_mut(key.index as usize)?,
            Home::Heap => self.heap.get_mut(&key.index)?.as_mut(),
        };

        (slot.generation == key.generation).then_some(slot)
    }

    fn slot(&self, key: OperationKey) -> Option<&Slot> {
        let slot = match key.home {
            Home::Arena(index) => self
                .arenas
                .get(usize::from(index))?
                .slots
                .get(key.index as usize)?,
            Home::Heap => self.heap.get(&key.index)?.as_ref(),
        };

        (slot.generation == key.generation).then_some(slot)
    }

    pub(crate) fn live(&self) -> usize {
        self.arenas.iter().map(|arena| arena.slots.len()).sum::<usize>() + self.heap.len()
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            arenas: self.arenas.len(),
            pooled: self.pooled,
            fallback: self.fallback,
            live: self.live(),
        }
    }

    /// Frees every operation without invoking it. Returns how many were freed.
    pub(crate) fn clear(&mut self) -> usize {
        let live = self.live();

        for arena in &mut self.arenas {
            arena.slots.clear();
        }
        self.heap.clear();

        live
    }
}

impl Links<OperationKey> for ArenaPool {
    fn next(&self, key: OperationKey) -> Option<OperationKey> {
        self.slot(key).and_then(|slot| slot.next)
    }

    fn set_next(&mut self, key: OperationKey, next: Option<OperationKey>) {
        if let Some(slot) = self.slot_mut(key) {
            slot.next = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::runtime::ExecutionContext;
    use crate::runtime::queue::IntrusiveQueue;

    use std::cell::Cell;
    use std::rc::Rc;

    fn noop() -> Callback {
        Box::new(|_: &ExecutionContext, _: bool| {})
    }

    #[test]
    fn test_checkout_hands_out_each_arena_once() {
        let mut pool = ArenaPool::new(2, 4);

        let first = pool.checkout();
        let second = pool.checkout();
        let third = pool.checkout();

        assert_eq!(first.arena(), Some(0));
        assert_eq!(second.arena(), Some(1));
        assert!(!third.is_pooled());

        pool.checkin(second);
        assert_eq!(pool.checkout().arena(), Some(1));
    }

    #[test]
    fn test_full_arena_falls_back_to_heap() {
        let mut pool = ArenaPool::new(1, 2);
        let allocator = pool.checkout();

        let a = pool.allocate(allocator, Some(noop()));
        let b = pool.allocate(allocator, Some(noop()));
        let c = pool.allocate(allocator, Some(noop()));

        assert_eq!(a.home, Home::Arena(0));
        assert_eq!(b.home, Home::Arena(0));
        assert_eq!(c.home, Home::Heap);

        let stats = pool.stats();
        assert_eq!(stats.pooled, 2);
        assert_eq!(stats.fallback, 1);
        assert_eq!(stats.live, 3);
    }

    #[test]
    fn test_release_rejects_stale_keys() {
        let mut pool = ArenaPool::new(1, 4);
        let allocator = pool.checkout();

        let key = pool.allocate(allocator, Some(noop()));
        assert!(pool.release(key).is_some());
        assert!(pool.release(key).is_none());

        // The slab reuses the index, but the generation moved on.
        let reused = pool.allocate(allocator, Some(noop()));
        assert_eq!(reused.index, key.index);
        assert!(pool.release(key).is_none());
        assert!(pool.release(reused).is_some());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_install_fills_reserved_slot_once() {
        let mut pool = ArenaPool::new(0, 0);
        let key = pool.allocate(Allocator::HEAP, None);

        assert!(pool.install(key, noop()));
        assert!(!pool.install(key, noop()));

        let slot = pool.release(key).unwrap();
        assert!(slot.callback.is_some());
        assert!(!pool.install(key, noop()));
    }

    #[test]
    fn test_clear_drops_callbacks_without_running_them() {
        let ran = Rc::new(Cell::new(false));
        let mut pool = ArenaPool::new(1, 1);
        let allocator = pool.checkout();

        for _ in 0..3 {
            let ran = ran.clone();
            pool.allocate(
                allocator,
                Some(Box::new(move |_: &ExecutionContext, _: bool| ran.set(true))),
            );
        }

        assert_eq!(pool.clear(), 3);
        assert_eq!(pool.live(), 0);
        assert!(!ran.get());
        assert_eq!(Rc::strong_count(&ran), 1);
    }

    #[test]
    fn test_pool_links_mixed_homes_in_one_queue() {
        let mut pool = ArenaPool::new(1, 1);
        let allocator = pool.checkout();
        let mut queue = IntrusiveQueue::new();

        let keys: Vec<_> = (0..3)
            .map(|_| pool.allocate(allocator, Some(noop())))
            .collect();
        for &key in &keys {
            queue.push_back(&mut pool, key);
        }

        let popped: Vec<_> = std::iter::from_fn(|| queue.pop_front(&mut pool)).collect();
        assert_eq!(popped, keys);
    }
}
