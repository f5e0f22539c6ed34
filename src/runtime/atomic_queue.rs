//! Lock-free multi-producer, single-consumer queue with an activity marker.
//!
//! The whole state lives in one atomic word, the head pointer, which is either
//!
//! * `INACTIVE` - empty, and the consumer is not expected to look at the queue; the
//!   next producer owns the wake-up,
//! * null - active and empty; a wake-up is already pending or being handled,
//! * a node - active, holding a LIFO chain of pushed items.
//!
//! Producers push with a single compare-and-swap and learn from the value they replaced
//! whether they performed the inactive→active transition. The consumer detaches the
//! chain and marks the queue inactive with one swap, then reverses the chain to restore
//! submission order. Because both transitions are read-modify-writes of the same word,
//! every push is ordered either before the swap (its item is detached) or after it (it
//! observes `INACTIVE` and must wake the consumer); no wake-up can be lost in between.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

// Never a real allocation: heap nodes are not placed at their own alignment.
fn inactive<T>() -> *mut Node<T> {
    NonNull::dangling().as_ptr()
}

pub(crate) struct AtomicIntrusiveQueue<T> {
    head: AtomicPtr<Node<T>>,
    _owns: PhantomData<Box<Node<T>>>,
}

// SAFETY: items are moved in by producers and out by the single consumer; the queue
// never hands out shared references to them.
unsafe impl<T: Send> Send for AtomicIntrusiveQueue<T> {}
unsafe impl<T: Send> Sync for AtomicIntrusiveQueue<T> {}

impl<T> AtomicIntrusiveQueue<T> {
    pub(crate) fn new(active: bool) -> Self {
        let head = if active {
            ptr::null_mut()
        } else {
            inactive()
        };

        Self {
            head: AtomicPtr::new(head),
            _owns: PhantomData,
        }
    }

    /// Pushes `value`. Returns `true` when the queue was inactive, in which case the
    /// caller is responsible for waking the consumer.
    pub(crate) fn push(&self, value: T) -> bool {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let was_inactive = head == inactive();
            let next = if was_inactive { ptr::null_mut() } else { head };

            // SAFETY: `node` is not reachable by any other thread until the CAS succeeds.
            unsafe { (*node).next = next };

            match self
                .head
                .compare_exchange_weak(head, node, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return was_inactive,
                Err(actual) => head = actual,
            }
        }
    }

    /// Moves the queue from inactive to active-and-empty. Returns whether this call
    /// performed the transition.
    pub(crate) fn try_mark_active(&self) -> bool {
        self.head
            .compare_exchange(
                inactive(),
                ptr::null_mut(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.head.load(Ordering::Relaxed) != inactive()
    }

    /// Detaches every queued item and marks the queue inactive in the same step.
    ///
    /// Must only be called by the consumer.
    pub(crate) fn take_all_and_mark_inactive(&self) -> Drain<T> {
        let head = self.head.swap(inactive(), Ordering::SeqCst);
        let chain = if head == inactive() {
            ptr::null_mut()
        } else {
            head
        };

        Drain::reversed(chain)
    }
}

impl<T> Drop for AtomicIntrusiveQueue<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        if head != inactive() {
            drop(Drain::reversed(head));
        }
    }
}

/// Owning iterator over a detached chain, in push order.
pub(crate) struct Drain<T> {
    next: *mut Node<T>,
    _owns: PhantomData<Box<Node<T>>>,
}

impl<T> Drain<T> {
    fn reversed(mut head: *mut Node<T>) -> Self {
        let mut reversed = ptr::null_mut();

        while !head.is_null() {
            // SAFETY: the chain was detached by a single swap, so this thread owns every node.
            unsafe {
                let next = (*head).next;
                (*head).next = reversed;
                reversed = head;
                head = next;
            }
        }

        Self {
            next: reversed,
            _owns: PhantomData,
        }
    }
}

impl<T> Iterator for Drain<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.next.is_null() {
            return None;
        }

        // SAFETY: every node in the chain came from `Box::into_raw` and is visited once.
        let node = unsafe { Box::from_raw(self.next) };
        self.next = node.next;

        Some(node.value)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}
