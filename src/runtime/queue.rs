//! Index-linked FIFO of queued operations.
//!
//! The queue owns nothing but its head and tail keys. The `next` link of every element
//! lives in the element's storage, reached through [`Links`], so pushing and popping are
//! O(1) and never allocate. An element must be linked into at most one queue at a time.

/// Storage that holds the `next` link of each queued element.
pub(crate) trait Links<K> {
    fn next(&self, key: K) -> Option<K>;
    fn set_next(&mut self, key: K, next: Option<K>);
}

/// Non-owning, non-thread-safe FIFO of keys.
#[derive(Debug)]
pub(crate) struct IntrusiveQueue<K> {
    head: Option<K>,
    tail: Option<K>,
    len: usize,
}

impl<K: Copy> Default for IntrusiveQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy> IntrusiveQueue<K> {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Links `key` behind the current tail.
    pub(crate) fn push_back(&mut self, links: &mut impl Links<K>, key: K) {
        links.set_next(key, None);

        match self.tail {
            Some(tail) => links.set_next(tail, Some(key)),
            None => self.head = Some(key),
        }

        self.tail = Some(key);
        self.len += 1;
    }

    /// Unlinks and returns the earliest pushed key.
    pub(crate) fn pop_front(&mut self, links: &mut impl Links<K>) -> Option<K> {
        let head = self.head?;

        self.head = links.next(head);
        links.set_next(head, None);

        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;

        Some(head)
    }

    /// Moves every element of `other` behind the current tail, preserving order.
    pub(crate) fn append(&mut self, links: &mut impl Links<K>, other: Self) {
        let Some(other_head) = other.head else {
            return;
        };

        match self.tail {
            Some(tail) => links.set_next(tail, Some(other_head)),
            None => self.head = Some(other_head),
        }

        self.tail = other.tail;
        self.len += other.len;
    }

    /// Detaches the whole queue, leaving `self` empty.
    pub(crate) fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
