//! Queued operations and the keys that name them.
//!
//! An operation is a one-shot callback stored in a [`Slot`]. Its [`OperationKey`] is
//! both the link used by the local queue and, encoded as a [`Tag`], the identity handed
//! to the completion queue.

use crate::completion::Tag;
use crate::runtime::ExecutionContext;

/// One-shot continuation invoked with the completion outcome.
pub(crate) type Callback = Box<dyn FnOnce(&ExecutionContext, bool)>;

/// Callback submitted from another thread.
pub(crate) type RemoteCallback = Box<dyn FnOnce(&ExecutionContext, bool) + Send>;

/// Storage an operation was allocated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Home {
    Arena(u16),
    Heap,
}

const HEAP_HOME: u64 = 0xFFFF;

/// Generation-checked handle to a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct OperationKey {
    pub(crate) home: Home,
    pub(crate) index: u32,
    pub(crate) generation: u16,
}

impl OperationKey {
    pub(crate) fn tag(self) -> Tag {
        let home = match self.home {
            Home::Arena(arena) => u64::from(arena),
            Home::Heap => HEAP_HOME,
        };

        Tag::from_raw(home << 48 | u64::from(self.generation) << 32 | u64::from(self.index))
    }

    /// Decodes a tag produced by [`tag`](Self::tag). The wake-up tag decodes to `None`.
    pub(crate) fn from_tag(tag: Tag) -> Option<Self> {
        if tag == Tag::WAKE {
            return None;
        }

        let raw = tag.into_raw();
        let home = match raw >> 48 {
            HEAP_HOME => Home::Heap,
            arena => Home::Arena(arena as u16),
        };

        Some(Self {
            home,
            index: raw as u32,
            generation: (raw >> 32) as u16,
        })
    }
}

/// Storage for a single operation.
pub(crate) struct Slot {
    pub(crate) callback: Option<Callback>,
    pub(crate) next: Option<OperationKey>,
    pub(crate) generation: u16,
}

impl Slot {
    pub(crate) fn new(callback: Option<Callback>, generation: u16) -> Self {
        Self {
            callback,
            next: None,
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_decodes_to_the_same_key() {
        let keys = [
            OperationKey {
                home: Home::Arena(0),
                index: 0,
                generation: 0,
            },
            OperationKey {
                home: Home::Arena(7),
                index: 1234,
                generation: u16::MAX,
            },
            OperationKey {
                home: Home::Heap,
                index: u32::MAX - 1,
                generation: u16::MAX,
            },
        ];

        for key in keys {
            assert_eq!(OperationKey::from_tag(key.tag()), Some(key));
            assert_ne!(key.tag(), Tag::WAKE);
        }
    }

    #[test]
    fn test_wake_tag_is_not_an_operation() {
        assert_eq!(OperationKey::from_tag(Tag::WAKE), None);
    }
}
