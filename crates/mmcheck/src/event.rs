//! Event identifiers, insertion stamps and addresses.

use std::fmt;

/// Position of an event: thread ID and index within the thread.
///
/// `Event::INIT` is the initializer. It is the first label of thread 0 and
/// the implicit co-first write of every location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event {
    pub thread: u32,
    pub index: u32,
}

impl Event {
    pub const INIT: Event = Event { thread: 0, index: 0 };

    pub const fn new(thread: u32, index: u32) -> Self {
        Self { thread, index }
    }

    pub fn is_init(self) -> bool {
        self == Self::INIT
    }

    /// The po-predecessor position, if the event is not first in its thread.
    pub fn prev(self) -> Option<Event> {
        self.index.checked_sub(1).map(|index| Event::new(self.thread, index))
    }

    pub fn next(self) -> Event {
        Event::new(self.thread, self.index + 1)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_init() {
            write!(f, "INIT")
        } else {
            write!(f, "({}, {})", self.thread, self.index)
        }
    }
}

/// Insertion-order index of a label. Strictly increasing as labels are added.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp(pub u32);

impl Stamp {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A memory address. Dynamic addresses live in heap blocks and must be
/// covered by an allocation before they are accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr {
    value: u64,
    dynamic: bool,
}

impl Addr {
    pub const fn global(value: u64) -> Self {
        Self {
            value,
            dynamic: false,
        }
    }

    pub const fn heap(value: u64) -> Self {
        Self {
            value,
            dynamic: true,
        }
    }

    pub fn value(self) -> u64 {
        self.value
    }

    pub fn is_dynamic(self) -> bool {
        self.dynamic
    }

    /// Whether `self` falls inside the block `[base, base + size)`.
    pub fn within(self, base: Addr, size: u64) -> bool {
        self.dynamic == base.dynamic
            && self.value >= base.value
            && self.value - base.value < size.max(1)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dynamic {
            write!(f, "heap:0x{:x}", self.value)
        } else {
            write!(f, "0x{:x}", self.value)
        }
    }
}
