//! Event labels stored in an execution graph.

use crate::event::{Addr, Event, Stamp};
use crate::vv::View;

/// Memory ordering annotation of an access or fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemOrdering {
    NotAtomic,
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl MemOrdering {
    pub fn is_atomic(self) -> bool {
        self != MemOrdering::NotAtomic
    }

    pub fn is_at_least_acquire(self) -> bool {
        matches!(
            self,
            MemOrdering::Acquire | MemOrdering::AcqRel | MemOrdering::SeqCst
        )
    }

    pub fn is_at_least_release(self) -> bool {
        matches!(
            self,
            MemOrdering::Release | MemOrdering::AcqRel | MemOrdering::SeqCst
        )
    }

    pub fn is_sc(self) -> bool {
        self == MemOrdering::SeqCst
    }
}

/// The kind-specific payload of a label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelKind {
    Init,
    Read {
        addr: Addr,
        /// `None` while the read is pending (no source committed yet).
        rf: Option<Event>,
        /// The read half of a read-modify-write; the write half follows in po.
        rmw: bool,
        revisitable: bool,
        added_max: bool,
    },
    Write {
        addr: Addr,
        rmw: bool,
    },
    Fence,
    ThreadStart {
        parent_create: Event,
    },
    ThreadCreate {
        child: u32,
    },
    ThreadJoin {
        child: u32,
    },
    Alloc {
        addr: Addr,
        size: u64,
    },
    Free {
        addr: Addr,
    },
    HpRetire {
        addr: Addr,
    },
    HpProtect {
        hp_addr: Addr,
        protected: Addr,
    },
}

/// A single event of the execution graph.
#[derive(Clone, Debug)]
pub struct EventLabel {
    pos: Event,
    stamp: Stamp,
    ordering: MemOrdering,
    kind: LabelKind,
    prefix_view: View,
}

impl EventLabel {
    pub(crate) fn new(pos: Event, stamp: Stamp, ordering: MemOrdering, kind: LabelKind) -> Self {
        let mut prefix_view = View::new();
        prefix_view.update_idx(pos);
        Self {
            pos,
            stamp,
            ordering,
            kind,
            prefix_view,
        }
    }

    pub fn pos(&self) -> Event {
        self.pos
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub(crate) fn set_stamp(&mut self, stamp: Stamp) {
        self.stamp = stamp;
    }

    pub fn ordering(&self) -> MemOrdering {
        self.ordering
    }

    pub fn kind(&self) -> &LabelKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut LabelKind {
        &mut self.kind
    }

    /// Porf-prefix of this label, maintained by the graph.
    pub fn prefix_view(&self) -> &View {
        &self.prefix_view
    }

    pub(crate) fn set_prefix_view(&mut self, view: View) {
        self.prefix_view = view;
    }

    pub fn is_not_atomic(&self) -> bool {
        !self.ordering.is_atomic()
    }

    pub fn is_read(&self) -> bool {
        matches!(self.kind, LabelKind::Read { .. })
    }

    /// Writes, including the initializer.
    pub fn is_write_like(&self) -> bool {
        matches!(self.kind, LabelKind::Write { .. } | LabelKind::Init)
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, LabelKind::Write { .. })
    }

    pub fn is_fence(&self) -> bool {
        matches!(self.kind, LabelKind::Fence)
    }

    /// A read or a write.
    pub fn is_mem_access(&self) -> bool {
        matches!(self.kind, LabelKind::Read { .. } | LabelKind::Write { .. })
    }

    /// Frees and hazard-pointer retires.
    pub fn is_free_like(&self) -> bool {
        matches!(self.kind, LabelKind::Free { .. } | LabelKind::HpRetire { .. })
    }

    pub fn is_hp_retire(&self) -> bool {
        matches!(self.kind, LabelKind::HpRetire { .. })
    }

    pub fn is_rmw_read(&self) -> bool {
        matches!(self.kind, LabelKind::Read { rmw: true, .. })
    }

    pub fn is_rmw_write(&self) -> bool {
        matches!(self.kind, LabelKind::Write { rmw: true, .. })
    }

    /// The address of a read, write, allocation or free-like label.
    pub fn addr(&self) -> Option<Addr> {
        match self.kind {
            LabelKind::Read { addr, .. }
            | LabelKind::Write { addr, .. }
            | LabelKind::Alloc { addr, .. }
            | LabelKind::Free { addr }
            | LabelKind::HpRetire { addr } => Some(addr),
            _ => None,
        }
    }

    /// Address of a memory access; `None` for every other kind.
    pub fn access_addr(&self) -> Option<Addr> {
        match self.kind {
            LabelKind::Read { addr, .. } | LabelKind::Write { addr, .. } => Some(addr),
            _ => None,
        }
    }

    pub fn rf(&self) -> Option<Event> {
        match self.kind {
            LabelKind::Read { rf, .. } => rf,
            _ => None,
        }
    }

    pub fn is_revisitable(&self) -> bool {
        matches!(
            self.kind,
            LabelKind::Read {
                revisitable: true,
                ..
            }
        )
    }

    pub fn was_added_max(&self) -> bool {
        matches!(self.kind, LabelKind::Read { added_max: true, .. })
    }
}
