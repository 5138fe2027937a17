//! The execution graph: labels per thread, reads-from and coherence order.
//!
//! The graph owns every label. Checkers borrow it immutably for the length of
//! one query; all relation accessors (`po`, `rf`, `co`, `fr`, `tc`, `tj`, and
//! the allocation/free linkage) are answered from the data kept here.
//!
//! Mutations validate their input and keep two invariants: stamps follow
//! insertion order, and every label's prefix view is its porf-prefix.

use std::collections::HashMap;

use log::{debug, trace};

use crate::error::GraphError;
use crate::event::{Addr, Event, Stamp};
use crate::label::{EventLabel, LabelKind, MemOrdering};
use crate::vv::View;

#[derive(Clone, Debug)]
pub struct ExecutionGraph {
    threads: Vec<Vec<EventLabel>>,
    /// Position of each label, indexed by stamp.
    by_stamp: Vec<Event>,
    /// Coherence order per address. The initializer is implicit and omitted.
    coherence: HashMap<Addr, Vec<Event>>,
    /// Reads of each write (and of `Event::INIT`), in insertion order.
    readers: HashMap<Event, Vec<Event>>,
}

impl Default for ExecutionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGraph {
    /// A graph holding only the initializer, as the first label of thread 0.
    pub fn new() -> Self {
        let init = EventLabel::new(Event::INIT, Stamp(0), MemOrdering::SeqCst, LabelKind::Init);
        Self {
            threads: vec![vec![init]],
            by_stamp: vec![Event::INIT],
            coherence: HashMap::new(),
            readers: HashMap::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Label access
    // ---------------------------------------------------------------------

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn thread_size(&self, thread: u32) -> usize {
        self.threads.get(thread as usize).map_or(0, Vec::len)
    }

    pub fn thread_labels(&self, thread: u32) -> &[EventLabel] {
        self.threads.get(thread as usize).map_or(&[], Vec::as_slice)
    }

    pub fn last_label(&self, thread: u32) -> Option<&EventLabel> {
        self.threads.get(thread as usize).and_then(|t| t.last())
    }

    pub fn get_label(&self, e: Event) -> Option<&EventLabel> {
        self.threads
            .get(e.thread as usize)
            .and_then(|t| t.get(e.index as usize))
    }

    /// The label at `e`. Panics if `e` is not in the graph.
    pub fn label(&self, e: Event) -> &EventLabel {
        match self.get_label(e) {
            Some(lab) => lab,
            None => panic!("no label at {e} in the execution graph"),
        }
    }

    fn label_mut(&mut self, e: Event) -> Result<&mut EventLabel, GraphError> {
        self.threads
            .get_mut(e.thread as usize)
            .and_then(|t| t.get_mut(e.index as usize))
            .ok_or(GraphError::UnknownEvent(e))
    }

    pub fn contains(&self, e: Event) -> bool {
        self.get_label(e).is_some()
    }

    pub fn max_stamp(&self) -> Stamp {
        Stamp(self.by_stamp.len() as u32 - 1)
    }

    pub fn label_by_stamp(&self, stamp: Stamp) -> Option<&EventLabel> {
        self.by_stamp.get(stamp.get()).map(|&e| self.label(e))
    }

    /// All labels in stamp (addition) order.
    pub fn labels(&self) -> impl Iterator<Item = &EventLabel> + '_ {
        self.by_stamp.iter().map(move |&e| self.label(e))
    }

    /// Every accessed address, sorted.
    pub fn locations(&self) -> Vec<Addr> {
        let mut locs: Vec<Addr> = self.labels().filter_map(|l| l.access_addr()).collect();
        locs.sort_unstable();
        locs.dedup();
        locs
    }

    // ---------------------------------------------------------------------
    // po, rf, tc, tj
    // ---------------------------------------------------------------------

    pub fn po_imm_pred(&self, e: Event) -> Option<&EventLabel> {
        e.prev().and_then(|p| self.get_label(p))
    }

    pub fn po_imm_succ(&self, e: Event) -> Option<&EventLabel> {
        self.get_label(e.next())
    }

    /// The write a read observes, if it has one.
    pub fn rf_pred(&self, e: Event) -> Option<&EventLabel> {
        self.get_label(e).and_then(|l| l.rf()).map(|w| self.label(w))
    }

    /// Reads observing `write` (which may be `Event::INIT`).
    pub fn readers(&self, write: Event) -> impl Iterator<Item = &EventLabel> + '_ {
        self.readers
            .get(&write)
            .into_iter()
            .flatten()
            .map(move |&r| self.label(r))
    }

    pub fn tc_pred(&self, e: Event) -> Option<&EventLabel> {
        match self.get_label(e)?.kind() {
            LabelKind::ThreadStart { parent_create } => self.get_label(*parent_create),
            _ => None,
        }
    }

    pub fn tc_succ(&self, e: Event) -> Option<&EventLabel> {
        match self.get_label(e)?.kind() {
            LabelKind::ThreadCreate { child } => self.get_label(Event::new(*child, 0)),
            _ => None,
        }
    }

    pub fn tj_pred(&self, e: Event) -> Option<&EventLabel> {
        match self.get_label(e)?.kind() {
            LabelKind::ThreadJoin { child } => self.last_label(*child),
            _ => None,
        }
    }

    fn is_joined(&self, thread: u32) -> bool {
        self.labels()
            .any(|l| matches!(l.kind(), LabelKind::ThreadJoin { child } if *child == thread))
    }

    /// Joins waiting on the thread of `e`, if `e` is that thread's last label.
    pub fn tj_succs(&self, e: Event) -> Vec<&EventLabel> {
        if e.thread == 0 || self.thread_size(e.thread) != e.index as usize + 1 {
            return Vec::new();
        }
        self.labels()
            .filter(|l| matches!(l.kind(), LabelKind::ThreadJoin { child } if *child == e.thread))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Coherence order
    // ---------------------------------------------------------------------

    /// Coherence order at `addr`, without the initializer.
    pub fn co(&self, addr: Addr) -> &[Event] {
        self.coherence.get(&addr).map_or(&[], Vec::as_slice)
    }

    fn co_index(&self, store: Event) -> Option<(Addr, usize)> {
        let addr = self.get_label(store)?.access_addr()?;
        let idx = self.co(addr).iter().position(|&w| w == store)?;
        Some((addr, idx))
    }

    pub fn is_placed(&self, store: Event) -> bool {
        self.co_index(store).is_some()
    }

    /// The co-maximal write at `addr`, or the initializer.
    pub fn co_max(&self, addr: Addr) -> Event {
        self.co(addr).last().copied().unwrap_or(Event::INIT)
    }

    pub fn co_first(&self, addr: Addr) -> Option<Event> {
        self.co(addr).first().copied()
    }

    /// Immediate co-predecessor of a placed store; `Event::INIT` for the
    /// co-first store.
    pub fn co_imm_pred(&self, store: Event) -> Option<Event> {
        let (addr, idx) = self.co_index(store)?;
        Some(match idx {
            0 => Event::INIT,
            i => self.co(addr)[i - 1],
        })
    }

    pub fn co_imm_succ(&self, store: Event) -> Option<Event> {
        let (addr, idx) = self.co_index(store)?;
        self.co(addr).get(idx + 1).copied()
    }

    /// Writes co-before `store`, in co order (initializer excluded).
    pub fn co_preds(&self, store: Event) -> &[Event] {
        match self.co_index(store) {
            Some((addr, idx)) => &self.co(addr)[..idx],
            None => &[],
        }
    }

    /// Writes co-after `store`, in co order.
    pub fn co_succs(&self, store: Event) -> &[Event] {
        match self.co_index(store) {
            Some((addr, idx)) => &self.co(addr)[idx + 1..],
            None => &[],
        }
    }

    pub fn is_co_maximal(&self, addr: Addr, e: Event) -> bool {
        self.co_max(addr) == e
    }

    /// The write immediately co-after the source of `read`.
    pub fn fr_imm_succ(&self, read: Event) -> Option<Event> {
        let lab = self.get_label(read)?;
        let addr = lab.access_addr()?;
        match lab.rf()? {
            Event::INIT => self.co_first(addr),
            w => self.co_imm_succ(w),
        }
    }

    /// Reads at `addr` observing the initializer.
    pub fn init_rfs_at(&self, addr: Addr) -> Vec<Event> {
        self.readers(Event::INIT)
            .filter(|r| r.access_addr() == Some(addr))
            .map(EventLabel::pos)
            .collect()
    }

    // ---------------------------------------------------------------------
    // RMW helpers
    // ---------------------------------------------------------------------

    pub fn is_rmw_load(&self, e: Event) -> bool {
        self.get_label(e).is_some_and(EventLabel::is_rmw_read)
    }

    pub fn is_rmw_store(&self, e: Event) -> bool {
        self.get_label(e).is_some_and(EventLabel::is_rmw_write)
    }

    /// For an RMW store, another RMW read that observes the same write as the
    /// store's own read half. `None` for plain stores or when no such read
    /// exists.
    pub fn pending_rmw(&self, store: Event) -> Option<Event> {
        if !self.is_rmw_store(store) {
            return None;
        }
        let read = self.po_imm_pred(store)?;
        let src = read.rf()?;
        let mut pending = self
            .readers(src)
            .filter(|r| r.is_rmw_read() && r.pos() != read.pos() && r.addr() == read.addr());
        let found = pending.next().map(EventLabel::pos);
        debug_assert!(pending.next().is_none(), "more than one pending RMW on {src}");
        found
    }

    /// Revisitable reads at the store's address that are not in `before`,
    /// minus those added after a conflicting pending RMW.
    pub fn revisitable_reads(&self, store: Event, before: &View) -> Vec<Event> {
        let Some(addr) = self.get_label(store).and_then(EventLabel::access_addr) else {
            return Vec::new();
        };
        let mut loads = Vec::new();
        for (t, labels) in self.threads.iter().enumerate() {
            let start = before.get(t as u32).map_or(0, |i| i as usize + 1);
            for lab in labels.iter().skip(start) {
                if lab.is_read()
                    && lab.access_addr() == Some(addr)
                    && lab.is_revisitable()
                    && lab.was_added_max()
                {
                    loads.push(lab.pos());
                }
            }
        }
        self.drop_after_pending_rmw(store, &mut loads);
        loads
    }

    pub(crate) fn drop_after_pending_rmw(&self, store: Event, loads: &mut Vec<Event>) {
        if let Some(pending) = self.pending_rmw(store) {
            let conflict = self.label(pending).stamp();
            loads.retain(|&e| self.label(e).stamp() <= conflict);
        }
    }

    // ---------------------------------------------------------------------
    // Allocation, free and hazard pointers
    // ---------------------------------------------------------------------

    /// The allocation whose block covers the address of `e`.
    pub fn alloc_pred(&self, e: Event) -> Option<&EventLabel> {
        let addr = self.get_label(e)?.addr()?;
        if !addr.is_dynamic() {
            return None;
        }
        self.labels().find(|l| match l.kind() {
            LabelKind::Alloc { addr: base, size } => l.pos() != e && addr.within(*base, *size),
            _ => false,
        })
    }

    /// Memory accesses inside the block allocated by `alloc`.
    pub fn alloc_succs(&self, alloc: Event) -> Vec<&EventLabel> {
        let Some(LabelKind::Alloc { addr: base, size }) = self.get_label(alloc).map(EventLabel::kind)
        else {
            return Vec::new();
        };
        self.labels()
            .filter(|l| l.access_addr().is_some_and(|a| a.within(*base, *size)))
            .collect()
    }

    /// The allocation a free-like label releases.
    pub fn free_pred(&self, e: Event) -> Option<&EventLabel> {
        let lab = self.get_label(e)?;
        if !lab.is_free_like() {
            return None;
        }
        self.alloc_pred(e)
    }

    /// Free-like labels releasing the block allocated by `alloc`.
    pub fn free_succs(&self, alloc: Event) -> Vec<&EventLabel> {
        let Some(LabelKind::Alloc { addr: base, size }) = self.get_label(alloc).map(EventLabel::kind)
        else {
            return Vec::new();
        };
        self.labels()
            .filter(|l| l.is_free_like() && l.addr().is_some_and(|a| a.within(*base, *size)))
            .collect()
    }

    /// Memory accesses at the same address as `e`, excluding `e` itself.
    pub fn same_loc_accesses(&self, e: Event) -> Vec<&EventLabel> {
        let Some(addr) = self.get_label(e).and_then(EventLabel::access_addr) else {
            return Vec::new();
        };
        self.labels()
            .filter(|l| l.pos() != e && l.access_addr() == Some(addr))
            .collect()
    }

    /// Free-like labels at the same address as `e`, excluding `e` itself.
    pub fn same_loc_frees(&self, e: Event) -> Vec<&EventLabel> {
        let Some(addr) = self.get_label(e).filter(|l| l.is_free_like()).and_then(EventLabel::addr)
        else {
            return Vec::new();
        };
        self.labels()
            .filter(|l| l.pos() != e && l.is_free_like() && l.addr() == Some(addr))
            .collect()
    }

    /// Whether a dynamic access is covered by a hazard pointer: some po-earlier
    /// protect in the same thread names an address in the access's block, and
    /// that hazard pointer is not re-targeted before the access.
    pub fn is_hazptr_protected(&self, e: Event) -> bool {
        let Some(lab) = self.get_label(e) else {
            return false;
        };
        let Some(addr) = lab.access_addr().filter(|a| a.is_dynamic()) else {
            return false;
        };
        let Some(LabelKind::Alloc { addr: base, size }) = self.alloc_pred(e).map(EventLabel::kind)
        else {
            return false;
        };
        debug_assert!(addr.within(*base, *size));

        let before = &self.thread_labels(e.thread)[..e.index as usize];
        let Some((idx, hp)) = before.iter().enumerate().rev().find_map(|(i, l)| match l.kind() {
            LabelKind::HpProtect { hp_addr, protected } if protected.within(*base, *size) => {
                Some((i, *hp_addr))
            }
            _ => None,
        }) else {
            return false;
        };
        !before[idx + 1..]
            .iter()
            .any(|l| matches!(l.kind(), LabelKind::HpProtect { hp_addr, .. } if *hp_addr == hp))
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    /// A view holding every label whose stamp is at most `stamp`.
    pub fn view_from_stamp(&self, stamp: Stamp) -> View {
        let mut view = View::with_threads(self.threads.len());
        for &e in self.by_stamp.iter().take(stamp.get() + 1) {
            view.update_idx(e);
        }
        view
    }

    /// Porf-before view of the label at `pos`, computed from its po-predecessor.
    fn calc_prefix_view(&self, pos: Event) -> View {
        let mut view = View::new();
        view.update_idx(pos);
        let Some(prev) = self.po_imm_pred(pos) else {
            return view;
        };
        view.update(prev.prefix_view());
        match prev.kind() {
            LabelKind::Read { rf: Some(w), .. } => view.update(self.label(*w).prefix_view()),
            LabelKind::ThreadStart { parent_create } => {
                view.update(self.label(*parent_create).prefix_view())
            }
            LabelKind::ThreadJoin { child } => {
                if let Some(last) = self.last_label(*child) {
                    view.update(last.prefix_view());
                }
            }
            _ => {}
        }
        view
    }

    /// Recomputes every prefix view after a reads-from change. Views only
    /// grow, so iterating in stamp order until nothing changes terminates.
    fn recompute_prefix_views(&mut self) {
        for labels in &mut self.threads {
            for lab in labels.iter_mut() {
                let mut own = View::new();
                own.update_idx(lab.pos());
                lab.set_prefix_view(own);
            }
        }
        loop {
            let mut changed = false;
            for i in 0..self.by_stamp.len() {
                let pos = self.by_stamp[i];
                let view = self.calc_prefix_view(pos);
                if &view != self.label(pos).prefix_view() {
                    if let Ok(lab) = self.label_mut(pos) {
                        lab.set_prefix_view(view);
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    fn push_label(
        &mut self,
        thread: u32,
        ordering: MemOrdering,
        kind: LabelKind,
    ) -> Result<Event, GraphError> {
        let size = self
            .threads
            .get(thread as usize)
            .ok_or(GraphError::UnknownThread(thread))?
            .len();
        if thread != 0 && self.is_joined(thread) {
            return Err(GraphError::ThreadFinished(thread));
        }
        let pos = Event::new(thread, size as u32);
        let stamp = Stamp(self.by_stamp.len() as u32);
        let mut lab = EventLabel::new(pos, stamp, ordering, kind);
        lab.set_prefix_view(self.calc_prefix_view(pos));
        if let Some(w) = lab.rf() {
            self.readers.entry(w).or_default().push(pos);
        }
        trace!("adding {pos} {stamp}: {:?}", lab.kind());
        self.threads[thread as usize].push(lab);
        self.by_stamp.push(pos);
        Ok(pos)
    }

    fn check_source(&self, addr: Addr, rf: Option<Event>) -> Result<(), GraphError> {
        match rf {
            None | Some(Event::INIT) => Ok(()),
            Some(w) => {
                let lab = self.get_label(w).ok_or(GraphError::UnknownEvent(w))?;
                match lab.kind() {
                    LabelKind::Write { addr: a, .. } if *a == addr => Ok(()),
                    LabelKind::Write { .. } => Err(GraphError::AddressMismatch { write: w, addr }),
                    _ => Err(GraphError::NotAWrite(w)),
                }
            }
        }
    }

    /// Spawns a new thread from `parent`. Returns the create event and the
    /// child's thread ID.
    pub fn spawn_thread(&mut self, parent: u32) -> Result<(Event, u32), GraphError> {
        let child = self.threads.len() as u32;
        let create = self.push_label(parent, MemOrdering::Release, LabelKind::ThreadCreate { child })?;
        self.threads.push(Vec::new());
        self.push_label(
            child,
            MemOrdering::Acquire,
            LabelKind::ThreadStart {
                parent_create: create,
            },
        )?;
        debug!("thread {parent} spawned thread {child} at {create}");
        Ok((create, child))
    }

    pub fn add_join(&mut self, thread: u32, child: u32) -> Result<Event, GraphError> {
        if child == 0 || child as usize >= self.threads.len() {
            return Err(GraphError::UnknownThread(child));
        }
        self.push_label(thread, MemOrdering::Acquire, LabelKind::ThreadJoin { child })
    }

    /// Adds a plain read. `rf` may be `None` for a read whose source has not
    /// been chosen yet.
    pub fn add_read(
        &mut self,
        thread: u32,
        addr: Addr,
        ordering: MemOrdering,
        rf: Option<Event>,
    ) -> Result<Event, GraphError> {
        self.add_read_impl(thread, addr, ordering, rf, false)
    }

    /// Adds the read half of a read-modify-write.
    pub fn add_rmw_read(
        &mut self,
        thread: u32,
        addr: Addr,
        ordering: MemOrdering,
        rf: Option<Event>,
    ) -> Result<Event, GraphError> {
        self.add_read_impl(thread, addr, ordering, rf, true)
    }

    fn add_read_impl(
        &mut self,
        thread: u32,
        addr: Addr,
        ordering: MemOrdering,
        rf: Option<Event>,
        rmw: bool,
    ) -> Result<Event, GraphError> {
        self.check_source(addr, rf)?;
        self.push_label(
            thread,
            ordering,
            LabelKind::Read {
                addr,
                rf,
                rmw,
                revisitable: true,
                added_max: true,
            },
        )
    }

    /// Whether the next label of `thread` completes an RMW on `addr`.
    fn completes_rmw(&self, thread: u32, addr: Addr) -> bool {
        self.last_label(thread)
            .is_some_and(|l| l.is_rmw_read() && l.access_addr() == Some(addr))
    }

    /// Adds a write without placing it in coherence order. Use
    /// [`ExecutionGraph::place_write`] once a position is chosen.
    pub fn add_unplaced_write(
        &mut self,
        thread: u32,
        addr: Addr,
        ordering: MemOrdering,
    ) -> Result<Event, GraphError> {
        let rmw = self.completes_rmw(thread, addr);
        self.push_label(thread, ordering, LabelKind::Write { addr, rmw })
    }

    /// Places an unplaced write immediately co-after `pred` (`Event::INIT`
    /// places it first).
    pub fn place_write(&mut self, store: Event, pred: Event) -> Result<(), GraphError> {
        let addr = match self.get_label(store).map(EventLabel::kind) {
            Some(LabelKind::Write { addr, .. }) => *addr,
            Some(_) => return Err(GraphError::NotAWrite(store)),
            None => return Err(GraphError::UnknownEvent(store)),
        };
        if self.is_placed(store) {
            return Err(GraphError::AlreadyPlaced(store));
        }
        let at = match pred {
            Event::INIT => 0,
            p => {
                self.check_source(addr, Some(p))?;
                let (_, idx) = self.co_index(p).ok_or(GraphError::NotPlaced(p))?;
                idx + 1
            }
        };
        self.coherence.entry(addr).or_default().insert(at, store);
        trace!("placed {store} co-after {pred} at {addr}");
        Ok(())
    }

    /// Adds a write at the co-maximal position, or right after the observed
    /// write when it completes an RMW.
    pub fn add_write(
        &mut self,
        thread: u32,
        addr: Addr,
        ordering: MemOrdering,
    ) -> Result<Event, GraphError> {
        let pred = if self.completes_rmw(thread, addr) {
            let read = self.last_label(thread).map(EventLabel::pos);
            match self.last_label(thread).and_then(EventLabel::rf) {
                Some(src) => src,
                None => return Err(GraphError::PendingRmw(read.unwrap_or(Event::INIT))),
            }
        } else {
            self.co_max(addr)
        };
        let store = self.add_unplaced_write(thread, addr, ordering)?;
        self.place_write(store, pred)?;
        Ok(store)
    }

    /// Adds a write placed immediately co-after `pred`.
    pub fn add_write_after(
        &mut self,
        thread: u32,
        addr: Addr,
        ordering: MemOrdering,
        pred: Event,
    ) -> Result<Event, GraphError> {
        self.check_source(addr, Some(pred))?;
        let store = self.add_unplaced_write(thread, addr, ordering)?;
        self.place_write(store, pred)?;
        Ok(store)
    }

    /// Adds both halves of a read-modify-write reading from `rf`.
    pub fn add_rmw(
        &mut self,
        thread: u32,
        addr: Addr,
        ordering: MemOrdering,
        rf: Event,
    ) -> Result<(Event, Event), GraphError> {
        let read = self.add_rmw_read(thread, addr, ordering, Some(rf))?;
        let write = self.add_write(thread, addr, ordering)?;
        Ok((read, write))
    }

    pub fn add_fence(&mut self, thread: u32, ordering: MemOrdering) -> Result<Event, GraphError> {
        self.push_label(thread, ordering, LabelKind::Fence)
    }

    pub fn add_alloc(&mut self, thread: u32, addr: Addr, size: u64) -> Result<Event, GraphError> {
        self.push_label(thread, MemOrdering::NotAtomic, LabelKind::Alloc { addr, size })
    }

    pub fn add_free(&mut self, thread: u32, addr: Addr) -> Result<Event, GraphError> {
        self.push_label(thread, MemOrdering::NotAtomic, LabelKind::Free { addr })
    }

    pub fn add_hp_retire(&mut self, thread: u32, addr: Addr) -> Result<Event, GraphError> {
        self.push_label(thread, MemOrdering::NotAtomic, LabelKind::HpRetire { addr })
    }

    pub fn add_hp_protect(
        &mut self,
        thread: u32,
        hp_addr: Addr,
        protected: Addr,
    ) -> Result<Event, GraphError> {
        self.push_label(
            thread,
            MemOrdering::NotAtomic,
            LabelKind::HpProtect { hp_addr, protected },
        )
    }

    /// Redirects `read` to observe `rf` (or makes it pending).
    pub fn change_rf(&mut self, read: Event, rf: Option<Event>) -> Result<(), GraphError> {
        let (addr, old) = match self.get_label(read).map(EventLabel::kind) {
            Some(LabelKind::Read { addr, rf, .. }) => (*addr, *rf),
            Some(_) => return Err(GraphError::NotARead(read)),
            None => return Err(GraphError::UnknownEvent(read)),
        };
        self.check_source(addr, rf)?;
        if let Some(old) = old {
            if let Some(rs) = self.readers.get_mut(&old) {
                rs.retain(|&r| r != read);
            }
        }
        if let Some(new) = rf {
            self.readers.entry(new).or_default().push(read);
        }
        if let LabelKind::Read { rf: slot, .. } = self.label_mut(read)?.kind_mut() {
            *slot = rf;
        }
        self.recompute_prefix_views();
        debug!("{read} now reads from {}", rf.map_or("<pending>".to_string(), |w| w.to_string()));
        Ok(())
    }

    pub fn set_revisitable(&mut self, read: Event, value: bool) -> Result<(), GraphError> {
        match self.label_mut(read)?.kind_mut() {
            LabelKind::Read { revisitable, .. } => {
                *revisitable = value;
                Ok(())
            }
            _ => Err(GraphError::NotARead(read)),
        }
    }

    pub fn set_added_max(&mut self, read: Event, value: bool) -> Result<(), GraphError> {
        match self.label_mut(read)?.kind_mut() {
            LabelKind::Read { added_max, .. } => {
                *added_max = value;
                Ok(())
            }
            _ => Err(GraphError::NotARead(read)),
        }
    }

    /// Drops every label outside `keep`, as done before a revisit. Stamps are
    /// renumbered in their old order, and reads whose source was dropped
    /// become pending.
    pub fn cut_to_view(&mut self, keep: &View) {
        for (t, labels) in self.threads.iter_mut().enumerate() {
            let len = match keep.get(t as u32) {
                Some(i) => i as usize + 1,
                None if t == 0 => 1,
                None => 0,
            };
            labels.truncate(len);
        }
        let threads = &self.threads;
        let kept = |e: &Event| {
            threads
                .get(e.thread as usize)
                .is_some_and(|t| (e.index as usize) < t.len())
        };
        self.by_stamp.retain(|e| kept(e));
        for co in self.coherence.values_mut() {
            co.retain(|e| kept(e));
        }
        self.coherence.retain(|_, co| !co.is_empty());

        let order = self.by_stamp.clone();
        self.readers.clear();
        for (i, pos) in order.into_iter().enumerate() {
            let source = self.label(pos).rf();
            let dropped = source.filter(|w| !self.contains(*w));
            if let Ok(lab) = self.label_mut(pos) {
                lab.set_stamp(Stamp(i as u32));
                if dropped.is_some() {
                    if let LabelKind::Read { rf, .. } = lab.kind_mut() {
                        *rf = None;
                    }
                }
            }
            if let Some(w) = source.filter(|_| dropped.is_none()) {
                self.readers.entry(w).or_default().push(pos);
            }
        }
        self.recompute_prefix_views();
        debug!("graph cut to {keep}, {} labels left", self.by_stamp.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: Addr = Addr::global(0x10);
    const Y: Addr = Addr::global(0x20);

    #[test]
    fn test_new_graph_has_init() {
        let g = ExecutionGraph::new();
        assert_eq!(g.num_threads(), 1);
        assert_eq!(g.max_stamp(), Stamp(0));
        assert!(matches!(g.label(Event::INIT).kind(), LabelKind::Init));
        assert_eq!(g.co_max(X), Event::INIT);
    }

    #[test]
    fn test_spawn_and_join_linkage() {
        let mut g = ExecutionGraph::new();
        let (create, child) = g.spawn_thread(0).unwrap();
        let w = g.add_write(child, X, MemOrdering::Relaxed).unwrap();
        let join = g.add_join(0, child).unwrap();

        assert_eq!(g.tc_succ(create).unwrap().pos(), Event::new(child, 0));
        assert_eq!(g.tc_pred(Event::new(child, 0)).unwrap().pos(), create);
        assert_eq!(g.tj_pred(join).unwrap().pos(), w);
        let succs: Vec<Event> = g.tj_succs(w).iter().map(|l| l.pos()).collect();
        assert_eq!(succs, vec![join]);

        // Events after the join see the child's write through porf.
        let after = g.add_fence(0, MemOrdering::SeqCst).unwrap();
        assert!(g.label(after).prefix_view().contains(w));
    }

    #[test]
    fn test_stamps_follow_insertion() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let a = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        let b = g.add_write(0, Y, MemOrdering::Relaxed).unwrap();
        assert!(g.label(a).stamp() < g.label(b).stamp());
        let order: Vec<Event> = g.labels().map(|l| l.pos()).collect();
        assert_eq!(order.last(), Some(&b));
        assert_eq!(g.label_by_stamp(g.max_stamp()).unwrap().pos(), b);
    }

    #[test]
    fn test_coherence_placement() {
        let mut g = ExecutionGraph::new();
        let w1 = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let w2 = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let w3 = g.add_write_after(0, X, MemOrdering::Relaxed, Event::INIT).unwrap();
        assert_eq!(g.co(X), &[w3, w1, w2]);
        assert_eq!(g.co_imm_pred(w3), Some(Event::INIT));
        assert_eq!(g.co_imm_pred(w1), Some(w3));
        assert_eq!(g.co_imm_succ(w1), Some(w2));
        assert_eq!(g.co_succs(w3), &[w1, w2]);
        assert_eq!(g.co_preds(w2), &[w3, w1]);
        assert!(g.is_co_maximal(X, w2));
    }

    #[test]
    fn test_unplaced_write_then_place() {
        let mut g = ExecutionGraph::new();
        let w1 = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let w2 = g.add_unplaced_write(0, X, MemOrdering::Relaxed).unwrap();
        assert!(!g.is_placed(w2));
        assert_eq!(g.co_max(X), w1);
        g.place_write(w2, w1).unwrap();
        assert_eq!(g.co_max(X), w2);
        assert_eq!(g.place_write(w2, w1), Err(GraphError::AlreadyPlaced(w2)));
    }

    #[test]
    fn test_fr_imm_succ() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let w1 = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let w2 = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let r0 = g.add_read(t1, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        let r1 = g.add_read(t1, X, MemOrdering::Relaxed, Some(w1)).unwrap();
        let r2 = g.add_read(t1, X, MemOrdering::Relaxed, Some(w2)).unwrap();
        assert_eq!(g.fr_imm_succ(r0), Some(w1));
        assert_eq!(g.fr_imm_succ(r1), Some(w2));
        assert_eq!(g.fr_imm_succ(r2), None);
        assert_eq!(g.init_rfs_at(X), vec![r0]);
    }

    #[test]
    fn test_read_prefix_view_excludes_own_source() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let w = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        let r = g.add_read(t2, X, MemOrdering::Relaxed, Some(w)).unwrap();
        let next = g.add_fence(t2, MemOrdering::Relaxed).unwrap();
        assert!(!g.label(r).prefix_view().contains(w));
        assert!(g.label(next).prefix_view().contains(w));
    }

    #[test]
    fn test_change_rf_recomputes_views() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let w = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        let r = g.add_read(t2, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        let next = g.add_fence(t2, MemOrdering::Relaxed).unwrap();
        assert!(!g.label(next).prefix_view().contains(w));

        g.change_rf(r, Some(w)).unwrap();
        assert!(g.label(next).prefix_view().contains(w));
        assert_eq!(g.readers(w).map(|l| l.pos()).collect::<Vec<_>>(), vec![r]);
        assert!(g.init_rfs_at(X).is_empty());
    }

    #[test]
    fn test_invalid_sources_rejected() {
        let mut g = ExecutionGraph::new();
        let wy = g.add_write(0, Y, MemOrdering::Relaxed).unwrap();
        let f = g.add_fence(0, MemOrdering::SeqCst).unwrap();
        assert_eq!(
            g.add_read(0, X, MemOrdering::Relaxed, Some(wy)),
            Err(GraphError::AddressMismatch { write: wy, addr: X })
        );
        assert_eq!(
            g.add_read(0, X, MemOrdering::Relaxed, Some(f)),
            Err(GraphError::NotAWrite(f))
        );
        assert_eq!(g.add_fence(7, MemOrdering::SeqCst), Err(GraphError::UnknownThread(7)));
    }

    #[test]
    fn test_rmw_is_placed_after_its_source() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let w1 = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let w2 = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let (r, u) = g.add_rmw(t1, X, MemOrdering::AcqRel, w1).unwrap();
        assert!(g.is_rmw_load(r));
        assert!(g.is_rmw_store(u));
        assert_eq!(g.co(X), &[w1, u, w2]);
        assert_eq!(g.pending_rmw(u), None);
    }

    #[test]
    fn test_pending_rmw_detected() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let (r1, _) = g.add_rmw(t1, X, MemOrdering::Relaxed, Event::INIT).unwrap();
        let r2 = g.add_rmw_read(t2, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        let u2 = g.add_unplaced_write(t2, X, MemOrdering::Relaxed).unwrap();
        assert!(g.is_rmw_store(u2));
        assert_eq!(g.pending_rmw(u2), Some(r1));
        assert_ne!(g.pending_rmw(u2), Some(r2));
    }

    #[test]
    fn test_view_from_stamp() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let a = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        let b = g.add_write(0, X, MemOrdering::Relaxed).unwrap();
        let v = g.view_from_stamp(g.label(a).stamp());
        assert!(v.contains(a));
        assert!(!v.contains(b));
        assert!(v.contains(Event::INIT));
    }

    #[test]
    fn test_allocation_linkage() {
        let mut g = ExecutionGraph::new();
        let base = Addr::heap(0x100);
        let alloc = g.add_alloc(0, base, 16).unwrap();
        let w = g.add_write(0, Addr::heap(0x108), MemOrdering::NotAtomic).unwrap();
        let free = g.add_free(0, base).unwrap();
        assert_eq!(g.alloc_pred(w).unwrap().pos(), alloc);
        assert_eq!(g.free_pred(free).unwrap().pos(), alloc);
        let succs: Vec<Event> = g.alloc_succs(alloc).iter().map(|l| l.pos()).collect();
        assert_eq!(succs, vec![w]);
        let frees: Vec<Event> = g.free_succs(alloc).iter().map(|l| l.pos()).collect();
        assert_eq!(frees, vec![free]);
        let w2 = g.add_write(0, X, MemOrdering::NotAtomic).unwrap();
        assert!(g.alloc_pred(w2).is_none());
    }

    #[test]
    fn test_locations_are_accessed_addresses() {
        let mut g = ExecutionGraph::new();
        let block = Addr::heap(0x100);
        g.add_alloc(0, block, 16).unwrap();
        g.add_write(0, Y, MemOrdering::Relaxed).unwrap();
        g.add_read(0, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        g.add_free(0, block).unwrap();
        assert_eq!(g.locations(), vec![X, Y]);
    }

    #[test]
    fn test_hazptr_protection() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let base = Addr::heap(0x100);
        let hp = Addr::global(0x900);
        g.add_alloc(0, base, 8).unwrap();
        g.add_hp_protect(t1, hp, base).unwrap();
        let r = g.add_read(t1, base, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        assert!(g.is_hazptr_protected(r));

        g.add_hp_protect(t1, hp, Addr::heap(0x500)).unwrap();
        let r2 = g.add_read(t1, base, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        assert!(!g.is_hazptr_protected(r2));
    }

    #[test]
    fn test_joined_thread_is_finished() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        g.add_join(0, t1).unwrap();
        assert_eq!(
            g.add_write(t1, X, MemOrdering::Relaxed),
            Err(GraphError::ThreadFinished(t1))
        );
        assert_eq!(g.add_join(0, 9), Err(GraphError::UnknownThread(9)));
    }

    #[test]
    fn test_cut_to_view() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let r = g.add_read(t1, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        let w1 = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        let r2 = g.add_read(t2, X, MemOrdering::Relaxed, Some(w1)).unwrap();
        let w2 = g.add_write(t2, X, MemOrdering::Relaxed).unwrap();

        let mut keep = g.view_from_stamp(g.label(r).stamp());
        keep.update_idx(r2);
        g.cut_to_view(&keep);

        assert!(!g.contains(w1));
        assert!(!g.contains(w2));
        assert!(g.co(X).is_empty());
        assert_eq!(g.label(r2).rf(), None);
        assert_eq!(g.max_stamp().get() + 1, g.labels().count());
        let stamps: Vec<u32> = g.labels().map(|l| l.stamp().0).collect();
        assert!(stamps.windows(2).all(|w| w[0] + 1 == w[1]));
        assert_eq!(g.init_rfs_at(X), vec![r]);
    }

    #[test]
    fn test_revisitable_reads_skip_view() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let r1 = g.add_read(t1, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        let r2 = g.add_read(t2, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        let w = g.add_write(t2, X, MemOrdering::Relaxed).unwrap();
        let before = g.label(w).prefix_view().clone();
        assert_eq!(g.revisitable_reads(w, &before), vec![r1]);

        g.set_revisitable(r1, false).unwrap();
        assert!(g.revisitable_reads(w, &before).is_empty());
        assert!(g.label(r2).is_revisitable());
    }
}
