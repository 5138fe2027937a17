//! Branching oracle for the exploration driver: where a read may read from,
//! where a store may go in coherence order, and which reads a new store may
//! revisit.
//!
//! Causality here is happens-before under the model's sync policy; only the
//! revisit prefix is a porf view. Split points are indices into a coherence
//! slice, which leaves the initializer out.

use log::trace;

use crate::config::CheckerConfig;
use crate::event::{Addr, Event};
use crate::graph::ExecutionGraph;
use crate::hb::HappensBefore;
use crate::label::EventLabel;
use crate::model::SyncPolicy;
use crate::vv::View;

/// hb views of one graph snapshot.
struct Causality<'g> {
    g: &'g ExecutionGraph,
    hb: HappensBefore,
}

impl<'g> Causality<'g> {
    fn new(g: &'g ExecutionGraph, sync: SyncPolicy) -> Self {
        Self {
            g,
            hb: HappensBefore::new(g, sync),
        }
    }

    fn view(&self, e: Event) -> &View {
        self.hb.view(self.g, e)
    }

    /// Whether `write`, or a read observing it, is hb-before `e`.
    fn is_write_rf_before(&self, write: Event, e: Event) -> bool {
        let before = self.view(e);
        before.contains(write) || self.g.readers(write).any(|r| before.contains(r.pos()))
    }

    /// Whether `e` is hb-before `write` or a read observing it.
    fn is_hb_opt_rf_before(&self, e: Event, write: Event) -> bool {
        self.view(write).contains(e) || self.g.readers(write).any(|r| self.view(r.pos()).contains(e))
    }

    /// Index into `co` of the first write after every write (rf?;hb)-before `e`.
    fn split_before(&self, co: &[Event], e: Event) -> usize {
        co.iter()
            .rposition(|&w| self.is_write_rf_before(w, e))
            .map_or(0, |i| i + 1)
    }

    /// Index into `co` of the first write `e` is (hb;rf?)-before.
    fn split_after(&self, co: &[Event], e: Event) -> usize {
        co.iter()
            .position(|&w| self.is_hb_opt_rf_before(e, w))
            .unwrap_or(co.len())
    }

    /// Like [`Causality::split_after`], but the first such write is kept
    /// when `read` is only before one of its readers.
    fn split_after_hb(&self, addr: Addr, co: &[Event], read: Event) -> usize {
        if self
            .g
            .init_rfs_at(addr)
            .iter()
            .any(|&r| self.view(r).contains(read))
        {
            return 0;
        }
        match self.split_after(co, read) {
            i if i == co.len() => i,
            i if self.view(co[i]).contains(read) => i,
            i => i + 1,
        }
    }

    /// hb view of the po-predecessor of `read`: what stays before it once
    /// its incoming rf is replaced.
    fn view_without_rf(&self, read: Event) -> Option<&View> {
        self.g.po_imm_pred(read).map(|p| self.view(p.pos()))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CoherenceEngine {
    sync: SyncPolicy,
    dep_tracking: bool,
}

impl CoherenceEngine {
    pub fn new(config: CheckerConfig) -> Self {
        let spec = config.model.spec();
        Self {
            sync: spec.sync,
            dep_tracking: spec.dep_tracking,
        }
    }

    pub fn is_dep_tracking(&self) -> bool {
        self.dep_tracking
    }

    fn causality<'g>(&self, g: &'g ExecutionGraph) -> Causality<'g> {
        Causality::new(g, self.sync)
    }

    /// Index of the first write at `addr` after every write that is
    /// (rf?;hb)-before `e`.
    pub fn split_loc_mo_before(&self, g: &ExecutionGraph, addr: Addr, e: Event) -> usize {
        self.causality(g).split_before(g.co(addr), e)
    }

    /// Index of the first write at `addr` that `read` is (hb;rf?)-before;
    /// that write is kept when it is not hb-after the read itself.
    pub fn split_loc_mo_after_hb(&self, g: &ExecutionGraph, addr: Addr, read: Event) -> usize {
        self.causality(g).split_after_hb(addr, g.co(addr), read)
    }

    /// Index of the first write at `addr` that `e` is (hb;rf?)-before.
    pub fn split_loc_mo_after(&self, g: &ExecutionGraph, addr: Addr, e: Event) -> usize {
        self.causality(g).split_after(g.co(addr), e)
    }

    /// Writes co-after `store`, then the reads observing them.
    pub fn mo_opt_rf_after(&self, g: &ExecutionGraph, store: Event) -> Vec<Event> {
        let succs = g.co_succs(store);
        let mut after: Vec<Event> = succs.to_vec();
        for &w in succs {
            after.extend(g.readers(w).map(EventLabel::pos));
        }
        after
    }

    /// Writes co-before `store`, the reads observing them, then the reads of
    /// the initializer at the same address.
    pub fn mo_inv_opt_rf_after(&self, g: &ExecutionGraph, store: Event) -> Vec<Event> {
        let preds = g.co_preds(store);
        let mut after: Vec<Event> = preds.to_vec();
        for &w in preds {
            after.extend(g.readers(w).map(EventLabel::pos));
        }
        if let Some(addr) = g.label(store).access_addr() {
            after.extend(g.init_rfs_at(addr));
        }
        after
    }

    /// Stores `read` may read from without breaking coherence. Never empty.
    pub fn coherent_stores(&self, g: &ExecutionGraph, addr: Addr, read: Event) -> Vec<Event> {
        let co_max = g.co_max(addr);
        if co_max.thread == read.thread && co_max.index < read.index {
            return vec![co_max];
        }

        let cx = self.causality(g);
        let co = g.co(addr);
        let begin = cx.split_before(co, read);
        let mut stores = vec![match begin {
            0 => Event::INIT,
            i => co[i - 1],
        }];
        let end = if self.dep_tracking {
            cx.split_after_hb(addr, co, read).max(begin)
        } else {
            co.len()
        };
        stores.extend_from_slice(&co[begin..end]);
        trace!("coherent stores for {read}: {stores:?}");
        stores
    }

    fn revisitable_from(
        &self,
        g: &ExecutionGraph,
        store: Event,
        prior_view: &View,
        co_pred: Event,
    ) -> Vec<Event> {
        let addr = g.label(store).access_addr();
        let mut loads: Vec<Event> = g
            .readers(co_pred)
            .filter(|r| {
                !prior_view.contains(r.pos())
                    && r.access_addr() == addr
                    && r.is_revisitable()
                    && r.was_added_max()
            })
            .map(EventLabel::pos)
            .collect();
        g.drop_after_pending_rmw(store, &mut loads);
        loads
    }

    /// Reads `store` may revisit. `prior_view` is the porf-prefix of the
    /// store, which revisited reads must not belong to.
    pub fn coherent_revisits(&self, g: &ExecutionGraph, store: Event, prior_view: &View) -> Vec<Event> {
        let Some(addr) = g.label(store).access_addr() else {
            return Vec::new();
        };

        let prev_co_max = g.co(addr).iter().rev().copied().find(|&w| w != store);
        let mut loads = match prev_co_max {
            Some(prev) if prior_view.contains(prev) => {
                self.revisitable_from(g, store, prior_view, prev)
            }
            _ => g.revisitable_reads(store, prior_view),
        };

        if !self.dep_tracking && g.is_co_maximal(addr, store) {
            return loads;
        }

        let cx = self.causality(g);

        // (co;rf?;hb?;po)-after reads
        let opt_rfs = self.mo_opt_rf_after(g, store);
        loads.retain(|&r| {
            cx.view_without_rf(r)
                .map_or(true, |before| !opt_rfs.iter().any(|&ev| before.contains(ev)))
        });

        if !self.dep_tracking {
            return loads;
        }

        let store_view = cx.view(store);
        loads.retain(|&r| !store_view.contains(r));

        // (co^-1;rf?;hb^-1?;po^-1)-after reads in the graph that results from
        // the revisit
        let mo_inv = self.mo_inv_opt_rf_after(g, store);
        loads.retain(|&r| {
            let mut v = g.view_from_stamp(g.label(r).stamp());
            v.update(prior_view);
            !mo_inv.iter().any(|&ev| v.contains(ev) && cx.view(ev).contains(r))
        });
        loads
    }

    /// Writes `store` may be placed immediately co-after.
    pub fn coherent_placings(&self, g: &ExecutionGraph, addr: Addr, store: Event, is_rmw: bool) -> Vec<Event> {
        if is_rmw {
            let src = g
                .po_imm_pred(store)
                .filter(|r| r.is_rmw_read())
                .and_then(EventLabel::rf);
            return match src {
                Some(src) => vec![src],
                None => panic!("RMW store {store} has no committed read part"),
            };
        }

        let cx = self.causality(g);
        let co: Vec<Event> = g.co(addr).iter().copied().filter(|&w| w != store).collect();
        let pred_of = |i: usize| if i == 0 { Event::INIT } else { co[i - 1] };

        let begin = cx.split_before(&co, store);
        let end = if self.dep_tracking {
            cx.split_after(&co, store).max(begin)
        } else {
            co.len()
        };

        let mut placings: Vec<Event> = (begin..end)
            .filter(|&i| !g.is_rmw_store(co[i]))
            .map(pred_of)
            .collect();
        placings.push(if end == co.len() {
            co.last().copied().unwrap_or(Event::INIT)
        } else {
            pred_of(end)
        });
        trace!("coherent placings for {store}: {placings:?}");
        placings
    }
}
