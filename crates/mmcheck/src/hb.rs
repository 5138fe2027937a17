//! Happens-before: po, synchronizes-with, thread create and thread join.
//!
//! A [`HappensBefore`] is computed for one graph snapshot and dropped at the
//! end of the check that built it.

use std::collections::HashMap;

use log::trace;

use crate::event::Event;
use crate::graph::ExecutionGraph;
use crate::label::LabelKind;
use crate::model::SyncPolicy;
use crate::vv::View;

/// Events a write synchronizes from: the write itself when it is a release,
/// the last po-earlier release fence, and, for an RMW write, the release
/// heads of the write its read part observed.
pub fn release_heads(g: &ExecutionGraph, write: Event) -> Vec<Event> {
    let mut heads = Vec::new();
    let mut cur = Some(write);
    while let Some(w) = cur.take() {
        if w.is_init() {
            break;
        }
        let lab = g.label(w);
        if lab.ordering().is_at_least_release() {
            heads.push(w);
        } else if lab.ordering().is_atomic() {
            let fence = g.thread_labels(w.thread)[..w.index as usize]
                .iter()
                .rev()
                .find(|l| l.is_fence() && l.ordering().is_at_least_release());
            heads.extend(fence.map(|f| f.pos()));
        }
        if lab.is_rmw_write() {
            cur = g.po_imm_pred(w).and_then(|r| r.rf());
        }
    }
    heads.sort_unstable();
    heads.dedup();
    heads
}

/// The event a read synchronizes into: the read itself when it is an
/// acquire, else the first po-later acquire fence.
pub fn acquire_tail(g: &ExecutionGraph, read: Event) -> Option<Event> {
    let lab = g.label(read);
    if !lab.ordering().is_atomic() {
        return None;
    }
    if lab.ordering().is_at_least_acquire() {
        return Some(read);
    }
    g.thread_labels(read.thread)[read.index as usize + 1..]
        .iter()
        .find(|l| l.is_fence() && l.ordering().is_at_least_acquire())
        .map(|l| l.pos())
}

/// Synchronizes-with edges and per-label hb views of one graph.
#[derive(Clone, Debug)]
pub struct HappensBefore {
    sw_succs: HashMap<Event, Vec<Event>>,
    sw_preds: HashMap<Event, Vec<Event>>,
    /// Indexed by stamp.
    views: Vec<View>,
}

impl HappensBefore {
    pub fn new(g: &ExecutionGraph, policy: SyncPolicy) -> Self {
        let mut hb = Self {
            sw_succs: HashMap::new(),
            sw_preds: HashMap::new(),
            views: Vec::new(),
        };
        for read in g.labels().filter(|l| l.is_read()) {
            let Some(write) = read.rf().filter(|w| !w.is_init()) else {
                continue;
            };
            let wlab = g.label(write);
            let (heads, tail) = match policy {
                SyncPolicy::AllReadsFrom => (vec![write], Some(read.pos())),
                SyncPolicy::AtomicReadsFrom => {
                    if wlab.ordering().is_atomic() && read.ordering().is_atomic() {
                        (vec![write], Some(read.pos()))
                    } else {
                        (Vec::new(), None)
                    }
                }
                SyncPolicy::Annotated => (release_heads(g, write), acquire_tail(g, read.pos())),
            };
            let Some(tail) = tail else {
                continue;
            };
            for head in heads {
                trace!("sw {head} -> {tail}");
                hb.sw_succs.entry(head).or_default().push(tail);
                hb.sw_preds.entry(tail).or_default().push(head);
            }
        }
        hb.compute_views(g);
        hb
    }

    fn compute_views(&mut self, g: &ExecutionGraph) {
        self.views = g
            .labels()
            .map(|l| {
                let mut v = View::new();
                v.update_idx(l.pos());
                v
            })
            .collect();
        // sw and revisited rf edges can point backwards in stamp order.
        loop {
            let mut changed = false;
            for lab in g.labels() {
                let mut view = self.views[lab.stamp().get()].clone();
                let mut incoming: Vec<Event> = Vec::new();
                incoming.extend(lab.pos().prev());
                match lab.kind() {
                    LabelKind::ThreadStart { parent_create } => incoming.push(*parent_create),
                    LabelKind::ThreadJoin { child } => {
                        incoming.extend(g.last_label(*child).map(|l| l.pos()))
                    }
                    _ => {}
                }
                incoming.extend(self.sw_preds(lab.pos()));
                for pred in incoming {
                    if let Some(pl) = g.get_label(pred) {
                        view.update(&self.views[pl.stamp().get()]);
                    }
                }
                if view != self.views[lab.stamp().get()] {
                    self.views[lab.stamp().get()] = view;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    pub fn sw_succs(&self, e: Event) -> &[Event] {
        self.sw_succs.get(&e).map_or(&[], Vec::as_slice)
    }

    pub fn sw_preds(&self, e: Event) -> &[Event] {
        self.sw_preds.get(&e).map_or(&[], Vec::as_slice)
    }

    /// The hb view of `e` (which contains `e` itself).
    pub fn view(&self, g: &ExecutionGraph, e: Event) -> &View {
        &self.views[g.label(e).stamp().get()]
    }

    pub fn is_hb_before(&self, g: &ExecutionGraph, a: Event, b: Event) -> bool {
        a != b && self.view(g, b).contains(a)
    }
}
