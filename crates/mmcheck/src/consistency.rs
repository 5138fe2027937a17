//! Acyclicity-based consistency checking.
//!
//! Every axiom of a memory model asks for one union of relations to be
//! acyclic, either over the whole graph or once per address. Acyclicity is
//! decided by an iterative DFS over labels keyed by stamp, with each label
//! moving Unseen -> Entered -> Left. Reaching an Entered label closes a cycle.
//! All traversal state lives in a [`VisitContext`] built for a single call.

use std::fmt;

use log::{debug, trace};

use crate::config::CheckerConfig;
use crate::event::{Addr, Event};
use crate::graph::ExecutionGraph;
use crate::hb::HappensBefore;
use crate::label::{EventLabel, LabelKind};
use crate::model::{MemoryModel, ModelSpec};
use crate::relation::{on_location, DerivedRelations, Relation, Scope};

/// Why a graph was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inconsistency {
    pub axiom: &'static str,
    /// Where the cycle was closed, or the RMW whose atomicity broke.
    pub event: Event,
    /// Set for per-location axioms.
    pub location: Option<Addr>,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "axiom '{}' violated at {}", self.axiom, self.event)?;
        if let Some(loc) = self.location {
            write!(f, " on {loc}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeStatus {
    Unseen,
    Entered,
    Left,
}

#[derive(Clone, Copy, Debug)]
struct NodeCountStatus {
    count: u32,
    status: NodeStatus,
}

impl NodeCountStatus {
    const UNSEEN: Self = Self {
        count: 0,
        status: NodeStatus::Unseen,
    };
}

struct VisitContext<'g> {
    g: &'g ExecutionGraph,
    hb: &'g HappensBefore,
    derived: &'g DerivedRelations,
    visited: Vec<NodeCountStatus>,
    /// Number of labels currently Entered.
    accepting: u32,
}

impl<'g> VisitContext<'g> {
    fn new(g: &'g ExecutionGraph, hb: &'g HappensBefore, derived: &'g DerivedRelations) -> Self {
        Self {
            g,
            hb,
            derived,
            visited: Vec::new(),
            accepting: 0,
        }
    }

    fn reset(&mut self) {
        self.accepting = 0;
        self.visited.clear();
        self.visited
            .resize(self.g.max_stamp().get() + 1, NodeCountStatus::UNSEEN);
    }

    fn node(&mut self, e: Event) -> &mut NodeCountStatus {
        let stamp = self.g.label(e).stamp().get();
        &mut self.visited[stamp]
    }

    fn enter(&mut self, e: Event) {
        self.accepting += 1;
        let count = self.accepting;
        *self.node(e) = NodeCountStatus {
            count,
            status: NodeStatus::Entered,
        };
    }

    fn leave(&mut self, e: Event) {
        self.accepting -= 1;
        let count = self.accepting;
        *self.node(e) = NodeCountStatus {
            count,
            status: NodeStatus::Left,
        };
    }

    /// Folds over all labels in stamp order. Returns the event closing the
    /// first cycle found.
    fn check_acyclic(&mut self, relations: &[Relation], loc: Option<Addr>) -> Result<(), Event> {
        self.reset();
        let g = self.g;
        for lab in g.labels() {
            if self.node(lab.pos()).status == NodeStatus::Unseen {
                self.visit(lab.pos(), relations, loc)?;
            }
        }
        Ok(())
    }

    fn visit(&mut self, root: Event, relations: &[Relation], loc: Option<Addr>) -> Result<(), Event> {
        let mut stack: Vec<(Event, Vec<Event>, usize)> = Vec::new();
        self.enter(root);
        stack.push((root, self.successors(root, relations, loc), 0));

        while let Some((e, succs, next)) = stack.last_mut() {
            let Some(&succ) = succs.get(*next) else {
                let e = *e;
                stack.pop();
                self.leave(e);
                continue;
            };
            *next += 1;
            let node = *self.node(succ);
            match node.status {
                NodeStatus::Unseen => {
                    self.enter(succ);
                    let succs = self.successors(succ, relations, loc);
                    stack.push((succ, succs, 0));
                }
                NodeStatus::Entered => {
                    trace!(
                        "cycle through {succ} spanning {} labels",
                        self.accepting - node.count + 1
                    );
                    return Err(succ);
                }
                NodeStatus::Left => {}
            }
        }
        Ok(())
    }

    fn successors(&self, e: Event, relations: &[Relation], loc: Option<Addr>) -> Vec<Event> {
        let g = self.g;
        let lab = g.label(e);
        let mut out = Vec::new();
        for &rel in relations {
            if rel.is_location_bound() && !on_location(g, e, loc) {
                continue;
            }
            match rel {
                Relation::Po => out.extend(g.po_imm_succ(e).map(EventLabel::pos)),
                Relation::PoLoc => {
                    if let Some(addr) = lab.access_addr() {
                        out.extend(
                            g.thread_labels(e.thread)[e.index as usize + 1..]
                                .iter()
                                .find(|l| l.access_addr() == Some(addr))
                                .map(EventLabel::pos),
                        );
                    }
                }
                Relation::PpoTso => out.extend(ppo_tso_succs(g, e)),
                Relation::Rf | Relation::Rfe => {
                    if lab.is_write_like() {
                        out.extend(
                            g.readers(e)
                                .filter(|r| on_location(g, r.pos(), loc))
                                .filter(|r| rel == Relation::Rf || r.pos().thread != e.thread)
                                .map(EventLabel::pos),
                        );
                    }
                }
                Relation::Co => match lab.kind() {
                    LabelKind::Init => out.extend(self.init_co_succs(loc, |_| true)),
                    LabelKind::Write { .. } => out.extend(g.co_imm_succ(e)),
                    _ => {}
                },
                Relation::Fr => {
                    if lab.is_read() {
                        out.extend(g.fr_imm_succ(e));
                    }
                }
                Relation::Tc => out.extend(g.tc_succ(e).map(EventLabel::pos)),
                Relation::Tj => out.extend(g.tj_succs(e).into_iter().map(EventLabel::pos)),
                Relation::Sw => out.extend_from_slice(self.hb.sw_succs(e)),
                Relation::ScPo => {
                    if is_sc(lab) {
                        out.extend(
                            g.thread_labels(e.thread)[e.index as usize + 1..]
                                .iter()
                                .find(|l| is_sc(l))
                                .map(EventLabel::pos),
                        );
                    }
                }
                Relation::ScRf => {
                    if is_sc(lab) && lab.is_write_like() {
                        out.extend(
                            g.readers(e)
                                .filter(|r| is_sc(r) && on_location(g, r.pos(), loc))
                                .map(EventLabel::pos),
                        );
                    }
                }
                Relation::ScCo => match lab.kind() {
                    LabelKind::Init => {
                        out.extend(self.init_co_succs(loc, |w| is_sc(g.label(w))));
                    }
                    LabelKind::Write { .. } if is_sc(lab) => {
                        out.extend(g.co_succs(e).iter().copied().find(|&w| is_sc(g.label(w))));
                    }
                    _ => {}
                },
                Relation::ScFr => {
                    if let (true, Some(addr), Some(src)) = (is_sc(lab), lab.access_addr(), lab.rf())
                    {
                        let after = match src {
                            Event::INIT => g.co(addr),
                            w => g.co_succs(w),
                        };
                        out.extend(after.iter().copied().find(|&w| is_sc(g.label(w))));
                    }
                }
                Relation::ScFence => {
                    if is_sc(lab) && !e.is_init() {
                        out.extend(self.sc_fence_succs(lab));
                    }
                }
                Relation::Derived(kind) => {
                    out.extend_from_slice(self.derived.successors(kind, e));
                }
            }
        }
        out
    }

    /// Labels `e` is hb-before.
    fn hb_succs(&self, e: Event) -> impl Iterator<Item = &'g EventLabel> + '_ {
        let g = self.g;
        g.labels()
            .filter(move |l| l.pos() != e && self.hb.view(g, l.pos()).contains(e))
    }

    /// SC order edges leaving an SC access or SC fence through fences:
    /// `[E_sc]; hb; [F_sc]`, `[F_sc]; hb; [E_sc]` and
    /// `[F_sc]; hb; eco; hb; [F_sc]`.
    fn sc_fence_succs(&self, lab: &EventLabel) -> Vec<Event> {
        let g = self.g;
        let e = lab.pos();
        if !lab.is_fence() {
            return self
                .hb_succs(e)
                .filter(|l| l.is_fence() && is_sc(l))
                .map(EventLabel::pos)
                .collect();
        }

        let mut out: Vec<Event> = self
            .hb_succs(e)
            .filter(|l| is_sc(l))
            .map(EventLabel::pos)
            .collect();
        let eco_after: Vec<Event> = self
            .hb_succs(e)
            .flat_map(|l| eco_succs(g, l))
            .collect();
        out.extend(
            g.labels()
                .filter(|f| f.is_fence() && is_sc(f) && f.pos() != e)
                .filter(|f| {
                    let before = self.hb.view(g, f.pos());
                    eco_after.iter().any(|&ev| before.contains(ev))
                })
                .map(EventLabel::pos),
        );
        out.sort_unstable();
        out.dedup();
        out
    }

    /// First write (matching `pred`) in the coherence order of `loc`, or of
    /// every location when unscoped.
    fn init_co_succs(&self, loc: Option<Addr>, pred: impl Fn(Event) -> bool) -> Vec<Event> {
        let g = self.g;
        let locs = match loc {
            Some(addr) => vec![addr],
            None => g.locations(),
        };
        locs.into_iter()
            .filter_map(|addr| g.co(addr).iter().copied().find(|&w| pred(w)))
            .collect()
    }
}

fn is_sc(lab: &EventLabel) -> bool {
    lab.ordering().is_sc()
        && (lab.is_mem_access() || lab.is_fence() || matches!(lab.kind(), LabelKind::Init))
}

/// Extended coherence successors of an access: writes co-after what it
/// reads or writes, and the reads observing those writes or itself.
fn eco_succs(g: &ExecutionGraph, lab: &EventLabel) -> Vec<Event> {
    let Some(addr) = lab.access_addr() else {
        return Vec::new();
    };
    let writes: &[Event] = if lab.is_read() {
        match lab.rf() {
            Some(Event::INIT) => g.co(addr),
            Some(src) => g.co_succs(src),
            None => &[],
        }
    } else if lab.is_write() {
        g.co_succs(lab.pos())
    } else {
        &[]
    };
    let mut succs = writes.to_vec();
    if lab.is_write() {
        succs.extend(g.readers(lab.pos()).map(EventLabel::pos));
    }
    for &w in writes {
        succs.extend(g.readers(w).map(EventLabel::pos));
    }
    succs
}

fn is_plain_write(lab: &EventLabel) -> bool {
    lab.is_write() && !lab.is_rmw_write()
}

fn is_plain_read(lab: &EventLabel) -> bool {
    lab.is_read() && !lab.is_rmw_read()
}

fn is_tso_barrier(lab: &EventLabel) -> bool {
    (lab.is_fence() && lab.ordering().is_sc()) || lab.is_rmw_read() || lab.is_rmw_write()
}

/// po-later labels that stay ordered after `e` on TSO. A plain write may be
/// reordered with a later plain read unless a barrier sits between them.
fn ppo_tso_succs(g: &ExecutionGraph, e: Event) -> Vec<Event> {
    let labels = g.thread_labels(e.thread);
    let lab = &labels[e.index as usize];
    if !is_plain_write(lab) {
        return labels[e.index as usize + 1..].iter().map(EventLabel::pos).collect();
    }
    let mut succs = Vec::new();
    let mut fenced = false;
    for later in &labels[e.index as usize + 1..] {
        if fenced || !is_plain_read(later) {
            succs.push(later.pos());
        }
        fenced |= is_tso_barrier(later);
    }
    succs
}

/// An RMW write must sit immediately co-after the write its read part saw.
fn check_atomicity(g: &ExecutionGraph) -> Result<(), Inconsistency> {
    for lab in g.labels().filter(|l| l.is_rmw_write()) {
        if !g.is_placed(lab.pos()) {
            continue;
        }
        let read = match g.po_imm_pred(lab.pos()) {
            Some(read) if read.is_rmw_read() => read,
            _ => panic!("RMW write {} has no read part", lab.pos()),
        };
        let Some(src) = read.rf() else {
            continue;
        };
        if g.co_imm_pred(lab.pos()) != Some(src) {
            return Err(Inconsistency {
                axiom: "atomicity",
                event: lab.pos(),
                location: lab.access_addr(),
            });
        }
    }
    Ok(())
}

/// Decides whether an execution graph is consistent under one memory model.
#[derive(Clone, Copy, Debug)]
pub struct ConsistencyChecker {
    config: CheckerConfig,
}

impl ConsistencyChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn model(&self) -> MemoryModel {
        self.config.model
    }

    fn spec(&self) -> &'static ModelSpec {
        self.config.model.spec()
    }

    pub fn happens_before(&self, g: &ExecutionGraph) -> HappensBefore {
        HappensBefore::new(g, self.spec().sync)
    }

    /// The model's derived relations over `g`; empty for models without any.
    pub fn derived_relations(&self, g: &ExecutionGraph) -> DerivedRelations {
        DerivedRelations::calculate(g, self.spec().derived)
    }

    pub fn is_consistent(&self, g: &ExecutionGraph) -> bool {
        self.check_consistency(g).is_ok()
    }

    pub fn check_consistency(&self, g: &ExecutionGraph) -> Result<(), Inconsistency> {
        let hb = self.happens_before(g);
        let derived = self.derived_relations(g);
        let mut ctx = VisitContext::new(g, &hb, &derived);

        for axiom in self.spec().axioms {
            let locations = match axiom.scope {
                Scope::Global => vec![None],
                Scope::PerLocation => g.locations().into_iter().map(Some).collect(),
            };
            for loc in locations {
                if let Err(event) = ctx.check_acyclic(axiom.relations, loc) {
                    debug!("{} rejects graph: '{}' cycle at {event}", self.model(), axiom.name);
                    return Err(Inconsistency {
                        axiom: axiom.name,
                        event,
                        location: loc,
                    });
                }
            }
        }
        check_atomicity(g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::MemOrdering;
    use crate::relation::DerivedKind;

    const X: Addr = Addr::global(0x10);
    const Y: Addr = Addr::global(0x20);

    fn checker(model: MemoryModel) -> ConsistencyChecker {
        ConsistencyChecker::new(CheckerConfig::new(model))
    }

    /// Store buffering with both reads observing the initializer.
    fn store_buffering(ordering: MemOrdering, fenced: bool) -> ExecutionGraph {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        for (t, mine, other) in [(t1, X, Y), (t2, Y, X)] {
            g.add_write(t, mine, ordering).unwrap();
            if fenced {
                g.add_fence(t, MemOrdering::SeqCst).unwrap();
            }
            g.add_read(t, other, ordering, Some(Event::INIT)).unwrap();
        }
        g
    }

    /// Message passing where the data read misses the published write.
    fn stale_message_passing(w_ord: MemOrdering, r_ord: MemOrdering) -> ExecutionGraph {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        let flag = g.add_write(t1, Y, w_ord).unwrap();
        g.add_read(t2, Y, r_ord, Some(flag)).unwrap();
        g.add_read(t2, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        g
    }

    #[test]
    fn test_store_buffering() {
        let relaxed = store_buffering(MemOrdering::Relaxed, false);
        assert!(!checker(MemoryModel::Sc).is_consistent(&relaxed));
        assert!(checker(MemoryModel::Tso).is_consistent(&relaxed));
        assert!(checker(MemoryModel::Ra).is_consistent(&relaxed));
        assert!(checker(MemoryModel::Rc11).is_consistent(&relaxed));
        assert!(checker(MemoryModel::Jam21).is_consistent(&relaxed));

        let fenced = store_buffering(MemOrdering::Relaxed, true);
        assert!(!checker(MemoryModel::Tso).is_consistent(&fenced));
    }

    #[test]
    fn test_sc_accesses_forbid_store_buffering() {
        let g = store_buffering(MemOrdering::SeqCst, false);
        let err = checker(MemoryModel::Rc11).check_consistency(&g).unwrap_err();
        assert_eq!(err.axiom, "sc-order");
        let err = checker(MemoryModel::Jam21).check_consistency(&g).unwrap_err();
        assert_eq!(err.axiom, "volatile-order");
    }

    #[test]
    fn test_sc_fences_forbid_store_buffering() {
        let fenced = store_buffering(MemOrdering::Relaxed, true);
        for model in [MemoryModel::Rc11, MemoryModel::Imm] {
            let err = checker(model).check_consistency(&fenced).unwrap_err();
            assert_eq!(err.axiom, "sc-order", "{model}");
        }

        // One fence alone orders nothing.
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        g.add_fence(t1, MemOrdering::SeqCst).unwrap();
        g.add_read(t1, Y, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        g.add_write(t2, Y, MemOrdering::Relaxed).unwrap();
        g.add_read(t2, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        for model in [MemoryModel::Rc11, MemoryModel::Imm] {
            assert!(checker(model).is_consistent(&g), "{model}");
        }
    }

    #[test]
    fn test_message_passing_needs_synchronization() {
        let g = stale_message_passing(MemOrdering::Release, MemOrdering::Acquire);
        let err = checker(MemoryModel::Rc11).check_consistency(&g).unwrap_err();
        assert_eq!(err.axiom, "coherence");
        assert_eq!(err.location, Some(X));
        assert!(!checker(MemoryModel::Ra).is_consistent(&g));

        let g = stale_message_passing(MemOrdering::Relaxed, MemOrdering::Relaxed);
        assert!(checker(MemoryModel::Rc11).is_consistent(&g));
        assert!(checker(MemoryModel::Imm).is_consistent(&g));
        assert!(!checker(MemoryModel::Ra).is_consistent(&g));
    }

    #[test]
    fn test_load_buffering() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let ry = g.add_read(t1, Y, MemOrdering::Relaxed, None).unwrap();
        let wx = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        g.add_read(t2, X, MemOrdering::Relaxed, Some(wx)).unwrap();
        let wy = g.add_write(t2, Y, MemOrdering::Relaxed).unwrap();
        g.change_rf(ry, Some(wy)).unwrap();

        let err = checker(MemoryModel::Rc11).check_consistency(&g).unwrap_err();
        assert_eq!(err.axiom, "no-thin-air");
        assert!(checker(MemoryModel::Imm).is_consistent(&g));
    }

    #[test]
    fn test_coherent_read_read() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let w1 = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        let w2 = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        g.add_read(t2, X, MemOrdering::Relaxed, Some(w2)).unwrap();
        let r = g.add_read(t2, X, MemOrdering::Relaxed, Some(w2)).unwrap();
        for model in MemoryModel::ALL {
            assert!(checker(model).is_consistent(&g), "{model}");
        }

        g.change_rf(r, Some(w1)).unwrap();
        for model in MemoryModel::ALL {
            assert!(!checker(model).is_consistent(&g), "{model}");
        }
    }

    #[test]
    fn test_atomicity_violation() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let (_, t2) = g.spawn_thread(0).unwrap();
        let (_, u1) = g.add_rmw(t1, X, MemOrdering::Relaxed, Event::INIT).unwrap();
        g.add_rmw_read(t2, X, MemOrdering::Relaxed, Some(Event::INIT)).unwrap();
        let u2 = g.add_unplaced_write(t2, X, MemOrdering::Relaxed).unwrap();
        g.place_write(u2, u1).unwrap();

        for model in MemoryModel::ALL {
            assert_eq!(
                checker(model).check_consistency(&g),
                Err(Inconsistency {
                    axiom: "atomicity",
                    event: u2,
                    location: Some(X),
                }),
                "{model}"
            );
        }
    }

    #[test]
    fn test_thread_create_orders_events() {
        let mut g = ExecutionGraph::new();
        let w = g.add_write(0, X, MemOrdering::NotAtomic).unwrap();
        let (_, t1) = g.spawn_thread(0).unwrap();
        g.add_read(t1, X, MemOrdering::NotAtomic, Some(Event::INIT)).unwrap();
        assert!(!checker(MemoryModel::Sc).is_consistent(&g));
        assert!(!checker(MemoryModel::Rc11).is_consistent(&g));

        let r = g.add_read(t1, X, MemOrdering::NotAtomic, Some(w));
        assert!(r.is_ok());
    }

    #[test]
    fn test_jam21_derived_relations() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let a = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        g.add_write(t1, Y, MemOrdering::Release).unwrap();
        let c = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();

        let derived = checker(MemoryModel::Jam21).derived_relations(&g);
        assert_eq!(derived.pairs(DerivedKind::Ra), vec![(a, c)]);
        assert!(checker(MemoryModel::Jam21).is_consistent(&g));
        assert!(checker(MemoryModel::Rc11)
            .derived_relations(&g)
            .pairs(DerivedKind::Ra)
            .is_empty());
    }

    #[test]
    fn test_verdicts_are_repeatable() {
        let g = store_buffering(MemOrdering::SeqCst, false);
        for model in MemoryModel::ALL {
            let c = checker(model);
            assert_eq!(c.check_consistency(&g), c.check_consistency(&g));
        }
    }

    #[test]
    fn test_inconsistency_display() {
        let err = Inconsistency {
            axiom: "coherence",
            event: Event::new(2, 3),
            location: Some(X),
        };
        assert_eq!(err.to_string(), "axiom 'coherence' violated at (2, 3) on 0x10");
    }
}
