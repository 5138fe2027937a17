//! Relations the consistency axioms are built from, and the derived relations
//! computed by pattern-matching short po windows.

use std::collections::HashMap;

use crate::event::{Addr, Event};
use crate::graph::ExecutionGraph;
use crate::label::{EventLabel, MemOrdering};

/// Auxiliary relations computed per label from the labels preceding it in po.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DerivedKind {
    /// `po; [REL | ACQ | SC access]; po`
    Ra,
    /// `po; [F rel]; po; [R | W]; po; [F acq]; po`
    Svo,
    /// `po; [F sc]; po`
    Spush,
    /// `[SC access]; po; [SC access]`
    Volint,
}

impl DerivedKind {
    pub fn name(self) -> &'static str {
        match self {
            DerivedKind::Ra => "ra",
            DerivedKind::Svo => "svo",
            DerivedKind::Spush => "spush",
            DerivedKind::Volint => "volint",
        }
    }
}

/// A relation an axiom takes the union of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    Po,
    /// po between accesses to the same address.
    PoLoc,
    /// TSO preserved program order: po minus write-read pairs that are not
    /// separated by an SC fence or an RMW.
    PpoTso,
    Rf,
    /// rf between different threads.
    Rfe,
    Co,
    Fr,
    Tc,
    Tj,
    /// Synchronizes-with, as selected by the model's sync policy.
    Sw,
    /// po restricted to SC labels.
    ScPo,
    ScRf,
    ScCo,
    ScFr,
    /// SC order through SC fences: `[E_sc]; hb; [F_sc]`, `[F_sc]; hb; [E_sc]`
    /// and `[F_sc]; hb; eco; hb; [F_sc]`.
    ScFence,
    Derived(DerivedKind),
}

impl Relation {
    /// Whether the relation only relates accesses to one address, and so is
    /// filtered under a per-location scope.
    pub fn is_location_bound(self) -> bool {
        matches!(
            self,
            Relation::PoLoc
                | Relation::Rf
                | Relation::Rfe
                | Relation::Co
                | Relation::Fr
                | Relation::ScRf
                | Relation::ScCo
                | Relation::ScFr
        )
    }
}

/// Whether an axiom runs once over the whole graph or once per address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Global,
    PerLocation,
}

/// Computes the derived edge ending at `lab`, if its po window matches.
pub type DerivedBuilder = fn(&ExecutionGraph, &EventLabel) -> Option<(Event, Event)>;

fn po_window<'g>(g: &'g ExecutionGraph, lab: &EventLabel, n: usize) -> Option<Vec<&'g EventLabel>> {
    let mut window = Vec::with_capacity(n);
    let mut cur = lab.pos();
    for _ in 0..n {
        let prev = g.po_imm_pred(cur)?;
        cur = prev.pos();
        window.push(prev);
    }
    Some(window)
}

fn is_release_fence(lab: &EventLabel) -> bool {
    lab.is_fence() && lab.ordering().is_at_least_release()
}

fn is_acquire_fence(lab: &EventLabel) -> bool {
    lab.is_fence() && lab.ordering().is_at_least_acquire()
}

fn is_sc_access(lab: &EventLabel) -> bool {
    lab.is_mem_access() && lab.ordering().is_sc()
}

pub fn calculate_ra(g: &ExecutionGraph, lab: &EventLabel) -> Option<(Event, Event)> {
    let window = po_window(g, lab, 2)?;
    let (mid, first) = (window[0], window[1]);
    let annotated = mid.ordering().is_at_least_acquire() || mid.ordering().is_at_least_release();
    (mid.is_mem_access() && annotated).then(|| (first.pos(), lab.pos()))
}

pub fn calculate_svo(g: &ExecutionGraph, lab: &EventLabel) -> Option<(Event, Event)> {
    let window = po_window(g, lab, 4)?;
    let matched = is_acquire_fence(window[0])
        && window[1].is_mem_access()
        && is_release_fence(window[2]);
    matched.then(|| (window[3].pos(), lab.pos()))
}

pub fn calculate_spush(g: &ExecutionGraph, lab: &EventLabel) -> Option<(Event, Event)> {
    let window = po_window(g, lab, 2)?;
    let matched = window[0].is_fence() && window[0].ordering() == MemOrdering::SeqCst;
    matched.then(|| (window[1].pos(), lab.pos()))
}

pub fn calculate_volint(g: &ExecutionGraph, lab: &EventLabel) -> Option<(Event, Event)> {
    if !is_sc_access(lab) {
        return None;
    }
    let prev = g.po_imm_pred(lab.pos())?;
    is_sc_access(prev).then(|| (prev.pos(), lab.pos()))
}

/// Derived edges for one graph, keyed by relation and source event.
#[derive(Clone, Debug, Default)]
pub struct DerivedRelations {
    edges: HashMap<DerivedKind, HashMap<Event, Vec<Event>>>,
}

impl DerivedRelations {
    pub fn calculate(g: &ExecutionGraph, builders: &[(DerivedKind, DerivedBuilder)]) -> Self {
        let mut edges: HashMap<DerivedKind, HashMap<Event, Vec<Event>>> = HashMap::new();
        for &(kind, build) in builders {
            let rel = edges.entry(kind).or_default();
            for lab in g.labels() {
                if let Some((from, to)) = build(g, lab) {
                    rel.entry(from).or_default().push(to);
                }
            }
        }
        Self { edges }
    }

    pub fn successors(&self, kind: DerivedKind, e: Event) -> &[Event] {
        self.edges
            .get(&kind)
            .and_then(|rel| rel.get(&e))
            .map_or(&[], Vec::as_slice)
    }

    /// All edges of one relation, sorted.
    pub fn pairs(&self, kind: DerivedKind) -> Vec<(Event, Event)> {
        let mut pairs: Vec<(Event, Event)> = self
            .edges
            .get(&kind)
            .into_iter()
            .flat_map(|rel| rel.iter().flat_map(|(&a, bs)| bs.iter().map(move |&b| (a, b))))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}

/// Address an access-bound edge endpoint belongs to. The initializer belongs
/// to every address.
pub(crate) fn on_location(g: &ExecutionGraph, e: Event, loc: Option<Addr>) -> bool {
    match loc {
        None => true,
        Some(_) if e.is_init() => true,
        Some(addr) => g.label(e).access_addr() == Some(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: Addr = Addr::global(0x10);
    const Y: Addr = Addr::global(0x20);

    #[test]
    fn test_ra_needs_annotated_middle_access() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let a = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        g.add_write(t1, Y, MemOrdering::Release).unwrap();
        let c = g.add_read(t1, X, MemOrdering::Relaxed, Some(a)).unwrap();
        let d = g.add_read(t1, X, MemOrdering::Relaxed, Some(a)).unwrap();

        assert_eq!(calculate_ra(&g, g.label(c)), Some((a, c)));
        assert_eq!(calculate_ra(&g, g.label(d)), None);
    }

    #[test]
    fn test_svo_pattern() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let first = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        g.add_fence(t1, MemOrdering::Release).unwrap();
        g.add_write(t1, Y, MemOrdering::Relaxed).unwrap();
        g.add_fence(t1, MemOrdering::Acquire).unwrap();
        let last = g.add_write(t1, X, MemOrdering::Relaxed).unwrap();
        assert_eq!(calculate_svo(&g, g.label(last)), Some((first, last)));
        assert_eq!(calculate_svo(&g, g.label(first)), None);
    }

    #[test]
    fn test_spush_and_volint() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let a = g.add_write(t1, X, MemOrdering::SeqCst).unwrap();
        g.add_fence(t1, MemOrdering::SeqCst).unwrap();
        let b = g.add_write(t1, Y, MemOrdering::SeqCst).unwrap();
        let c = g.add_read(t1, Y, MemOrdering::SeqCst, Some(b)).unwrap();

        assert_eq!(calculate_spush(&g, g.label(b)), Some((a, b)));
        assert_eq!(calculate_volint(&g, g.label(c)), Some((b, c)));
        assert_eq!(calculate_volint(&g, g.label(b)), None);
    }

    #[test]
    fn test_derived_relations_table() {
        let mut g = ExecutionGraph::new();
        let (_, t1) = g.spawn_thread(0).unwrap();
        let a = g.add_write(t1, X, MemOrdering::SeqCst).unwrap();
        let b = g.add_write(t1, Y, MemOrdering::SeqCst).unwrap();
        let builders: [(DerivedKind, DerivedBuilder); 2] = [
            (DerivedKind::Volint, calculate_volint),
            (DerivedKind::Spush, calculate_spush),
        ];
        let rels = DerivedRelations::calculate(&g, &builders);
        assert_eq!(rels.pairs(DerivedKind::Volint), vec![(a, b)]);
        assert_eq!(rels.successors(DerivedKind::Volint, a), &[b]);
        assert!(rels.pairs(DerivedKind::Spush).is_empty());
        assert!(rels.pairs(DerivedKind::Ra).is_empty());
    }
}
