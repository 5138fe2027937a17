//! Memory-safety and race checks, independent of the memory model.
//!
//! Each check walks a few relations out of the event under test and reports
//! the first label it reaches that the event's hb view does not order
//! correctly. Checks are run against a fresh [`CheckContext`] each time.

use std::collections::HashSet;
use std::fmt;

use log::debug;

use crate::config::CheckerConfig;
use crate::event::Event;
use crate::graph::ExecutionGraph;
use crate::hb::HappensBefore;
use crate::label::{EventLabel, LabelKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerificationError {
    AccessNonMalloc,
    DoubleFree,
    AccessFreed,
    RaceNotAtomic,
    WWRace,
}

impl VerificationError {
    /// Warnings are reported but do not end the exploration of a branch.
    pub fn is_warning(self) -> bool {
        matches!(self, VerificationError::WWRace)
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VerificationError::AccessNonMalloc => "access to non-allocated memory",
            VerificationError::DoubleFree => "double free",
            VerificationError::AccessFreed => "access to freed memory",
            VerificationError::RaceNotAtomic => "non-atomic race",
            VerificationError::WWRace => "unordered writes",
        };
        f.write_str(msg)
    }
}

/// A failed check: its kind, the event under test and the label it conflicts
/// with, when there is one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Violation {
    pub kind: VerificationError,
    pub event: Event,
    pub counterexample: Option<Event>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.event)?;
        if let Some(cex) = self.counterexample {
            write!(f, " (conflicts with {cex})")?;
        }
        Ok(())
    }
}

/// Per-check state: a stamp-indexed visited table and the hb views.
struct CheckContext<'g> {
    g: &'g ExecutionGraph,
    hb: &'g HappensBefore,
    visited: Vec<bool>,
}

impl<'g> CheckContext<'g> {
    fn new(g: &'g ExecutionGraph, hb: &'g HappensBefore) -> Self {
        Self {
            g,
            hb,
            visited: vec![false; g.max_stamp().get() + 1],
        }
    }

    /// Marks `lab` visited; false if it already was.
    fn first_visit(&mut self, lab: &EventLabel) -> bool {
        !std::mem::replace(&mut self.visited[lab.stamp().get()], true)
    }

    fn sees(&self, observer: Event, e: Event) -> bool {
        self.hb.view(self.g, observer).contains(e)
    }

    fn ordered(&self, a: Event, b: Event) -> bool {
        self.sees(a, b) || self.sees(b, a)
    }

    /// Returns the first of `candidates` for which `bad` holds.
    fn find<'a>(
        &mut self,
        candidates: impl IntoIterator<Item = &'a EventLabel>,
        mut bad: impl FnMut(&Self, &EventLabel) -> bool,
    ) -> Option<Event> {
        for lab in candidates {
            if self.first_visit(lab) && bad(self, lab) {
                return Some(lab.pos());
            }
        }
        None
    }
}

fn is_dynamic_access(lab: &EventLabel) -> bool {
    lab.access_addr().is_some_and(|a| a.is_dynamic())
}

fn is_plain_free(lab: &EventLabel) -> bool {
    matches!(lab.kind(), LabelKind::Free { .. })
}

/// A free placed right after a retire of the same address completes that
/// retire's reclamation.
fn is_reclaiming_free(g: &ExecutionGraph, free: &EventLabel) -> bool {
    is_plain_free(free)
        && g.po_imm_pred(free.pos())
            .is_some_and(|p| p.is_hp_retire() && p.addr() == free.addr())
}

fn is_reclaim_pair(g: &ExecutionGraph, a: &EventLabel, b: &EventLabel) -> bool {
    let reclaims = |free: &EventLabel, retire: &EventLabel| {
        is_reclaiming_free(g, free) && free.pos().prev() == Some(retire.pos())
    };
    reclaims(a, b) || reclaims(b, a)
}

/// Runs the memory-safety errors and race warnings.
#[derive(Clone, Copy, Debug)]
pub struct SafetyChecker {
    config: CheckerConfig,
}

impl SafetyChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    fn happens_before(&self, g: &ExecutionGraph) -> HappensBefore {
        HappensBefore::new(g, self.config.model.spec().sync)
    }

    /// Runs the error checks on `e` in priority order and returns the first
    /// failure.
    pub fn check_errors(&self, g: &ExecutionGraph, e: Event) -> Option<Violation> {
        let hb = self.happens_before(g);
        let lab = g.label(e);
        let violation = |kind, counterexample| Violation {
            kind,
            event: e,
            counterexample,
        };

        if let Some(cex) = self.check_access_non_malloc(&hb, g, lab) {
            return Some(violation(VerificationError::AccessNonMalloc, cex));
        }
        if let Some(cex) = self.check_double_free(&hb, g, lab) {
            return Some(violation(VerificationError::DoubleFree, Some(cex)));
        }
        if let Some(cex) = self.check_access_freed(&hb, g, lab) {
            return Some(violation(VerificationError::AccessFreed, Some(cex)));
        }
        if !self.config.disable_race_detection {
            if let Some(cex) = self.check_race_not_atomic(&hb, g, lab) {
                return Some(violation(VerificationError::RaceNotAtomic, Some(cex)));
            }
        }
        None
    }

    /// Runs the warning checks not yet in `seen`, collecting every
    /// counterexample.
    pub fn check_warnings(
        &self,
        g: &ExecutionGraph,
        e: Event,
        seen: &HashSet<VerificationError>,
    ) -> Vec<Violation> {
        if self.config.disable_race_detection
            || !self.config.report_ww_races
            || seen.contains(&VerificationError::WWRace)
        {
            return Vec::new();
        }
        let lab = g.label(e);
        if !lab.is_write() {
            return Vec::new();
        }
        let hb = self.happens_before(g);
        let mut ctx = CheckContext::new(g, &hb);
        let mut racy = Vec::new();
        for other in g.same_loc_accesses(e) {
            if other.is_write() && ctx.first_visit(other) && !ctx.ordered(e, other.pos()) {
                racy.push(Violation {
                    kind: VerificationError::WWRace,
                    event: e,
                    counterexample: Some(other.pos()),
                });
            }
        }
        if !racy.is_empty() {
            debug!("{} unordered writes against {e}", racy.len());
        }
        racy
    }

    /// A dynamic access or free must be preceded by the allocation covering
    /// its address. `Some(None)` when no allocation exists at all.
    fn check_access_non_malloc(
        &self,
        hb: &HappensBefore,
        g: &ExecutionGraph,
        lab: &EventLabel,
    ) -> Option<Option<Event>> {
        let dynamic = lab.addr().is_some_and(|a| a.is_dynamic());
        if !dynamic || !(lab.is_mem_access() || lab.is_free_like()) {
            return None;
        }
        let ctx = CheckContext::new(g, hb);
        match g.alloc_pred(lab.pos()) {
            None => Some(None),
            Some(alloc) if !ctx.sees(lab.pos(), alloc.pos()) => Some(Some(alloc.pos())),
            Some(_) => None,
        }
    }

    fn check_double_free(&self, hb: &HappensBefore, g: &ExecutionGraph, lab: &EventLabel) -> Option<Event> {
        if !lab.is_free_like() {
            return None;
        }
        let mut ctx = CheckContext::new(g, hb);
        ctx.find(g.same_loc_frees(lab.pos()), |_, other| !is_reclaim_pair(g, lab, other))
    }

    /// Use after free, in both directions, for plain frees and for
    /// hazard-pointer retires. Protection only exempts an access from
    /// retire-based reclamation.
    fn check_access_freed(&self, hb: &HappensBefore, g: &ExecutionGraph, lab: &EventLabel) -> Option<Event> {
        let e = lab.pos();
        let mut ctx = CheckContext::new(g, hb);

        // Free: every access of the block must be hb-before it.
        if is_plain_free(lab) {
            let reclaiming = is_reclaiming_free(g, lab);
            let alloc = g.free_pred(e)?;
            return ctx.find(g.alloc_succs(alloc.pos()), |ctx, acc| {
                !(reclaiming && g.is_hazptr_protected(acc.pos())) && !ctx.sees(e, acc.pos())
            });
        }

        // Retire: every unprotected access of the block must be hb-before it.
        if lab.is_hp_retire() {
            let alloc = g.free_pred(e)?;
            return ctx.find(g.alloc_succs(alloc.pos()), |ctx, acc| {
                is_dynamic_access(acc)
                    && !g.is_hazptr_protected(acc.pos())
                    && !ctx.sees(e, acc.pos())
            });
        }

        if !is_dynamic_access(lab) {
            return None;
        }
        let alloc = g.alloc_pred(e)?;
        let protected = g.is_hazptr_protected(e);

        // Access: every free of its block must observe it.
        let frees = g.free_succs(alloc.pos());
        if let Some(cex) = ctx.find(frees.iter().copied().filter(|f| is_plain_free(f)), |ctx, free| {
            !(protected && is_reclaiming_free(g, free)) && !ctx.sees(free.pos(), e)
        }) {
            return Some(cex);
        }

        // Unprotected access: every retire of its block must observe it.
        if protected {
            return None;
        }
        ctx.find(frees.iter().copied().filter(|f| f.is_hp_retire()), |ctx, retire| {
            !ctx.sees(retire.pos(), e)
        })
    }

    /// Two same-address accesses, at least one a write and at least one
    /// non-atomic, with neither hb-before the other.
    fn check_race_not_atomic(&self, hb: &HappensBefore, g: &ExecutionGraph, lab: &EventLabel) -> Option<Event> {
        if !lab.is_mem_access() {
            return None;
        }
        let e = lab.pos();
        let mut ctx = CheckContext::new(g, hb);
        ctx.find(g.same_loc_accesses(e), |ctx, other| {
            let conflicting = lab.is_write() || other.is_write();
            let non_atomic = lab.is_not_atomic() || other.is_not_atomic();
            conflicting && non_atomic && !ctx.ordered(e, other.pos())
        })
    }
}
