//! Python bindings for the mmcheck checkers.
//!
//! Python builds an execution graph event by event and asks a checker about
//! it. Events cross the boundary as `(thread, index)` tuples and addresses as
//! `(value, dynamic)` tuples.

use std::collections::HashSet;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use mmcheck::{
    Addr, CheckerConfig, CoherenceEngine, ConsistencyChecker, Event, ExecutionGraph, GraphError,
    MemOrdering, MemoryModel, SafetyChecker, VerificationError, View, Violation,
};

type PyEvent = (u32, u32);
type PyAddr = (u64, bool);

fn to_event((thread, index): PyEvent) -> Event {
    Event::new(thread, index)
}

fn from_event(e: Event) -> PyEvent {
    (e.thread, e.index)
}

fn to_addr((value, dynamic): PyAddr) -> Addr {
    if dynamic {
        Addr::heap(value)
    } else {
        Addr::global(value)
    }
}

fn graph_err(err: GraphError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn parse_ordering(ordering: &str) -> PyResult<MemOrdering> {
    match ordering {
        "na" => Ok(MemOrdering::NotAtomic),
        "rlx" => Ok(MemOrdering::Relaxed),
        "acq" => Ok(MemOrdering::Acquire),
        "rel" => Ok(MemOrdering::Release),
        "acq_rel" => Ok(MemOrdering::AcqRel),
        "sc" => Ok(MemOrdering::SeqCst),
        _ => Err(PyValueError::new_err(format!(
            "ordering must be one of 'na', 'rlx', 'acq', 'rel', 'acq_rel', 'sc', got '{ordering}'"
        ))),
    }
}

fn parse_error_kind(kind: &str) -> PyResult<VerificationError> {
    match kind {
        "access_non_malloc" => Ok(VerificationError::AccessNonMalloc),
        "double_free" => Ok(VerificationError::DoubleFree),
        "access_freed" => Ok(VerificationError::AccessFreed),
        "race_not_atomic" => Ok(VerificationError::RaceNotAtomic),
        "ww_race" => Ok(VerificationError::WWRace),
        _ => Err(PyValueError::new_err(format!("Unknown error kind: '{kind}'"))),
    }
}

fn error_kind_name(kind: VerificationError) -> &'static str {
    match kind {
        VerificationError::AccessNonMalloc => "access_non_malloc",
        VerificationError::DoubleFree => "double_free",
        VerificationError::AccessFreed => "access_freed",
        VerificationError::RaceNotAtomic => "race_not_atomic",
        VerificationError::WWRace => "ww_race",
    }
}

/// A reported violation as `(kind, event, counterexample)`.
type PyViolation = (&'static str, PyEvent, Option<PyEvent>);

fn from_violation(v: Violation) -> PyViolation {
    (
        error_kind_name(v.kind),
        from_event(v.event),
        v.counterexample.map(from_event),
    )
}

// ---------------------------------------------------------------------------
// PyO3 wrapper types
// ---------------------------------------------------------------------------

/// An execution graph under construction, exposed to Python.
///
/// Thread 0 exists from the start and holds the initializer.
#[pyclass]
struct PyGraph {
    inner: ExecutionGraph,
}

/// The consistency, safety and coherence checkers for one memory model.
#[pyclass]
struct PyChecker {
    config: CheckerConfig,
}

#[pymethods]
impl PyGraph {
    #[new]
    fn new() -> Self {
        Self {
            inner: ExecutionGraph::new(),
        }
    }

    /// Spawn a thread from `parent`. Returns `(create_event, child_thread)`.
    fn spawn(&mut self, parent: u32) -> PyResult<(PyEvent, u32)> {
        let (create, child) = self.inner.spawn_thread(parent).map_err(graph_err)?;
        Ok((from_event(create), child))
    }

    fn join(&mut self, thread: u32, child: u32) -> PyResult<PyEvent> {
        self.inner.add_join(thread, child).map(from_event).map_err(graph_err)
    }

    /// Add a read. Leave `rf` out for a pending read.
    #[pyo3(signature = (thread, addr, ordering="rlx", rf=None))]
    fn read(
        &mut self,
        thread: u32,
        addr: PyAddr,
        ordering: &str,
        rf: Option<PyEvent>,
    ) -> PyResult<PyEvent> {
        let ordering = parse_ordering(ordering)?;
        self.inner
            .add_read(thread, to_addr(addr), ordering, rf.map(to_event))
            .map(from_event)
            .map_err(graph_err)
    }

    /// Add a write, co-after `after` when given and co-maximal otherwise.
    #[pyo3(signature = (thread, addr, ordering="rlx", after=None))]
    fn write(
        &mut self,
        thread: u32,
        addr: PyAddr,
        ordering: &str,
        after: Option<PyEvent>,
    ) -> PyResult<PyEvent> {
        let ordering = parse_ordering(ordering)?;
        let addr = to_addr(addr);
        let store = match after {
            Some(pred) => self.inner.add_write_after(thread, addr, ordering, to_event(pred)),
            None => self.inner.add_write(thread, addr, ordering),
        };
        store.map(from_event).map_err(graph_err)
    }

    /// Add a write left out of coherence order until `place` is called.
    #[pyo3(signature = (thread, addr, ordering="rlx"))]
    fn unplaced_write(&mut self, thread: u32, addr: PyAddr, ordering: &str) -> PyResult<PyEvent> {
        let ordering = parse_ordering(ordering)?;
        self.inner
            .add_unplaced_write(thread, to_addr(addr), ordering)
            .map(from_event)
            .map_err(graph_err)
    }

    fn place(&mut self, store: PyEvent, pred: PyEvent) -> PyResult<()> {
        self.inner
            .place_write(to_event(store), to_event(pred))
            .map_err(graph_err)
    }

    /// Add both halves of a read-modify-write. Returns `(read, write)`.
    #[pyo3(signature = (thread, addr, rf, ordering="rlx"))]
    fn rmw(
        &mut self,
        thread: u32,
        addr: PyAddr,
        rf: PyEvent,
        ordering: &str,
    ) -> PyResult<(PyEvent, PyEvent)> {
        let ordering = parse_ordering(ordering)?;
        let (r, w) = self
            .inner
            .add_rmw(thread, to_addr(addr), ordering, to_event(rf))
            .map_err(graph_err)?;
        Ok((from_event(r), from_event(w)))
    }

    /// Add only the read half of a read-modify-write.
    #[pyo3(signature = (thread, addr, ordering="rlx", rf=None))]
    fn rmw_read(
        &mut self,
        thread: u32,
        addr: PyAddr,
        ordering: &str,
        rf: Option<PyEvent>,
    ) -> PyResult<PyEvent> {
        let ordering = parse_ordering(ordering)?;
        self.inner
            .add_rmw_read(thread, to_addr(addr), ordering, rf.map(to_event))
            .map(from_event)
            .map_err(graph_err)
    }

    #[pyo3(signature = (thread, ordering="sc"))]
    fn fence(&mut self, thread: u32, ordering: &str) -> PyResult<PyEvent> {
        let ordering = parse_ordering(ordering)?;
        self.inner.add_fence(thread, ordering).map(from_event).map_err(graph_err)
    }

    fn alloc(&mut self, thread: u32, addr: PyAddr, size: u64) -> PyResult<PyEvent> {
        self.inner
            .add_alloc(thread, to_addr(addr), size)
            .map(from_event)
            .map_err(graph_err)
    }

    fn free(&mut self, thread: u32, addr: PyAddr) -> PyResult<PyEvent> {
        self.inner.add_free(thread, to_addr(addr)).map(from_event).map_err(graph_err)
    }

    /// Retire `addr` through hazard pointers.
    fn retire(&mut self, thread: u32, addr: PyAddr) -> PyResult<PyEvent> {
        self.inner
            .add_hp_retire(thread, to_addr(addr))
            .map(from_event)
            .map_err(graph_err)
    }

    /// Publish hazard pointer `hp_addr` as protecting `protected`.
    fn protect(&mut self, thread: u32, hp_addr: PyAddr, protected: PyAddr) -> PyResult<PyEvent> {
        self.inner
            .add_hp_protect(thread, to_addr(hp_addr), to_addr(protected))
            .map(from_event)
            .map_err(graph_err)
    }

    /// Make `read` observe `rf`, or pending when `rf` is None.
    #[pyo3(signature = (read, rf=None))]
    fn change_rf(&mut self, read: PyEvent, rf: Option<PyEvent>) -> PyResult<()> {
        self.inner
            .change_rf(to_event(read), rf.map(to_event))
            .map_err(graph_err)
    }

    fn set_revisitable(&mut self, read: PyEvent, value: bool) -> PyResult<()> {
        self.inner
            .set_revisitable(to_event(read), value)
            .map_err(graph_err)
    }

    /// Mark whether `read` was added at the end of its thread; only such reads
    /// are offered for revisiting.
    fn set_added_max(&mut self, read: PyEvent, value: bool) -> PyResult<()> {
        self.inner
            .set_added_max(to_event(read), value)
            .map_err(graph_err)
    }

    /// Drop every event stamped after `read`, keeping the porf-prefix of
    /// `store`, as done before `read` is revisited by `store`.
    fn cut_for_revisit(&mut self, read: PyEvent, store: PyEvent) -> PyResult<()> {
        let (read, store) = (to_event(read), to_event(store));
        let stamp = self.label_stamp(read)?;
        let prior = self.prefix(store)?;
        let mut keep = self.inner.view_from_stamp(stamp);
        keep.update(&prior);
        self.inner.cut_to_view(&keep);
        Ok(())
    }

    /// Source of `read`, or None while pending.
    fn rf(&self, read: PyEvent) -> PyResult<Option<PyEvent>> {
        let lab = self
            .inner
            .get_label(to_event(read))
            .ok_or_else(|| graph_err(GraphError::UnknownEvent(to_event(read))))?;
        Ok(lab.rf().map(from_event))
    }

    /// Coherence order at `addr`, initializer excluded.
    fn co(&self, addr: PyAddr) -> Vec<PyEvent> {
        self.inner.co(to_addr(addr)).iter().copied().map(from_event).collect()
    }

    fn thread_size(&self, thread: u32) -> usize {
        self.inner.thread_size(thread)
    }

    #[getter]
    fn num_threads(&self) -> usize {
        self.inner.num_threads()
    }

    #[getter]
    fn max_stamp(&self) -> u32 {
        self.inner.max_stamp().0
    }

    fn __len__(&self) -> usize {
        self.inner.labels().count()
    }

    fn __repr__(&self) -> String {
        format!(
            "PyGraph(threads={}, events={})",
            self.inner.num_threads(),
            self.inner.labels().count()
        )
    }
}

impl PyGraph {
    /// Rejects events the graph does not hold before they reach a checker.
    fn require(&self, e: PyEvent) -> PyResult<Event> {
        let e = to_event(e);
        if self.inner.contains(e) {
            Ok(e)
        } else {
            Err(graph_err(GraphError::UnknownEvent(e)))
        }
    }

    fn label_stamp(&self, e: Event) -> PyResult<mmcheck::Stamp> {
        self.inner
            .get_label(e)
            .map(|l| l.stamp())
            .ok_or_else(|| graph_err(GraphError::UnknownEvent(e)))
    }

    fn prefix(&self, e: Event) -> PyResult<View> {
        self.inner
            .get_label(e)
            .map(|l| l.prefix_view().clone())
            .ok_or_else(|| graph_err(GraphError::UnknownEvent(e)))
    }
}

#[pymethods]
impl PyChecker {
    #[new]
    #[pyo3(signature = (model="rc11", race_detection=true, ww_races=true))]
    fn new(model: &str, race_detection: bool, ww_races: bool) -> PyResult<Self> {
        let model: MemoryModel = model
            .parse()
            .map_err(|e: mmcheck::ParseModelError| PyValueError::new_err(e.to_string()))?;
        Ok(Self {
            config: CheckerConfig::new(model)
                .with_race_detection(race_detection)
                .with_ww_races(ww_races),
        })
    }

    #[getter]
    fn model(&self) -> &'static str {
        self.config.model.name()
    }

    fn is_consistent(&self, graph: &PyGraph) -> bool {
        ConsistencyChecker::new(self.config).is_consistent(&graph.inner)
    }

    /// None if consistent, else `(axiom, event)` of the first violation.
    fn check_consistency(&self, graph: &PyGraph) -> Option<(&'static str, PyEvent)> {
        ConsistencyChecker::new(self.config)
            .check_consistency(&graph.inner)
            .err()
            .map(|inc| (inc.axiom, from_event(inc.event)))
    }

    /// First error found at `event`, as `(kind, event, counterexample)`.
    fn check_errors(&self, graph: &PyGraph, event: PyEvent) -> PyResult<Option<PyViolation>> {
        let event = graph.require(event)?;
        Ok(SafetyChecker::new(self.config)
            .check_errors(&graph.inner, event)
            .map(from_violation))
    }

    /// Warnings at `event`, skipping the kinds listed in `seen`.
    #[pyo3(signature = (graph, event, seen=Vec::new()))]
    fn check_warnings(
        &self,
        graph: &PyGraph,
        event: PyEvent,
        seen: Vec<String>,
    ) -> PyResult<Vec<PyViolation>> {
        let event = graph.require(event)?;
        let seen = seen
            .iter()
            .map(|k| parse_error_kind(k))
            .collect::<PyResult<HashSet<_>>>()?;
        Ok(SafetyChecker::new(self.config)
            .check_warnings(&graph.inner, event, &seen)
            .into_iter()
            .map(from_violation)
            .collect())
    }

    fn coherent_stores(&self, graph: &PyGraph, addr: PyAddr, read: PyEvent) -> PyResult<Vec<PyEvent>> {
        let read = graph.require(read)?;
        Ok(CoherenceEngine::new(self.config)
            .coherent_stores(&graph.inner, to_addr(addr), read)
            .into_iter()
            .map(from_event)
            .collect())
    }

    /// Reads `store` may revisit, given its porf-prefix in the graph.
    fn coherent_revisits(&self, graph: &PyGraph, store: PyEvent) -> PyResult<Vec<PyEvent>> {
        let store = to_event(store);
        let prior = graph.prefix(store)?;
        Ok(CoherenceEngine::new(self.config)
            .coherent_revisits(&graph.inner, store, &prior)
            .into_iter()
            .map(from_event)
            .collect())
    }

    #[pyo3(signature = (graph, addr, store, is_rmw=false))]
    fn coherent_placings(
        &self,
        graph: &PyGraph,
        addr: PyAddr,
        store: PyEvent,
        is_rmw: bool,
    ) -> PyResult<Vec<PyEvent>> {
        let store = graph.require(store)?;
        if is_rmw && !graph.inner.is_rmw_store(store) {
            return Err(graph_err(GraphError::NotAWrite(store)));
        }
        if is_rmw && graph.inner.po_imm_pred(store).and_then(|r| r.rf()).is_none() {
            return Err(graph_err(GraphError::PendingRmw(store)));
        }
        Ok(CoherenceEngine::new(self.config)
            .coherent_placings(&graph.inner, to_addr(addr), store, is_rmw)
            .into_iter()
            .map(from_event)
            .collect())
    }
}

/// Python module definition.
#[pymodule]
fn mmcheck_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyGraph>()?;
    m.add_class::<PyChecker>()?;
    Ok(())
}
