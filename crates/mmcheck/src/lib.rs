//! Consistency and race checking core for a stateless model checker.
//!
//! An [`ExecutionGraph`] holds one candidate execution of a concurrent
//! program. The checkers borrow it for the duration of a call:
//!
//! - [`ConsistencyChecker`] decides whether the graph is allowed by a memory
//!   model (SC, TSO, RA, RC11, IMM or JAM21);
//! - [`SafetyChecker`] reports use-after-free, double free and data races;
//! - [`CoherenceEngine`] lists the reads-from sources, coherence placements
//!   and revisits an exploration driver branches on.

pub mod coherence;
pub mod config;
pub mod consistency;
pub mod error;
pub mod event;
pub mod graph;
pub mod hb;
pub mod label;
pub mod model;
pub mod relation;
pub mod safety;
pub mod vv;

pub use coherence::CoherenceEngine;
pub use config::CheckerConfig;
pub use consistency::{ConsistencyChecker, Inconsistency};
pub use error::{GraphError, ParseModelError};
pub use event::{Addr, Event, Stamp};
pub use graph::ExecutionGraph;
pub use label::{EventLabel, LabelKind, MemOrdering};
pub use model::MemoryModel;
pub use safety::{SafetyChecker, VerificationError, Violation};
pub use vv::View;
