//! Supported memory models and the table describing how each one is checked.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseModelError;
use crate::relation::{
    calculate_ra, calculate_spush, calculate_svo, calculate_volint, DerivedBuilder, DerivedKind,
    Relation, Scope,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryModel {
    Sc,
    Tso,
    Ra,
    Rc11,
    Imm,
    Jam21,
}

impl MemoryModel {
    pub const ALL: [MemoryModel; 6] = [
        MemoryModel::Sc,
        MemoryModel::Tso,
        MemoryModel::Ra,
        MemoryModel::Rc11,
        MemoryModel::Imm,
        MemoryModel::Jam21,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MemoryModel::Sc => "sc",
            MemoryModel::Tso => "tso",
            MemoryModel::Ra => "ra",
            MemoryModel::Rc11 => "rc11",
            MemoryModel::Imm => "imm",
            MemoryModel::Jam21 => "jam21",
        }
    }

    pub fn spec(self) -> &'static ModelSpec {
        match self {
            MemoryModel::Sc => &SC,
            MemoryModel::Tso => &TSO,
            MemoryModel::Ra => &RA,
            MemoryModel::Rc11 => &RC11,
            MemoryModel::Imm => &IMM,
            MemoryModel::Jam21 => &JAM21,
        }
    }
}

impl fmt::Display for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemoryModel {
    type Err = ParseModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        MemoryModel::ALL
            .into_iter()
            .find(|m| m.name() == lower)
            .ok_or_else(|| ParseModelError(s.to_string()))
    }
}

/// Which reads-from edges synchronize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Every rf edge synchronizes.
    AllReadsFrom,
    /// rf edges between atomic accesses synchronize.
    AtomicReadsFrom,
    /// Release heads synchronize with acquire tails.
    Annotated,
}

/// One acyclicity requirement.
#[derive(Clone, Copy, Debug)]
pub struct Axiom {
    pub name: &'static str,
    pub relations: &'static [Relation],
    pub scope: Scope,
}

/// How a memory model is checked.
pub struct ModelSpec {
    pub sync: SyncPolicy,
    /// Events may be added out of program order.
    pub dep_tracking: bool,
    pub axioms: &'static [Axiom],
    pub derived: &'static [(DerivedKind, DerivedBuilder)],
}

use Relation::*;

const NO_THIN_AIR: Axiom = Axiom {
    name: "no-thin-air",
    relations: &[Po, Rf, Tc, Tj],
    scope: Scope::Global,
};

const COHERENCE: Axiom = Axiom {
    name: "coherence",
    relations: &[Po, Sw, Tc, Tj, Rf, Co, Fr],
    scope: Scope::PerLocation,
};

const SC_ORDER: Axiom = Axiom {
    name: "sc-order",
    relations: &[ScPo, ScRf, ScCo, ScFr, ScFence],
    scope: Scope::Global,
};

static SC: ModelSpec = ModelSpec {
    sync: SyncPolicy::AllReadsFrom,
    dep_tracking: false,
    axioms: &[Axiom {
        name: "sc",
        relations: &[Po, Rf, Co, Fr, Tc, Tj],
        scope: Scope::Global,
    }],
    derived: &[],
};

static TSO: ModelSpec = ModelSpec {
    sync: SyncPolicy::AllReadsFrom,
    dep_tracking: false,
    axioms: &[
        Axiom {
            name: "sc-per-location",
            relations: &[PoLoc, Rf, Co, Fr],
            scope: Scope::PerLocation,
        },
        Axiom {
            name: "tso-order",
            relations: &[PpoTso, Rfe, Co, Fr, Tc, Tj],
            scope: Scope::Global,
        },
    ],
    derived: &[],
};

static RA: ModelSpec = ModelSpec {
    sync: SyncPolicy::AtomicReadsFrom,
    dep_tracking: false,
    axioms: &[NO_THIN_AIR, COHERENCE],
    derived: &[],
};

static RC11: ModelSpec = ModelSpec {
    sync: SyncPolicy::Annotated,
    dep_tracking: false,
    axioms: &[COHERENCE, NO_THIN_AIR, SC_ORDER],
    derived: &[],
};

static IMM: ModelSpec = ModelSpec {
    sync: SyncPolicy::Annotated,
    dep_tracking: true,
    axioms: &[COHERENCE, SC_ORDER],
    derived: &[],
};

static JAM21: ModelSpec = ModelSpec {
    sync: SyncPolicy::Annotated,
    dep_tracking: false,
    axioms: &[
        NO_THIN_AIR,
        Axiom {
            name: "coherence",
            relations: &[Po, Sw, Tc, Tj, Derived(DerivedKind::Ra), Derived(DerivedKind::Svo), Rf, Co, Fr],
            scope: Scope::PerLocation,
        },
        Axiom {
            name: "volatile-order",
            relations: &[
                Derived(DerivedKind::Spush),
                Derived(DerivedKind::Volint),
                Rf,
                Co,
                Fr,
                Tc,
                Tj,
            ],
            scope: Scope::Global,
        },
    ],
    derived: &[
        (DerivedKind::Ra, calculate_ra),
        (DerivedKind::Svo, calculate_svo),
        (DerivedKind::Spush, calculate_spush),
        (DerivedKind::Volint, calculate_volint),
    ],
};
