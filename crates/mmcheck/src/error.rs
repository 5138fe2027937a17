//! Errors reported for malformed driver input.

use thiserror::Error;

use crate::event::{Addr, Event};

/// Rejected graph mutations. The checkers never produce these: once a graph
/// has been built through the validated API they only return verdicts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("thread {0} does not exist")]
    UnknownThread(u32),

    #[error("no event at {0}")]
    UnknownEvent(Event),

    #[error("{0} is not a read")]
    NotARead(Event),

    #[error("{0} is not a write")]
    NotAWrite(Event),

    #[error("{write} writes to a different address than {addr}")]
    AddressMismatch { write: Event, addr: Addr },

    #[error("write {0} is already placed in coherence order")]
    AlreadyPlaced(Event),

    #[error("write {0} is not placed in coherence order")]
    NotPlaced(Event),

    #[error("read part of the read-modify-write at {0} has no source")]
    PendingRmw(Event),

    #[error("thread {0} has already finished")]
    ThreadFinished(u32),
}

/// A memory model name that does not match any supported model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown memory model '{0}' (expected one of sc, tso, ra, rc11, imm, jam21)")]
pub struct ParseModelError(pub String);
