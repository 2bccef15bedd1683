// error.rs — Crate-wide error type with stable diagnostic codes
//
// All structural, propagation, inversion and evaluation failures surface as
// `ArrowError`. Errors are raised at the smallest unit where they are
// detected (a port, an edge, an arrow) and propagated upward unchanged.
//
// Code ranges:
//   E01xx  structure and wiring
//   E02xx  port attributes and propagation
//   E03xx  inversion
//   E04xx  reference evaluation
//   E05xx  graph documents

use std::fmt;

use thiserror::Error;

use crate::id::{ArrowId, PortId};
use crate::prim::PrimOp;

/// A stable diagnostic code (e.g. `E0103`).
///
/// Once assigned, a code keeps its meaning; new failure modes get new codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub &'static str);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArrowError {
    // ── Structure ───────────────────────────────────────────────────────
    #[error("unknown arrow {0}")]
    UnknownArrow(ArrowId),
    #[error("unknown port {0}")]
    UnknownPort(PortId),
    #[error("arrow {0} is not a composite")]
    NotComposite(ArrowId),
    #[error("port {port} is not projecting in composite {context}")]
    NotProjecting { port: PortId, context: ArrowId },
    #[error("port {port} is not receiving in composite {context}")]
    NotReceiving { port: PortId, context: ArrowId },
    #[error("in-port {port} is already driven by {existing}")]
    InPortAlreadyDriven { port: PortId, existing: PortId },
    #[error("arrow {arrow} already belongs to composite {parent}")]
    AlreadyParented { arrow: ArrowId, parent: ArrowId },
    #[error("arrow {arrow} encloses composite {context} and cannot become its child")]
    OwnershipCycle { arrow: ArrowId, context: ArrowId },
    #[error("port {port} cannot be re-tagged as {requested}")]
    InvalidPortKind { port: PortId, requested: &'static str },
    #[error("{what} expects {expected} operands, got {actual}")]
    Arity {
        what: String,
        expected: usize,
        actual: usize,
    },

    // ── Attributes ──────────────────────────────────────────────────────
    #[error("conflicting {fact} on port {port}: had {existing}, derived {derived}")]
    ConflictingFact {
        port: PortId,
        fact: &'static str,
        existing: String,
        derived: String,
    },
    #[error("shape mismatch on arrow {arrow}: {left:?} vs {right:?}")]
    ShapeMismatch {
        arrow: ArrowId,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    // ── Inversion ───────────────────────────────────────────────────────
    #[error("no inversion rule registered for {0}")]
    NoInverseRule(PrimOp),
    #[error("inverting {op} requires a known {attribute} on port {port}")]
    MissingAttribute {
        op: PrimOp,
        port: PortId,
        attribute: &'static str,
    },
    #[error("port index {index} of arrow {arrow} has no counterpart in its inverse")]
    MissingRemap { arrow: ArrowId, index: usize },
    #[error("arrow {0} is a composite and has no single inversion rule")]
    NotLeaf(ArrowId),
    #[error("edge {left} -> {right} maps to two {role} ports in the inverse")]
    DanglingInverse {
        left: PortId,
        right: PortId,
        role: &'static str,
    },

    // ── Evaluation ──────────────────────────────────────────────────────
    #[error("evaluation of {what} failed: {message}")]
    Eval { what: String, message: String },

    // ── Documents ───────────────────────────────────────────────────────
    #[error("invalid graph document: {0}")]
    Document(String),
    #[error("arrow '{name}' has no input port at index {index}")]
    NotAnInput { name: String, index: usize },
}

impl ArrowError {
    /// Stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ArrowError::UnknownArrow(_) => ErrorCode("E0101"),
            ArrowError::UnknownPort(_) => ErrorCode("E0102"),
            ArrowError::NotComposite(_) => ErrorCode("E0103"),
            ArrowError::NotProjecting { .. } => ErrorCode("E0104"),
            ArrowError::NotReceiving { .. } => ErrorCode("E0105"),
            ArrowError::InPortAlreadyDriven { .. } => ErrorCode("E0106"),
            ArrowError::AlreadyParented { .. } => ErrorCode("E0107"),
            ArrowError::OwnershipCycle { .. } => ErrorCode("E0108"),
            ArrowError::InvalidPortKind { .. } => ErrorCode("E0109"),
            ArrowError::Arity { .. } => ErrorCode("E0110"),
            ArrowError::ConflictingFact { .. } => ErrorCode("E0201"),
            ArrowError::ShapeMismatch { .. } => ErrorCode("E0202"),
            ArrowError::NoInverseRule(_) => ErrorCode("E0301"),
            ArrowError::MissingAttribute { .. } => ErrorCode("E0302"),
            ArrowError::MissingRemap { .. } => ErrorCode("E0303"),
            ArrowError::DanglingInverse { .. } => ErrorCode("E0304"),
            ArrowError::NotLeaf(_) => ErrorCode("E0305"),
            ArrowError::Eval { .. } => ErrorCode("E0401"),
            ArrowError::Document(_) => ErrorCode("E0501"),
            ArrowError::NotAnInput { .. } => ErrorCode("E0502"),
        }
    }

    /// True for wiring and ownership violations.
    pub fn is_structural(&self) -> bool {
        self.code().0.starts_with("E01")
    }

    pub(crate) fn eval(what: impl Into<String>, message: impl Into<String>) -> Self {
        ArrowError::Eval {
            what: what.into(),
            message: message.into(),
        }
    }
}
