// revflow — Port-graph arrows and their inverses
//
// Library root. Leaves first: ids and literals, the primitive catalogue,
// the arena graph, port attributes and their propagation, known-port
// marking, the inversion registry and rules, and the whole-graph inversion.
// The interpreter, symbolic walk, documents and DOT output sit beside the
// core for checking and interchange.

pub mod attr;
pub mod build;
pub mod document;
pub mod dot;
pub mod error;
pub mod graph;
pub mod id;
pub mod interpret;
pub mod invert;
pub mod literal;
pub mod marking;
pub mod prim;
pub mod propagate;
pub mod registry;
pub mod rules;
pub mod symbolic;

pub use attr::{Constness, PortAttributes, PortFacts};
pub use build::ExprBuilder;
pub use error::{ArrowError, ErrorCode};
pub use graph::{ArrowGraph, ArrowKind, PortKind};
pub use id::{ArrowId, PortId};
pub use invert::{invert, invert_seeded};
pub use literal::Literal;
pub use prim::{Prim, PrimOp};
pub use registry::{InvertOptions, Inversion, PortRemap, Registry};
