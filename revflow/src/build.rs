// build.rs — Incremental construction of forward composites
//
// `ExprBuilder` grows one composite an expression at a time. Every value is
// the projecting port that carries it; reusing a port in several
// expressions is how fan-out is written.
//
// Preconditions: ports handed back to the builder were produced by it (or
//                are boundary in-ports of the composite under construction).
// Postconditions: each step leaves the composite well-wired; `finish`
//                 returns a parentless composite.
// Failure modes: arity mismatches and every wiring error of `add_edge`.
// Side effects: grows the arena.

use crate::error::ArrowError;
use crate::graph::{ArrowGraph, PortKind};
use crate::id::{ArrowId, PortId};
use crate::literal::Literal;
use crate::prim::Prim;

pub struct ExprBuilder<'g> {
    graph: &'g mut ArrowGraph,
    composite: ArrowId,
}

impl<'g> ExprBuilder<'g> {
    pub fn new(graph: &'g mut ArrowGraph, name: impl Into<String>) -> Self {
        let composite = graph.add_composite(name);
        ExprBuilder { graph, composite }
    }

    /// The composite under construction.
    pub fn composite(&self) -> ArrowId {
        self.composite
    }

    pub fn graph(&self) -> &ArrowGraph {
        self.graph
    }

    /// A fresh boundary `In` port.
    pub fn input(&mut self) -> Result<PortId, ArrowError> {
        self.graph.add_boundary_port(self.composite, PortKind::In)
    }

    /// A fresh boundary `Param` port.
    pub fn param(&mut self) -> Result<PortId, ArrowError> {
        self.graph.add_boundary_port(self.composite, PortKind::Param)
    }

    /// A literal: adds a `Source` child and returns its out-port.
    pub fn constant(&mut self, value: Literal) -> Result<PortId, ArrowError> {
        let source = self.graph.add_source(value);
        self.graph.add_child(self.composite, source)?;
        self.graph.port_at(source, 0)
    }

    /// Apply a primitive to `args` and return its out-ports.
    pub fn apply(&mut self, prim: Prim, args: &[PortId]) -> Result<Vec<PortId>, ArrowError> {
        if args.len() != prim.n_in() {
            return Err(ArrowError::Arity {
                what: prim.name(),
                expected: prim.n_in(),
                actual: args.len(),
            });
        }
        let arrow = self.graph.add_primitive(prim);
        self.wire(arrow, args)
    }

    /// Embed a parentless arrow (typically a finished composite) as a child
    /// and feed it `args`. An arrow can be embedded once; embed a
    /// `copy_arrow` of it to reuse it.
    pub fn call(&mut self, arrow: ArrowId, args: &[PortId]) -> Result<Vec<PortId>, ArrowError> {
        if let Some(parent) = self.graph.arrow(arrow)?.parent() {
            return Err(ArrowError::AlreadyParented { arrow, parent });
        }
        let expected = self.graph.in_ports(arrow)?.len();
        if args.len() != expected {
            return Err(ArrowError::Arity {
                what: format!("arrow '{}'", self.graph.arrow(arrow)?.name),
                expected,
                actual: args.len(),
            });
        }
        self.wire(arrow, args)
    }

    fn wire(&mut self, arrow: ArrowId, args: &[PortId]) -> Result<Vec<PortId>, ArrowError> {
        self.graph.add_child(self.composite, arrow)?;
        let ins = self.graph.in_ports(arrow)?;
        for (&arg, &port) in args.iter().zip(&ins) {
            self.graph.add_edge(self.composite, arg, port)?;
        }
        self.graph.out_ports(arrow)
    }

    fn unary(&mut self, prim: Prim, x: PortId) -> Result<PortId, ArrowError> {
        Ok(self.apply(prim, &[x])?[0])
    }

    fn binary(&mut self, prim: Prim, x: PortId, y: PortId) -> Result<PortId, ArrowError> {
        Ok(self.apply(prim, &[x, y])?[0])
    }

    pub fn add(&mut self, x: PortId, y: PortId) -> Result<PortId, ArrowError> {
        self.binary(Prim::Add, x, y)
    }

    pub fn sub(&mut self, x: PortId, y: PortId) -> Result<PortId, ArrowError> {
        self.binary(Prim::Sub, x, y)
    }

    pub fn mul(&mut self, x: PortId, y: PortId) -> Result<PortId, ArrowError> {
        self.binary(Prim::Mul, x, y)
    }

    pub fn div(&mut self, x: PortId, y: PortId) -> Result<PortId, ArrowError> {
        self.binary(Prim::Div, x, y)
    }

    pub fn pow(&mut self, x: PortId, y: PortId) -> Result<PortId, ArrowError> {
        self.binary(Prim::Pow, x, y)
    }

    pub fn neg(&mut self, x: PortId) -> Result<PortId, ArrowError> {
        self.unary(Prim::Neg, x)
    }

    pub fn sin(&mut self, x: PortId) -> Result<PortId, ArrowError> {
        self.unary(Prim::Sin, x)
    }

    pub fn cos(&mut self, x: PortId) -> Result<PortId, ArrowError> {
        self.unary(Prim::Cos, x)
    }

    pub fn exp(&mut self, x: PortId) -> Result<PortId, ArrowError> {
        self.unary(Prim::Exp, x)
    }

    pub fn log(&mut self, x: PortId) -> Result<PortId, ArrowError> {
        self.unary(Prim::Log, x)
    }

    /// Rows of `tensor` at `indices` along axis 0.
    pub fn gather(&mut self, tensor: PortId, indices: PortId) -> Result<PortId, ArrowError> {
        self.binary(Prim::Gather, tensor, indices)
    }

    /// Expose `value` as a boundary `Out` port.
    pub fn output(&mut self, value: PortId) -> Result<PortId, ArrowError> {
        self.expose(value, PortKind::Out)
    }

    /// Expose `value` as a boundary `Error` port.
    pub fn error_output(&mut self, value: PortId) -> Result<PortId, ArrowError> {
        self.expose(value, PortKind::Error)
    }

    fn expose(&mut self, value: PortId, kind: PortKind) -> Result<PortId, ArrowError> {
        let boundary = self.graph.add_boundary_port(self.composite, kind)?;
        self.graph.add_edge(self.composite, value, boundary)?;
        Ok(boundary)
    }

    pub fn finish(self) -> ArrowId {
        self.composite
    }
}
