// graph.rs — Arena-allocated port graph of arrows
//
// Arrows (primitive, composite, source) and their ports live in one
// `ArrowGraph` arena addressed by `ArrowId` / `PortId`. A composite owns its
// children exclusively: ownership is the `parent` slot of the child, set once
// when the child is first wired into the composite and never reassigned.
//
// Preconditions: none; every mutation checks its own inputs.
// Postconditions: every composite satisfies the wiring invariant: each edge
//                 (L, R) has L projecting and R receiving in the composite,
//                 and each in-port is driven by at most one out-port.
// Failure modes: malformed wiring, re-parenting, double-driven in-ports and
//                ownership cycles are returned as `ArrowError`s.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ArrowError;
use crate::id::{ArrowId, IdAllocator, PortId};
use crate::literal::Literal;
use crate::prim::Prim;

// ── Ports ───────────────────────────────────────────────────────────────────

/// Direction and role of a port. `Param` is an input representing a free
/// variable introduced by inversion; `Error` is an output carrying the
/// residual of an approximate inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortKind {
    In,
    Out,
    Param,
    Error,
}

impl PortKind {
    pub fn is_input(self) -> bool {
        matches!(self, PortKind::In | PortKind::Param)
    }

    pub fn is_output(self) -> bool {
        matches!(self, PortKind::Out | PortKind::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PortKind::In => "in",
            PortKind::Out => "out",
            PortKind::Param => "param",
            PortKind::Error => "error",
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection point on an arrow. Ports carry no data; facts about them are
/// kept in `PortAttributes`, keyed by `PortId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub id: PortId,
    /// Owning arrow.
    pub arrow: ArrowId,
    /// Position within the owning arrow's port list.
    pub index: usize,
    pub kind: PortKind,
}

// ── Edges ───────────────────────────────────────────────────────────────────

/// Edge relation of a composite: an out-port may drive any number of
/// in-ports, an in-port is driven by at most one out-port.
#[derive(Debug, Clone, Default)]
pub struct EdgeMap {
    fwd: BTreeMap<PortId, BTreeSet<PortId>>,
    inv: BTreeMap<PortId, PortId>,
}

impl EdgeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `left → right`. Fails if `right` already has a driver.
    pub fn insert(&mut self, left: PortId, right: PortId) -> Result<(), ArrowError> {
        if let Some(&existing) = self.inv.get(&right) {
            return Err(ArrowError::InPortAlreadyDriven {
                port: right,
                existing,
            });
        }
        self.fwd.entry(left).or_default().insert(right);
        self.inv.insert(right, left);
        Ok(())
    }

    /// Ports driven by `left`, ascending.
    pub fn targets(&self, left: PortId) -> impl Iterator<Item = PortId> + '_ {
        self.fwd.get(&left).into_iter().flat_map(|s| s.iter().copied())
    }

    /// The single driver of `right`, if connected.
    pub fn source(&self, right: PortId) -> Option<PortId> {
        self.inv.get(&right).copied()
    }

    pub fn fan_out(&self, left: PortId) -> usize {
        self.fwd.get(&left).map_or(0, |s| s.len())
    }

    /// All edges, ordered by driving port then driven port.
    pub fn iter(&self) -> impl Iterator<Item = (PortId, PortId)> + '_ {
        self.fwd
            .iter()
            .flat_map(|(&l, rs)| rs.iter().map(move |&r| (l, r)))
    }

    /// Driving ports with at least one target, ascending.
    pub fn drivers(&self) -> impl Iterator<Item = PortId> + '_ {
        self.fwd.keys().copied()
    }

    pub fn touches(&self, port: PortId) -> bool {
        self.fwd.contains_key(&port) || self.inv.contains_key(&port)
    }

    pub fn len(&self) -> usize {
        self.inv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inv.is_empty()
    }
}

// ── Arrows ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Composite {
    /// Children in the order they were wired in.
    children: Vec<ArrowId>,
    edges: EdgeMap,
}

impl Composite {
    pub fn children(&self) -> &[ArrowId] {
        &self.children
    }

    pub fn edges(&self) -> &EdgeMap {
        &self.edges
    }
}

#[derive(Debug, Clone)]
pub enum ArrowKind {
    Primitive(Prim),
    Composite(Composite),
    /// Literal-valued arrow with no in-ports and a single out-port.
    Source(Literal),
}

#[derive(Debug, Clone)]
pub struct Arrow {
    pub id: ArrowId,
    pub name: String,
    pub kind: ArrowKind,
    ports: Vec<PortId>,
    parent: Option<ArrowId>,
}

impl Arrow {
    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }

    pub fn parent(&self) -> Option<ArrowId> {
        self.parent
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, ArrowKind::Primitive(_))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, ArrowKind::Composite(_))
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, ArrowKind::Source(_))
    }

    pub fn prim(&self) -> Option<&Prim> {
        match &self.kind {
            ArrowKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn composite(&self) -> Option<&Composite> {
        match &self.kind {
            ArrowKind::Composite(c) => Some(c),
            _ => None,
        }
    }
}

// ── Arena ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ArrowGraph {
    ids: IdAllocator,
    arrows: Vec<Arrow>,
    ports: Vec<Port>,
}

impl ArrowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arrow_count(&self) -> usize {
        self.arrows.len()
    }

    pub fn arrow(&self, id: ArrowId) -> Result<&Arrow, ArrowError> {
        self.arrows.get(id.index()).ok_or(ArrowError::UnknownArrow(id))
    }

    pub fn port(&self, id: PortId) -> Result<&Port, ArrowError> {
        self.ports.get(id.index()).ok_or(ArrowError::UnknownPort(id))
    }

    fn arrow_mut(&mut self, id: ArrowId) -> Result<&mut Arrow, ArrowError> {
        self.arrows
            .get_mut(id.index())
            .ok_or(ArrowError::UnknownArrow(id))
    }

    fn new_arrow(&mut self, name: String, kind: ArrowKind) -> ArrowId {
        let id = self.ids.alloc_arrow();
        self.arrows.push(Arrow {
            id,
            name,
            kind,
            ports: Vec::new(),
            parent: None,
        });
        id
    }

    fn push_port(&mut self, arrow: ArrowId, kind: PortKind) -> PortId {
        let id = self.ids.alloc_port();
        let slot = &mut self.arrows[arrow.index()];
        let index = slot.ports.len();
        slot.ports.push(id);
        self.ports.push(Port {
            id,
            arrow,
            index,
            kind,
        });
        id
    }

    // ── Construction ────────────────────────────────────────────────────────

    pub fn add_primitive(&mut self, prim: Prim) -> ArrowId {
        let (n_in, n_out) = prim.arity();
        let id = self.new_arrow(prim.name(), ArrowKind::Primitive(prim));
        for _ in 0..n_in {
            self.push_port(id, PortKind::In);
        }
        for _ in 0..n_out {
            self.push_port(id, PortKind::Out);
        }
        id
    }

    pub fn add_source(&mut self, value: Literal) -> ArrowId {
        let id = self.new_arrow("Source".to_string(), ArrowKind::Source(value));
        self.push_port(id, PortKind::Out);
        id
    }

    /// Create an empty composite with no ports and no children.
    pub fn add_composite(&mut self, name: impl Into<String>) -> ArrowId {
        self.new_arrow(name.into(), ArrowKind::Composite(Composite::default()))
    }

    /// Append a boundary port of `kind` to a composite.
    pub fn add_boundary_port(
        &mut self,
        composite: ArrowId,
        kind: PortKind,
    ) -> Result<PortId, ArrowError> {
        self.composite(composite)?;
        Ok(self.push_port(composite, kind))
    }

    /// Wire `left → right` inside `composite`.
    ///
    /// Each endpoint's owner must be the composite itself, one of its
    /// children, or a parentless arrow (which becomes a child). After the edge
    /// is appended the whole composite is re-validated.
    pub fn add_edge(
        &mut self,
        composite: ArrowId,
        left: PortId,
        right: PortId,
    ) -> Result<(), ArrowError> {
        self.composite(composite)?;
        let l = *self.port(left)?;
        let r = *self.port(right)?;

        // Endpoint roles are checked as if both owners were already children.
        let projecting = if l.arrow == composite {
            l.kind.is_input()
        } else {
            l.kind.is_output()
        };
        if !projecting {
            return Err(ArrowError::NotProjecting {
                port: left,
                context: composite,
            });
        }
        let receiving = if r.arrow == composite {
            r.kind.is_output()
        } else {
            r.kind.is_input()
        };
        if !receiving {
            return Err(ArrowError::NotReceiving {
                port: right,
                context: composite,
            });
        }
        if let Some(existing) = self.composite(composite)?.edges.source(right) {
            return Err(ArrowError::InPortAlreadyDriven {
                port: right,
                existing,
            });
        }

        // Both owners are vetted before either is adopted.
        let mut adopt = Vec::new();
        for owner in [l.arrow, r.arrow] {
            if owner == composite || adopt.contains(&owner) {
                continue;
            }
            if self.check_adoptable(composite, owner)? {
                adopt.push(owner);
            }
        }
        for owner in adopt {
            self.adopt(composite, owner)?;
        }
        self.composite_mut(composite)?.edges.insert(left, right)?;
        self.validate_wiring(composite)
    }

    /// Build a composite from parentless sub-arrows.
    ///
    /// `in_ports` / `out_ports` are ports of sub-arrows to expose; a boundary
    /// port of the same kind is synthesized for each, in order, and bridged to
    /// it. All sub-arrows named by the arguments must be parentless.
    pub fn compose(
        &mut self,
        name: impl Into<String>,
        edges: &[(PortId, PortId)],
        in_ports: &[PortId],
        out_ports: &[PortId],
    ) -> Result<ArrowId, ArrowError> {
        let mut owners = BTreeSet::new();
        let all_ports = edges
            .iter()
            .flat_map(|&(l, r)| [l, r])
            .chain(in_ports.iter().copied())
            .chain(out_ports.iter().copied());
        for port in all_ports {
            owners.insert(self.port(port)?.arrow);
        }
        for &owner in &owners {
            if let Some(parent) = self.arrow(owner)?.parent {
                return Err(ArrowError::AlreadyParented {
                    arrow: owner,
                    parent,
                });
            }
        }

        let composite = self.add_composite(name);
        for &inner in in_ports {
            let kind = self.port(inner)?.kind;
            if !kind.is_input() {
                return Err(ArrowError::NotReceiving {
                    port: inner,
                    context: composite,
                });
            }
            let boundary = self.push_port(composite, kind);
            self.add_edge(composite, boundary, inner)?;
        }
        for &(l, r) in edges {
            self.add_edge(composite, l, r)?;
        }
        for &inner in out_ports {
            let kind = self.port(inner)?.kind;
            if !kind.is_output() {
                return Err(ArrowError::NotProjecting {
                    port: inner,
                    context: composite,
                });
            }
            let boundary = self.push_port(composite, kind);
            self.add_edge(composite, inner, boundary)?;
        }
        self.validate_wiring(composite)?;
        Ok(composite)
    }

    /// Re-tag an `In` boundary port of a composite as `Param`.
    pub fn mark_param(&mut self, port: PortId) -> Result<(), ArrowError> {
        self.retag(port, PortKind::In, PortKind::Param)
    }

    /// Re-tag an `Out` boundary port of a composite as `Error`.
    pub fn mark_error(&mut self, port: PortId) -> Result<(), ArrowError> {
        self.retag(port, PortKind::Out, PortKind::Error)
    }

    fn retag(&mut self, port: PortId, from: PortKind, to: PortKind) -> Result<(), ArrowError> {
        let p = *self.port(port)?;
        if p.kind == to {
            return Ok(());
        }
        if p.kind != from || !self.arrow(p.arrow)?.is_composite() {
            return Err(ArrowError::InvalidPortKind {
                port,
                requested: to.as_str(),
            });
        }
        self.ports[port.index()].kind = to;
        Ok(())
    }

    /// Make `child` a child of `composite`, or confirm it already is. The
    /// child must not enclose `composite`.
    pub fn add_child(&mut self, composite: ArrowId, child: ArrowId) -> Result<(), ArrowError> {
        if self.check_adoptable(composite, child)? {
            self.adopt(composite, child)?;
        }
        Ok(())
    }

    /// `Ok(true)` if `child` may become a child of `composite`, `Ok(false)` if
    /// it already is one.
    fn check_adoptable(&self, composite: ArrowId, child: ArrowId) -> Result<bool, ArrowError> {
        self.composite(composite)?;
        match self.arrow(child)?.parent {
            Some(p) if p == composite => return Ok(false),
            Some(p) => {
                return Err(ArrowError::AlreadyParented {
                    arrow: child,
                    parent: p,
                })
            }
            None => {}
        }
        // `child` must not enclose `composite`.
        let mut cursor = Some(composite);
        while let Some(a) = cursor {
            if a == child {
                return Err(ArrowError::OwnershipCycle {
                    arrow: child,
                    context: composite,
                });
            }
            cursor = self.arrow(a)?.parent;
        }
        Ok(true)
    }

    fn adopt(&mut self, composite: ArrowId, child: ArrowId) -> Result<(), ArrowError> {
        self.arrow_mut(child)?.parent = Some(composite);
        self.composite_mut(composite)?.children.push(child);
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn composite(&self, id: ArrowId) -> Result<&Composite, ArrowError> {
        self.arrow(id)?
            .composite()
            .ok_or(ArrowError::NotComposite(id))
    }

    fn composite_mut(&mut self, id: ArrowId) -> Result<&mut Composite, ArrowError> {
        match &mut self.arrow_mut(id)?.kind {
            ArrowKind::Composite(c) => Ok(c),
            _ => Err(ArrowError::NotComposite(id)),
        }
    }

    pub fn ports(&self, id: ArrowId) -> Result<&[PortId], ArrowError> {
        Ok(self.arrow(id)?.ports())
    }

    /// The port at `index` of `arrow`.
    pub fn port_at(&self, arrow: ArrowId, index: usize) -> Result<PortId, ArrowError> {
        self.arrow(arrow)?
            .ports
            .get(index)
            .copied()
            .ok_or(ArrowError::MissingRemap { arrow, index })
    }

    fn ports_where(
        &self,
        id: ArrowId,
        pred: impl Fn(PortKind) -> bool,
    ) -> Result<Vec<PortId>, ArrowError> {
        let arrow = self.arrow(id)?;
        Ok(arrow
            .ports
            .iter()
            .copied()
            .filter(|p| pred(self.ports[p.index()].kind))
            .collect())
    }

    /// Input-direction ports (`In` and `Param`) in index order.
    pub fn in_ports(&self, id: ArrowId) -> Result<Vec<PortId>, ArrowError> {
        self.ports_where(id, PortKind::is_input)
    }

    /// Output-direction ports (`Out` and `Error`) in index order.
    pub fn out_ports(&self, id: ArrowId) -> Result<Vec<PortId>, ArrowError> {
        self.ports_where(id, PortKind::is_output)
    }

    /// Ports of exactly `kind`, in index order.
    pub fn ports_of_kind(&self, id: ArrowId, kind: PortKind) -> Result<Vec<PortId>, ArrowError> {
        self.ports_where(id, |k| k == kind)
    }

    pub fn param_ports(&self, id: ArrowId) -> Result<Vec<PortId>, ArrowError> {
        self.ports_of_kind(id, PortKind::Param)
    }

    pub fn error_ports(&self, id: ArrowId) -> Result<Vec<PortId>, ArrowError> {
        self.ports_of_kind(id, PortKind::Error)
    }

    pub fn is_parametric(&self, id: ArrowId) -> Result<bool, ArrowError> {
        Ok(!self.param_ports(id)?.is_empty())
    }

    pub fn is_approximate(&self, id: ArrowId) -> Result<bool, ArrowError> {
        Ok(!self.error_ports(id)?.is_empty())
    }

    /// Children of a composite; empty for primitives and sources.
    pub fn children(&self, id: ArrowId) -> Result<&[ArrowId], ArrowError> {
        Ok(self.arrow(id)?.composite().map_or(&[], |c| c.children()))
    }

    pub fn edges(&self, id: ArrowId) -> Result<&EdgeMap, ArrowError> {
        Ok(self.composite(id)?.edges())
    }

    /// A port is projecting in `context` if it feeds values into the
    /// context's interior: a boundary in-port of the context, or an out-port
    /// of one of its children.
    pub fn is_projecting(&self, port: PortId, context: ArrowId) -> Result<bool, ArrowError> {
        let p = self.port(port)?;
        if p.arrow == context {
            return Ok(p.kind.is_input());
        }
        Ok(self.arrow(p.arrow)?.parent == Some(context) && p.kind.is_output())
    }

    /// A port is receiving in `context` if values flow into it there: an
    /// in-port of a child, or a boundary out-port of the context.
    pub fn is_receiving(&self, port: PortId, context: ArrowId) -> Result<bool, ArrowError> {
        let p = self.port(port)?;
        if p.arrow == context {
            return Ok(p.kind.is_output());
        }
        Ok(self.arrow(p.arrow)?.parent == Some(context) && p.kind.is_input())
    }

    /// Check every edge of `composite` against the projecting/receiving rule.
    pub fn validate_wiring(&self, composite: ArrowId) -> Result<(), ArrowError> {
        for (left, right) in self.edges(composite)?.iter() {
            if !self.is_projecting(left, composite)? {
                return Err(ArrowError::NotProjecting {
                    port: left,
                    context: composite,
                });
            }
            if !self.is_receiving(right, composite)? {
                return Err(ArrowError::NotReceiving {
                    port: right,
                    context: composite,
                });
            }
        }
        Ok(())
    }

    /// Validate `composite` and every composite nested inside it.
    pub fn validate_tree(&self, composite: ArrowId) -> Result<(), ArrowError> {
        self.validate_wiring(composite)?;
        for &child in self.children(composite)? {
            if self.arrow(child)?.is_composite() {
                self.validate_tree(child)?;
            }
        }
        Ok(())
    }

    // ── Copying ─────────────────────────────────────────────────────────────

    /// Deep structural copy of `id` into fresh, parentless arena slots.
    pub fn copy_arrow(&mut self, id: ArrowId) -> Result<ArrowId, ArrowError> {
        let mut port_map = HashMap::new();
        self.copy_into(id, &mut port_map)
    }

    fn copy_into(
        &mut self,
        id: ArrowId,
        port_map: &mut HashMap<PortId, PortId>,
    ) -> Result<ArrowId, ArrowError> {
        let arrow = self.arrow(id)?.clone();
        let copy = match &arrow.kind {
            ArrowKind::Primitive(p) => self.add_primitive(p.clone()),
            ArrowKind::Source(v) => self.add_source(v.clone()),
            ArrowKind::Composite(c) => {
                let copy = self.add_composite(arrow.name.clone());
                for &port in &arrow.ports {
                    let kind = self.port(port)?.kind;
                    let new = self.push_port(copy, kind);
                    port_map.insert(port, new);
                }
                for &child in c.children() {
                    let child_copy = self.copy_into(child, port_map)?;
                    self.add_child(copy, child_copy)?;
                }
                let lookup = |p: PortId| port_map.get(&p).copied().ok_or(ArrowError::UnknownPort(p));
                let edges: Vec<(PortId, PortId)> = c
                    .edges()
                    .iter()
                    .map(|(l, r)| Ok((lookup(l)?, lookup(r)?)))
                    .collect::<Result<_, ArrowError>>()?;
                for (l, r) in edges {
                    self.add_edge(copy, l, r)?;
                }
                return Ok(copy);
            }
        };
        self.arrow_mut(copy)?.name = arrow.name.clone();
        let new_ports = self.arrow(copy)?.ports.clone();
        for (&old, new) in arrow.ports.iter().zip(new_ports) {
            port_map.insert(old, new);
        }
        Ok(copy)
    }

    // ── Display ─────────────────────────────────────────────────────────────

    /// One-line description of an arrow's boundary.
    pub fn summary(&self, id: ArrowId) -> Result<String, ArrowError> {
        let arrow = self.arrow(id)?;
        let count = |k: PortKind| {
            arrow
                .ports
                .iter()
                .filter(|p| self.ports[p.index()].kind == k)
                .count()
        };
        let mut s = format!(
            "{} '{}': in={} param={} out={} error={}",
            kind_label(&arrow.kind),
            arrow.name,
            count(PortKind::In),
            count(PortKind::Param),
            count(PortKind::Out),
            count(PortKind::Error),
        );
        if let Some(c) = arrow.composite() {
            s.push_str(&format!(
                ", {} children, {} edges",
                c.children.len(),
                c.edges.len()
            ));
        }
        Ok(s)
    }

    /// Indented tree rendering of an arrow and everything it owns.
    pub fn display(&self, id: ArrowId) -> ArrowDisplay<'_> {
        ArrowDisplay { graph: self, id }
    }
}

fn kind_label(kind: &ArrowKind) -> &'static str {
    match kind {
        ArrowKind::Primitive(_) => "primitive",
        ArrowKind::Composite(_) => "composite",
        ArrowKind::Source(_) => "source",
    }
}

pub struct ArrowDisplay<'a> {
    graph: &'a ArrowGraph,
    id: ArrowId,
}

impl ArrowDisplay<'_> {
    fn write_arrow(&self, f: &mut fmt::Formatter<'_>, id: ArrowId, depth: usize) -> fmt::Result {
        let g = self.graph;
        let Some(arrow) = g.arrows.get(id.index()) else {
            return writeln!(f, "{:indent$}<missing {id}>", "", indent = depth * 2);
        };
        write!(f, "{:indent$}", "", indent = depth * 2)?;
        match &arrow.kind {
            ArrowKind::Source(v) => write!(f, "Source({v})")?,
            ArrowKind::Primitive(_) => write!(f, "{}", arrow.name)?,
            ArrowKind::Composite(_) => write!(f, "'{}'", arrow.name)?,
        }
        write!(f, " {id} [")?;
        for (i, p) in arrow.ports.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", g.ports[p.index()].kind, p)?;
        }
        writeln!(f, "]")?;
        if let Some(c) = arrow.composite() {
            for &child in &c.children {
                self.write_arrow(f, child, depth + 1)?;
            }
            for (l, r) in c.edges.iter() {
                writeln!(f, "{:indent$}{l} -> {r}", "", indent = (depth + 1) * 2)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ArrowDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_arrow(f, self.id, 0)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
