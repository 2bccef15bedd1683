// marking.rs — Known-port reachability
//
// From a seed set of known ports, computes every port of an arrow whose value
// becomes determined. A child's outputs become known once its required
// inputs are known (all of them by default). Children are visited from a
// min-priority queue keyed by their count of still-unknown required inputs;
// composite children are entered with whatever is known at their boundary
// and their newly known boundary outputs are lifted back out.
//
// Preconditions: seeds are ports in the arrow's own context (its boundary
//                ports or ports of its direct children).
// Postconditions: the result is the least set closed under the firing rule;
//                 it only grows when the seed set grows.
// Failure modes: seeds outside the context are rejected with `NotReceiving`.
// Side effects: none.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::ArrowError;
use crate::graph::{ArrowGraph, ArrowKind};
use crate::id::{ArrowId, PortId};
use crate::prim::Prim;

/// Number of known inputs an arrow needs before its outputs are known.
pub type RequiredInputs = fn(&ArrowGraph, ArrowId) -> Result<usize, ArrowError>;

/// Every in-like port must be known.
pub fn all_inputs(graph: &ArrowGraph, arrow: ArrowId) -> Result<usize, ArrowError> {
    Ok(graph.in_ports(arrow)?.len())
}

/// All inputs, except that any single copy determines an `InvDupl`.
pub fn default_required(graph: &ArrowGraph, arrow: ArrowId) -> Result<usize, ArrowError> {
    match graph.arrow(arrow)?.prim() {
        Some(Prim::InvDupl { n }) => Ok((*n).min(1)),
        _ => all_inputs(graph, arrow),
    }
}

/// Known ports, split by direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Marking {
    /// Known in-like ports (`In`, `Param`).
    pub ins: BTreeSet<PortId>,
    /// Known out-like ports (`Out`, `Error`).
    pub outs: BTreeSet<PortId>,
}

impl Marking {
    pub fn contains(&self, port: PortId) -> bool {
        self.ins.contains(&port) || self.outs.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.ins.len() + self.outs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ins.is_empty() && self.outs.is_empty()
    }

    pub fn is_superset(&self, other: &Marking) -> bool {
        self.ins.is_superset(&other.ins) && self.outs.is_superset(&other.outs)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Marker<'g> {
    graph: &'g ArrowGraph,
    required: RequiredInputs,
    seed_sources: bool,
}

impl<'g> Marker<'g> {
    pub fn new(graph: &'g ArrowGraph) -> Self {
        Marker {
            graph,
            required: default_required,
            seed_sources: false,
        }
    }

    pub fn required(mut self, required: RequiredInputs) -> Self {
        self.required = required;
        self
    }

    /// Treat every `Source` output, at every nesting level, as known.
    pub fn seed_sources(mut self, yes: bool) -> Self {
        self.seed_sources = yes;
        self
    }

    pub fn run(&self, arrow: ArrowId, knowns: &BTreeSet<PortId>) -> Result<Marking, ArrowError> {
        let a = self.graph.arrow(arrow)?;
        match &a.kind {
            ArrowKind::Composite(_) => self.run_composite(arrow, knowns),
            ArrowKind::Source(_) => {
                let mut m = Marking::default();
                if self.seed_sources {
                    m.outs.extend(a.ports().iter().copied());
                }
                Ok(m)
            }
            ArrowKind::Primitive(_) => {
                let ins = self.graph.in_ports(arrow)?;
                let mut m = Marking::default();
                for &k in knowns {
                    if !ins.contains(&k) {
                        return Err(ArrowError::NotReceiving {
                            port: k,
                            context: arrow,
                        });
                    }
                    m.ins.insert(k);
                }
                if m.ins.len() >= (self.required)(self.graph, arrow)? {
                    m.outs.extend(self.graph.out_ports(arrow)?);
                }
                Ok(m)
            }
        }
    }

    fn run_composite(
        &self,
        composite: ArrowId,
        knowns: &BTreeSet<PortId>,
    ) -> Result<Marking, ArrowError> {
        let mut st = MarkState::new(self, composite)?;
        for &k in knowns {
            let port = self.graph.port(k)?;
            let in_context = port.arrow == composite
                || self.graph.arrow(port.arrow)?.parent() == Some(composite);
            if !in_context {
                return Err(ArrowError::NotReceiving {
                    port: k,
                    context: composite,
                });
            }
            if self.graph.is_projecting(k, composite)? {
                st.project(k)?;
            } else {
                st.receive(k)?;
            }
        }
        if self.seed_sources {
            // Composite children are entered even with unknown inputs: their
            // own sources may determine some of their outputs.
            for &child in self.graph.children(composite)? {
                let a = self.graph.arrow(child)?;
                if a.is_source() || a.is_composite() {
                    let count = match st.remaining.get(&child) {
                        Some(&c) => c,
                        None => (self.required)(self.graph, child)?,
                    };
                    st.remaining.insert(child, count);
                    st.queue.push(Reverse((count, child)));
                }
            }
        }

        while let Some(Reverse((count, child))) = st.queue.pop() {
            if st.fired.contains(&child) || st.remaining.get(&child) != Some(&count) {
                continue;
            }
            trace!(%child, count, "marking pop");
            if self.graph.arrow(child)?.is_composite() {
                let inner_knowns: BTreeSet<PortId> = self
                    .graph
                    .in_ports(child)?
                    .into_iter()
                    .filter(|p| st.marking.ins.contains(p))
                    .collect();
                debug!(%child, seeds = inner_knowns.len(), "marking into composite");
                let inner = self.run_composite(child, &inner_knowns)?;
                for out in self.graph.out_ports(child)? {
                    if inner.outs.contains(&out) {
                        st.project(out)?;
                    }
                }
                if count == 0 {
                    st.fired.insert(child);
                }
            } else if count == 0 {
                st.fired.insert(child);
                for out in self.graph.out_ports(child)? {
                    st.project(out)?;
                }
            }
        }
        Ok(st.marking)
    }
}

struct MarkState<'m, 'g> {
    marker: &'m Marker<'g>,
    context: ArrowId,
    marking: Marking,
    remaining: HashMap<ArrowId, usize>,
    queue: BinaryHeap<Reverse<(usize, ArrowId)>>,
    fired: HashSet<ArrowId>,
}

impl<'m, 'g> MarkState<'m, 'g> {
    fn new(marker: &'m Marker<'g>, context: ArrowId) -> Result<Self, ArrowError> {
        marker.graph.composite(context)?;
        Ok(MarkState {
            marker,
            context,
            marking: Marking::default(),
            remaining: HashMap::new(),
            queue: BinaryHeap::new(),
            fired: HashSet::new(),
        })
    }

    /// A projecting port became known: everything it drives is known too.
    fn project(&mut self, port: PortId) -> Result<(), ArrowError> {
        let graph = self.marker.graph;
        let fresh = if graph.port(port)?.kind.is_input() {
            self.marking.ins.insert(port)
        } else {
            self.marking.outs.insert(port)
        };
        if !fresh {
            return Ok(());
        }
        let targets: Vec<PortId> = graph.edges(self.context)?.targets(port).collect();
        for t in targets {
            self.receive(t)?;
        }
        Ok(())
    }

    /// A receiving port became known: a child in-port counts toward its
    /// owner; a boundary out-port is simply recorded.
    fn receive(&mut self, port: PortId) -> Result<(), ArrowError> {
        let graph = self.marker.graph;
        let owner = graph.port(port)?.arrow;
        if owner == self.context {
            self.marking.outs.insert(port);
            return Ok(());
        }
        if !self.marking.ins.insert(port) {
            return Ok(());
        }
        let count = match self.remaining.get(&owner) {
            Some(&c) => c.saturating_sub(1),
            None => (self.marker.required)(graph, owner)?.saturating_sub(1),
        };
        self.remaining.insert(owner, count);
        self.queue.push(Reverse((count, owner)));
        Ok(())
    }
}

/// Mark from `knowns` with the default firing rule.
pub fn mark(
    graph: &ArrowGraph,
    arrow: ArrowId,
    knowns: &BTreeSet<PortId>,
) -> Result<Marking, ArrowError> {
    mark_with(graph, arrow, knowns, default_required)
}

/// Mark from `knowns` with a custom required-input rule.
pub fn mark_with(
    graph: &ArrowGraph,
    arrow: ArrowId,
    knowns: &BTreeSet<PortId>,
    required: RequiredInputs,
) -> Result<Marking, ArrowError> {
    Marker::new(graph).required(required).run(arrow, knowns)
}

/// Mark with every `Source` output known, plus any extra `knowns`.
pub fn mark_source(
    graph: &ArrowGraph,
    arrow: ArrowId,
    knowns: &BTreeSet<PortId>,
) -> Result<Marking, ArrowError> {
    Marker::new(graph).seed_sources(true).run(arrow, knowns)
}
