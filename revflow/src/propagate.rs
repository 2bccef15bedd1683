// propagate.rs — Port-attribute propagation to a fixpoint
//
// Runs a set of `Analysis` rules over every arrow of a graph until no rule
// can add a fact. Each analysis pairs a predicate (is enough known to fire?)
// with a dispatch (which facts follow?). Edges carry facts in both
// directions; a composite's boundary ports take part in its own edge set, so
// facts flow inward and outward through bridging edges with no extra step.
//
// Preconditions: `arrow` is well-wired.
// Postconditions: every fact derivable by the registered analyses is present
//                 in the attribute map.
// Failure modes: `ConflictingFact` when two derivations disagree,
//                `ShapeMismatch` when an elementwise arrow sees two shapes.
// Side effects: none beyond the attribute map.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, trace};

use crate::attr::{Constness, PortAttributes, PortFacts};
use crate::error::ArrowError;
use crate::graph::{ArrowGraph, ArrowKind};
use crate::id::{ArrowId, PortId};
use crate::interpret::apply_prim;
use crate::literal::Shape;
use crate::prim::Prim;

// ── Analyses ────────────────────────────────────────────────────────────────

/// Whether an analysis has enough information to fire on an arrow.
pub type Predicate = fn(&ArrowGraph, ArrowId, &PortAttributes) -> bool;

/// Facts derived for some of the arrow's ports.
pub type Dispatch =
    fn(&ArrowGraph, ArrowId, &PortAttributes) -> Result<Vec<(PortId, PortFacts)>, ArrowError>;

#[derive(Clone, Copy)]
pub struct Analysis {
    pub name: &'static str,
    pub predicate: Predicate,
    pub dispatch: Dispatch,
}

impl std::fmt::Debug for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analysis").field("name", &self.name).finish()
    }
}

/// Source literals, constant-ness, shape and known values.
pub fn standard_analyses() -> Vec<Analysis> {
    vec![
        Analysis {
            name: "source",
            predicate: is_source,
            dispatch: source_facts,
        },
        Analysis {
            name: "constant",
            predicate: constness_ready,
            dispatch: constness_join,
        },
        Analysis {
            name: "shape",
            predicate: shape_ready,
            dispatch: shape_rule,
        },
        Analysis {
            name: "value",
            predicate: value_ready,
            dispatch: value_rule,
        },
    ]
}

fn prim_of(graph: &ArrowGraph, arrow: ArrowId) -> Option<&Prim> {
    graph.arrow(arrow).ok().and_then(|a| a.prim())
}

fn is_source(graph: &ArrowGraph, arrow: ArrowId, _: &PortAttributes) -> bool {
    graph.arrow(arrow).is_ok_and(|a| a.is_source())
}

fn source_facts(
    graph: &ArrowGraph,
    arrow: ArrowId,
    _: &PortAttributes,
) -> Result<Vec<(PortId, PortFacts)>, ArrowError> {
    let a = graph.arrow(arrow)?;
    let ArrowKind::Source(value) = &a.kind else {
        return Ok(Vec::new());
    };
    let out = graph.port_at(arrow, 0)?;
    Ok(vec![(
        out,
        PortFacts::value(value.clone()).with_constant(Constness::Constant),
    )])
}

/// Fires once every input is known, or as soon as one is known VARIABLE.
fn constness_ready(graph: &ArrowGraph, arrow: ArrowId, attrs: &PortAttributes) -> bool {
    if prim_of(graph, arrow).is_none() {
        return false;
    }
    let Ok(ins) = graph.in_ports(arrow) else {
        return false;
    };
    ins.iter().all(|&p| attrs.constness(p).is_some())
        || ins
            .iter()
            .any(|&p| attrs.constness(p) == Some(Constness::Variable))
}

fn constness_join(
    graph: &ArrowGraph,
    arrow: ArrowId,
    attrs: &PortAttributes,
) -> Result<Vec<(PortId, PortFacts)>, ArrowError> {
    let joined = graph
        .in_ports(arrow)?
        .iter()
        .map(|&p| attrs.constness(p).unwrap_or(Constness::Variable))
        .fold(Constness::Constant, Constness::join);
    Ok(graph
        .out_ports(arrow)?
        .into_iter()
        .map(|p| (p, PortFacts::constant(joined)))
        .collect())
}

fn shape_ready(graph: &ArrowGraph, arrow: ArrowId, attrs: &PortAttributes) -> bool {
    let Some(prim) = prim_of(graph, arrow) else {
        return false;
    };
    let Ok(ports) = graph.ports(arrow) else {
        return false;
    };
    match prim {
        Prim::Gather => attrs.shape(ports[0]).is_some() && attrs.shape(ports[1]).is_some(),
        Prim::Scatter => attrs.value(ports[1]).is_some(),
        _ => ports.iter().any(|&p| attrs.shape(p).is_some()),
    }
}

fn shape_rule(
    graph: &ArrowGraph,
    arrow: ArrowId,
    attrs: &PortAttributes,
) -> Result<Vec<(PortId, PortFacts)>, ArrowError> {
    let Some(prim) = prim_of(graph, arrow) else {
        return Ok(Vec::new());
    };
    let ports = graph.ports(arrow)?;
    match prim {
        Prim::Gather => {
            let (Some(tensor), Some(indices)) = (attrs.shape(ports[0]), attrs.shape(ports[1]))
            else {
                return Ok(Vec::new());
            };
            let mut shape = indices.to_vec();
            shape.extend_from_slice(tensor.get(1..).unwrap_or(&[]));
            Ok(vec![(ports[2], PortFacts::shape(shape))])
        }
        Prim::Scatter => {
            let Some(dense) = attrs.value(ports[1]).and_then(|v| v.as_indices()) else {
                return Ok(Vec::new());
            };
            Ok(vec![(ports[3], PortFacts::shape(dense))])
        }
        Prim::ApproxIdentity { n } => {
            let (shared, error) = ports.split_at(2 * n);
            let mut facts = uniform_shape(arrow, shared, attrs)?;
            facts.extend(error.iter().map(|&p| (p, PortFacts::shape(Shape::new()))));
            Ok(facts)
        }
        _ if prim.is_elementwise() => uniform_shape(arrow, ports, attrs),
        _ => Ok(Vec::new()),
    }
}

/// Every port in `ports` must share one shape.
fn uniform_shape(
    arrow: ArrowId,
    ports: &[PortId],
    attrs: &PortAttributes,
) -> Result<Vec<(PortId, PortFacts)>, ArrowError> {
    let mut known: Option<&[usize]> = None;
    for &p in ports {
        let Some(s) = attrs.shape(p) else { continue };
        match known {
            None => known = Some(s),
            Some(k) if k != s => {
                return Err(ArrowError::ShapeMismatch {
                    arrow,
                    left: k.to_vec(),
                    right: s.to_vec(),
                })
            }
            Some(_) => {}
        }
    }
    let Some(shape) = known else {
        return Ok(Vec::new());
    };
    Ok(ports
        .iter()
        .filter(|&&p| attrs.shape(p).is_none())
        .map(|&p| (p, PortFacts::shape(shape.to_vec())))
        .collect())
}

fn value_ready(graph: &ArrowGraph, arrow: ArrowId, attrs: &PortAttributes) -> bool {
    let Some(prim) = prim_of(graph, arrow) else {
        return false;
    };
    let Ok(ins) = graph.in_ports(arrow) else {
        return false;
    };
    match prim {
        Prim::InvDupl { .. } => ins.iter().any(|&p| attrs.value(p).is_some()),
        _ => ins.iter().all(|&p| attrs.value(p).is_some()),
    }
}

/// Forwards values through copies and folds primitives whose operands are
/// all known.
fn value_rule(
    graph: &ArrowGraph,
    arrow: ArrowId,
    attrs: &PortAttributes,
) -> Result<Vec<(PortId, PortFacts)>, ArrowError> {
    let Some(prim) = prim_of(graph, arrow) else {
        return Ok(Vec::new());
    };
    let ins = graph.in_ports(arrow)?;
    let outs = graph.out_ports(arrow)?;

    if prim.forwards_value() {
        let Some(v) = ins.iter().find_map(|&p| attrs.value(p)) else {
            return Ok(Vec::new());
        };
        return Ok(outs
            .into_iter()
            .map(|p| (p, PortFacts::value(v.clone())))
            .collect());
    }

    let args: Vec<_> = ins.iter().filter_map(|&p| attrs.value(p).cloned()).collect();
    match apply_prim(prim, &args) {
        Ok(results) => Ok(outs
            .into_iter()
            .zip(results)
            .map(|(p, v)| (p, PortFacts::value(v)))
            .collect()),
        Err(e) => {
            debug!(%arrow, error = %e, "constant folding skipped");
            Ok(Vec::new())
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

struct ArrowWorklist {
    queue: VecDeque<ArrowId>,
    queued: HashSet<ArrowId>,
}

impl ArrowWorklist {
    fn seeded(arrows: &[ArrowId]) -> Self {
        ArrowWorklist {
            queue: arrows.iter().copied().collect(),
            queued: arrows.iter().copied().collect(),
        }
    }

    fn pop(&mut self) -> Option<ArrowId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    fn push(&mut self, id: ArrowId) {
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Propagator {
    analyses: Vec<Analysis>,
}

impl Default for Propagator {
    fn default() -> Self {
        Propagator::new(standard_analyses())
    }
}

impl Propagator {
    pub fn new(analyses: Vec<Analysis>) -> Self {
        Propagator { analyses }
    }

    /// Propagate over `arrow` with `attrs` as the starting facts. Boundary
    /// in-ports of `arrow` that have no constant-ness yet are seeded VARIABLE.
    pub fn run(
        &self,
        graph: &ArrowGraph,
        arrow: ArrowId,
        attrs: &mut PortAttributes,
    ) -> Result<(), ArrowError> {
        for p in graph.in_ports(arrow)? {
            if attrs.constness(p).is_none() {
                attrs.set_constness(p, Constness::Variable)?;
            }
        }
        let touched = self.fire(graph, arrow, attrs)?;
        debug!(%arrow, facts = attrs.len(), boundary_changes = touched.len(), "propagation settled");
        Ok(())
    }

    /// Apply everything that can fire on `arrow`. Returns the ports of
    /// `arrow` whose facts changed.
    fn fire(
        &self,
        graph: &ArrowGraph,
        arrow: ArrowId,
        attrs: &mut PortAttributes,
    ) -> Result<Vec<PortId>, ArrowError> {
        let a = graph.arrow(arrow)?;
        if a.is_composite() {
            let ports = a.ports().to_vec();
            let before: Vec<Option<PortFacts>> =
                ports.iter().map(|&p| attrs.get(p).cloned()).collect();
            self.settle(graph, arrow, attrs)?;
            return Ok(ports
                .into_iter()
                .zip(before)
                .filter(|(p, old)| attrs.get(*p) != old.as_ref())
                .map(|(p, _)| p)
                .collect());
        }

        let mut touched = Vec::new();
        // Rules may enable one another on the same arrow.
        loop {
            let mut progressed = false;
            for analysis in &self.analyses {
                if !(analysis.predicate)(graph, arrow, attrs) {
                    continue;
                }
                for (port, facts) in (analysis.dispatch)(graph, arrow, attrs)? {
                    if attrs.merge(port, &facts)? {
                        trace!(analysis = analysis.name, %arrow, %port, "derived");
                        touched.push(port);
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        Ok(touched)
    }

    /// Run `composite`'s children to a fixpoint.
    fn settle(
        &self,
        graph: &ArrowGraph,
        composite: ArrowId,
        attrs: &mut PortAttributes,
    ) -> Result<(), ArrowError> {
        debug!(%composite, "settling composite");
        let children = graph.children(composite)?;
        let edges = graph.edges(composite)?;
        let mut work = ArrowWorklist::seeded(children);

        let mut spread: Vec<PortId> = Vec::new();
        for (l, r) in edges.iter() {
            if attrs.flow(l, r)? {
                spread.push(r);
            }
            if attrs.flow(r, l)? {
                spread.push(l);
            }
        }
        self.spread(graph, composite, attrs, spread, &mut work)?;

        while let Some(child) = work.pop() {
            let touched = self.fire(graph, child, attrs)?;
            self.spread(graph, composite, attrs, touched, &mut work)?;
        }
        Ok(())
    }

    /// Carry changed facts across edges of `composite`, queueing every child
    /// that learns something.
    fn spread(
        &self,
        graph: &ArrowGraph,
        composite: ArrowId,
        attrs: &mut PortAttributes,
        mut changed: Vec<PortId>,
        work: &mut ArrowWorklist,
    ) -> Result<(), ArrowError> {
        let edges = graph.edges(composite)?;
        while let Some(p) = changed.pop() {
            let owner = graph.port(p)?.arrow;
            if owner != composite {
                work.push(owner);
            }
            let neighbours: Vec<PortId> = edges.targets(p).chain(edges.source(p)).collect();
            for q in neighbours {
                if attrs.flow(p, q)? {
                    changed.push(q);
                }
            }
        }
        Ok(())
    }
}

/// Propagate the standard analyses over `arrow` from scratch.
pub fn propagate(graph: &ArrowGraph, arrow: ArrowId) -> Result<PortAttributes, ArrowError> {
    let mut attrs = PortAttributes::new();
    Propagator::default().run(graph, arrow, &mut attrs)?;
    Ok(attrs)
}

/// Propagate the standard analyses over `arrow`, starting from `seed`.
pub fn propagate_seeded(
    graph: &ArrowGraph,
    arrow: ArrowId,
    seed: PortAttributes,
) -> Result<PortAttributes, ArrowError> {
    let mut attrs = seed;
    Propagator::default().run(graph, arrow, &mut attrs)?;
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::Literal;

    fn p(g: &ArrowGraph, a: ArrowId, i: usize) -> PortId {
        g.port_at(a, i).unwrap()
    }

    /// `z = x + 5`
    fn add_five(g: &mut ArrowGraph) -> (ArrowId, ArrowId) {
        let add = g.add_primitive(Prim::Add);
        let five = g.add_source(Literal::scalar(5.0));
        let c = g
            .compose(
                "add_five",
                &[(p(g, five, 0), p(g, add, 1))],
                &[p(g, add, 0)],
                &[p(g, add, 2)],
            )
            .unwrap();
        (c, add)
    }

    #[test]
    fn constant_operand_and_variable_input() {
        let mut g = ArrowGraph::new();
        let (c, add) = add_five(&mut g);
        let attrs = propagate(&g, c).unwrap();
        assert_eq!(attrs.constness(p(&g, add, 0)), Some(Constness::Variable));
        assert_eq!(attrs.constness(p(&g, add, 1)), Some(Constness::Constant));
        assert_eq!(attrs.constness(p(&g, add, 2)), Some(Constness::Variable));
        // pulled out onto the boundary
        assert_eq!(attrs.constness(p(&g, c, 1)), Some(Constness::Variable));
        // the scalar literal fixes every shape of the elementwise add
        assert_eq!(attrs.shape(p(&g, c, 0)), Some(&[][..]));
        assert_eq!(attrs.value(p(&g, add, 1)), Some(&Literal::scalar(5.0)));
    }

    #[test]
    fn all_constant_inputs_fold() {
        let mut g = ArrowGraph::new();
        let mul = g.add_primitive(Prim::Mul);
        let a = g.add_source(Literal::scalar(2.0));
        let b = g.add_source(Literal::scalar(4.0));
        let c = g
            .compose(
                "fold",
                &[(p(&g, a, 0), p(&g, mul, 0)), (p(&g, b, 0), p(&g, mul, 1))],
                &[],
                &[p(&g, mul, 2)],
            )
            .unwrap();
        let attrs = propagate(&g, c).unwrap();
        assert!(attrs.is_constant(p(&g, c, 0)));
        assert_eq!(attrs.value(p(&g, c, 0)), Some(&Literal::scalar(8.0)));
    }

    #[test]
    fn seeded_facts_flow_inward() {
        let mut g = ArrowGraph::new();
        let (c, add) = add_five(&mut g);
        let mut seed = PortAttributes::new();
        seed.set_constness(p(&g, c, 0), Constness::Constant).unwrap();
        let attrs = propagate_seeded(&g, c, seed).unwrap();
        assert!(attrs.is_constant(p(&g, add, 0)));
        assert!(attrs.is_constant(p(&g, c, 1)));
    }

    #[test]
    fn seeded_labels_stay_on_their_port() {
        let mut g = ArrowGraph::new();
        let (c, add) = add_five(&mut g);
        let mut seed = PortAttributes::new();
        seed.add_label(p(&g, c, 0), "x");
        let attrs = propagate_seeded(&g, c, seed).unwrap();
        assert!(attrs.has_label(p(&g, c, 0), "x"));
        assert!(!attrs.has_label(p(&g, add, 0), "x"));
        // other facts still flow past the labelled port
        assert_eq!(attrs.constness(p(&g, add, 0)), Some(Constness::Variable));
    }

    #[test]
    fn nested_composite_is_reentered() {
        let mut g = ArrowGraph::new();
        let (inner, inner_add) = add_five(&mut g);
        let neg = g.add_primitive(Prim::Neg);
        let outer = g
            .compose(
                "outer",
                &[(p(&g, inner, 1), p(&g, neg, 0))],
                &[p(&g, inner, 0)],
                &[p(&g, neg, 1)],
            )
            .unwrap();
        let mut seed = PortAttributes::new();
        seed.set_shape(p(&g, outer, 1), vec![]).unwrap();
        let attrs = propagate_seeded(&g, outer, seed).unwrap();
        assert_eq!(attrs.constness(p(&g, neg, 1)), Some(Constness::Variable));
        assert_eq!(attrs.shape(p(&g, inner_add, 0)), Some(&[][..]));
    }

    #[test]
    fn elementwise_shape_conflict() {
        let mut g = ArrowGraph::new();
        let add = g.add_primitive(Prim::Add);
        let v = g.add_source(Literal::vector(vec![1.0, 2.0]));
        let c = g
            .compose(
                "bad",
                &[(p(&g, v, 0), p(&g, add, 1))],
                &[p(&g, add, 0)],
                &[p(&g, add, 2)],
            )
            .unwrap();
        let mut seed = PortAttributes::new();
        seed.set_shape(p(&g, c, 0), vec![3]).unwrap();
        let err = propagate_seeded(&g, c, seed).unwrap_err();
        assert!(matches!(err, ArrowError::ShapeMismatch { .. }));
    }

    #[test]
    fn gather_and_scatter_shapes() {
        let mut g = ArrowGraph::new();
        let gather = g.add_primitive(Prim::Gather);
        let idx = g.add_source(Literal::vector(vec![0.0, 2.0]));
        let c = g
            .compose(
                "pick",
                &[(p(&g, idx, 0), p(&g, gather, 1))],
                &[p(&g, gather, 0)],
                &[p(&g, gather, 2)],
            )
            .unwrap();
        let mut seed = PortAttributes::new();
        seed.set_shape(p(&g, c, 0), vec![5, 3]).unwrap();
        let attrs = propagate_seeded(&g, c, seed).unwrap();
        assert_eq!(attrs.shape(p(&g, c, 1)), Some(&[2, 3][..]));

        let mut g = ArrowGraph::new();
        let scatter = g.add_primitive(Prim::Scatter);
        let dense = g.add_source(Literal::vector(vec![4.0]));
        let c = g
            .compose(
                "spread",
                &[(p(&g, dense, 0), p(&g, scatter, 1))],
                &[p(&g, scatter, 0), p(&g, scatter, 2)],
                &[p(&g, scatter, 3)],
            )
            .unwrap();
        let attrs = propagate(&g, c).unwrap();
        assert_eq!(attrs.shape(p(&g, c, 2)), Some(&[4][..]));
    }

    #[test]
    fn oversized_scatter_is_not_folded() {
        let mut g = ArrowGraph::new();
        let scatter = g.add_primitive(Prim::Scatter);
        let idx = g.add_source(Literal::vector(vec![0.0]));
        let dense = g.add_source(Literal::vector(vec![1e12]));
        let vals = g.add_source(Literal::vector(vec![1.0]));
        let c = g
            .compose(
                "huge",
                &[
                    (p(&g, idx, 0), p(&g, scatter, 0)),
                    (p(&g, dense, 0), p(&g, scatter, 1)),
                    (p(&g, vals, 0), p(&g, scatter, 2)),
                ],
                &[],
                &[p(&g, scatter, 3)],
            )
            .unwrap();
        let attrs = propagate(&g, c).unwrap();
        let out = p(&g, c, 0);
        assert_eq!(attrs.constness(out), Some(Constness::Constant));
        assert_eq!(attrs.shape(out), Some(&[1_000_000_000_000][..]));
        assert!(attrs.value(out).is_none());
    }

    #[test]
    fn fan_out_spreads_to_every_consumer() {
        let mut g = ArrowGraph::new();
        let c = g.add_composite("fan");
        let x = g.add_boundary_port(c, crate::graph::PortKind::In).unwrap();
        let n1 = g.add_primitive(Prim::Neg);
        let n2 = g.add_primitive(Prim::Sin);
        g.add_edge(c, x, p(&g, n1, 0)).unwrap();
        g.add_edge(c, x, p(&g, n2, 0)).unwrap();
        let mut seed = PortAttributes::new();
        seed.set_shape(x, vec![2]).unwrap();
        let attrs = propagate_seeded(&g, c, seed).unwrap();
        assert_eq!(attrs.shape(p(&g, n1, 1)), Some(&[2][..]));
        assert_eq!(attrs.shape(p(&g, n2, 1)), Some(&[2][..]));
        assert_eq!(attrs.constness(p(&g, n2, 1)), Some(Constness::Variable));
    }
}
