// invert.rs — Whole-graph inversion
//
// Turns a forward arrow into its inverse: leaves go through the rule
// registry, composites are rebuilt child by child and their edges re-routed
// through each child's port remap. Fan-out is first normalized into explicit
// duplication nodes so that every inverse port takes part in at most one
// edge.
//
// Preconditions: `arrow` is well-wired; rules needing static facts (index
//                sets, shapes) find them after propagation.
// Postconditions: the result is a fresh, parentless, well-wired arrow whose
//                 boundary is ordered In, Param, Out, Error; its remap maps
//                 every forward boundary index to an inverse boundary index.
// Failure modes: any rule failure; `MissingRemap` for an edge endpoint the
//                rule did not map; `DanglingInverse` when an edge maps onto
//                two ports of the same direction.
// Side effects: grows the arena. The forward graph is left unchanged.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::attr::PortAttributes;
use crate::error::ArrowError;
use crate::graph::{ArrowGraph, PortKind};
use crate::id::{ArrowId, PortId};
use crate::prim::Prim;
use crate::propagate::propagate_seeded;
use crate::registry::{Inversion, PortRemap, Registry};

/// Invert `arrow` and return the inverse arrow.
pub fn invert(
    graph: &mut ArrowGraph,
    registry: &Registry,
    arrow: ArrowId,
) -> Result<ArrowId, ArrowError> {
    Ok(invert_seeded(graph, registry, arrow, PortAttributes::new())?.arrow)
}

/// Invert `arrow` with caller-supplied starting facts (for example, boundary
/// inputs known to be constant). Returns the inverse and its boundary remap.
pub fn invert_seeded(
    graph: &mut ArrowGraph,
    registry: &Registry,
    arrow: ArrowId,
    seed: PortAttributes,
) -> Result<Inversion, ArrowError> {
    let attrs = propagate_seeded(graph, arrow, seed)?;
    let mut inverter = Inverter { registry, attrs };
    let inv = inverter.arrow(graph, arrow)?;
    info!(
        forward = %arrow,
        inverse = %inv.arrow,
        params = graph.param_ports(inv.arrow)?.len(),
        errors = graph.error_ports(inv.arrow)?.len(),
        "inverted"
    );
    Ok(inv)
}

struct Inverter<'r> {
    registry: &'r Registry,
    attrs: PortAttributes,
}

/// Position of a boundary port in the inverse, before sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    /// Mirrors the forward boundary port at this index.
    Forward(usize),
    /// Surfaced from inside the inverse, in discovery order.
    Surfaced(usize),
}

#[derive(Debug, Clone, Copy)]
enum End {
    Inner(PortId),
    Boundary(usize),
}

#[derive(Default)]
struct BoundaryPlan {
    slots: Vec<(PortKind, Tier)>,
    surfaced: usize,
    links: Vec<(End, End)>,
}

impl BoundaryPlan {
    fn push(&mut self, kind: PortKind, forward: Option<usize>) -> usize {
        let tier = match forward {
            Some(i) => Tier::Forward(i),
            None => {
                self.surfaced += 1;
                Tier::Surfaced(self.surfaced)
            }
        };
        self.slots.push((kind, tier));
        self.slots.len() - 1
    }

    /// New boundary port standing for `inner`, wired in `inner`'s direction.
    fn expose(&mut self, graph: &ArrowGraph, inner: PortId, forward: Option<usize>) -> Result<usize, ArrowError> {
        let kind = graph.port(inner)?.kind;
        Ok(self.expose_as(inner, kind, forward))
    }

    /// Like `expose`, but with the boundary kind chosen by the caller. The
    /// kind must have the same direction as `inner`.
    fn expose_as(&mut self, inner: PortId, kind: PortKind, forward: Option<usize>) -> usize {
        let slot = self.push(kind, forward);
        if kind.is_output() {
            self.links.push((End::Inner(inner), End::Boundary(slot)));
        } else {
            self.links.push((End::Boundary(slot), End::Inner(inner)));
        }
        slot
    }

    /// Slot indices in final boundary order.
    fn order(&self) -> Vec<usize> {
        let rank = |k: PortKind| match k {
            PortKind::In => 0,
            PortKind::Param => 1,
            PortKind::Out => 2,
            PortKind::Error => 3,
        };
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.sort_by_key(|&i| (rank(self.slots[i].0), self.slots[i].1));
        order
    }
}

impl Inverter<'_> {
    fn arrow(&mut self, graph: &mut ArrowGraph, arrow: ArrowId) -> Result<Inversion, ArrowError> {
        if graph.arrow(arrow)?.is_composite() {
            self.composite(graph, arrow)
        } else {
            self.registry.invert_leaf(graph, &self.attrs, arrow)
        }
    }

    /// Replace every out-port driving k > 1 ports with an explicit
    /// `Dupl { n: k }`. Returns the normalized edge list and the synthesized
    /// duplication arrows; the forward composite is not modified.
    fn normalize_fan_out(
        &mut self,
        graph: &mut ArrowGraph,
        fwd: ArrowId,
    ) -> Result<(Vec<(PortId, PortId)>, Vec<ArrowId>), ArrowError> {
        let fans: Vec<(PortId, Vec<PortId>)> = {
            let edges = graph.edges(fwd)?;
            edges
                .drivers()
                .map(|l| (l, edges.targets(l).collect()))
                .collect()
        };
        let mut normalized = Vec::new();
        let mut synthetic = Vec::new();
        for (left, targets) in fans {
            if targets.len() == 1 {
                normalized.push((left, targets[0]));
                continue;
            }
            let dupl = graph.add_primitive(Prim::Dupl { n: targets.len() });
            let dupl_in = graph.port_at(dupl, 0)?;
            self.attrs.flow(left, dupl_in)?;
            normalized.push((left, dupl_in));
            for (i, &target) in targets.iter().enumerate() {
                let copy = graph.port_at(dupl, i + 1)?;
                self.attrs.flow(left, copy)?;
                normalized.push((copy, target));
            }
            debug!(%fwd, port = %left, fan_out = targets.len(), %dupl, "fan-out normalized");
            synthetic.push(dupl);
        }
        Ok((normalized, synthetic))
    }

    fn composite(&mut self, graph: &mut ArrowGraph, fwd: ArrowId) -> Result<Inversion, ArrowError> {
        let name = format!("inv_{}", graph.arrow(fwd)?.name);
        debug!(%fwd, %name, "inverting composite");

        let (edges, synthetic) = self.normalize_fan_out(graph, fwd)?;
        let mut children = graph.children(fwd)?.to_vec();
        children.extend(synthetic);

        let mut inverses: HashMap<ArrowId, Inversion> = HashMap::with_capacity(children.len());
        for &child in &children {
            let inv = self.arrow(graph, child)?;
            inverses.insert(child, inv);
        }
        let map = |graph: &ArrowGraph, port: PortId| -> Result<PortId, ArrowError> {
            let p = graph.port(port)?;
            let inv = inverses
                .get(&p.arrow)
                .ok_or(ArrowError::UnknownArrow(p.arrow))?;
            let index = inv.remap.inverse_index(p.index).ok_or(ArrowError::MissingRemap {
                arrow: p.arrow,
                index: p.index,
            })?;
            graph.port_at(inv.arrow, index)
        };

        let mut plan = BoundaryPlan::default();
        let mut boundary_remap: Vec<(usize, usize)> = Vec::new();
        let mut wired: HashSet<PortId> = HashSet::new();
        let mut used: HashSet<PortId> = HashSet::new();

        for (l, r) in edges {
            used.insert(l);
            used.insert(r);
            let lp = *graph.port(l)?;
            let rp = *graph.port(r)?;
            match (lp.arrow == fwd, rp.arrow == fwd) {
                (false, false) => {
                    let (li, ri) = (map(graph, l)?, map(graph, r)?);
                    wired.insert(li);
                    wired.insert(ri);
                    let (from, to) = orient(graph, (l, r), li, ri)?;
                    plan.links.push((End::Inner(from), End::Inner(to)));
                }
                (true, false) => {
                    let ri = map(graph, r)?;
                    wired.insert(ri);
                    let slot = plan.expose(graph, ri, Some(lp.index))?;
                    boundary_remap.push((lp.index, slot));
                }
                (false, true) => {
                    let li = map(graph, l)?;
                    wired.insert(li);
                    let slot = plan.expose(graph, li, Some(rp.index))?;
                    boundary_remap.push((rp.index, slot));
                }
                (true, true) => {
                    let given = plan.push(PortKind::In, Some(rp.index));
                    let recovered = plan.push(PortKind::Out, Some(lp.index));
                    plan.links.push((End::Boundary(given), End::Boundary(recovered)));
                    boundary_remap.push((rp.index, given));
                    boundary_remap.push((lp.index, recovered));
                }
            }
        }

        // Forward boundary ports no edge touches.
        for (index, &port) in graph.ports(fwd)?.iter().enumerate() {
            if used.contains(&port) {
                continue;
            }
            if graph.port(port)?.kind.is_input() {
                // An unused input is unconstrained: pass a free parameter out.
                let theta = plan.push(PortKind::Param, None);
                let recovered = plan.push(PortKind::Out, Some(index));
                plan.links.push((End::Boundary(theta), End::Boundary(recovered)));
                boundary_remap.push((index, recovered));
            } else {
                let given = plan.push(PortKind::In, Some(index));
                boundary_remap.push((index, given));
            }
        }

        // Whatever the children's inverses leave unconnected surfaces. Only
        // forward outputs are given data, so a dangling inverse input is a
        // free parameter.
        for child in &children {
            let inv = &inverses[child];
            for &port in graph.ports(inv.arrow)? {
                if wired.contains(&port) {
                    continue;
                }
                let kind = match graph.port(port)?.kind {
                    PortKind::In => PortKind::Param,
                    kind => kind,
                };
                plan.expose_as(port, kind, None);
            }
        }

        let inverse = graph.add_composite(name);
        let order = plan.order();
        let mut slot_port = vec![None; plan.slots.len()];
        let mut slot_index = vec![0; plan.slots.len()];
        for (position, &slot) in order.iter().enumerate() {
            slot_port[slot] = Some(graph.add_boundary_port(inverse, plan.slots[slot].0)?);
            slot_index[slot] = position;
        }
        for child in &children {
            graph.add_child(inverse, inverses[child].arrow)?;
        }
        let resolve = |end: End| -> Result<PortId, ArrowError> {
            match end {
                End::Inner(p) => Ok(p),
                End::Boundary(slot) => slot_port[slot].ok_or(ArrowError::MissingRemap {
                    arrow: inverse,
                    index: slot,
                }),
            }
        };
        for &(from, to) in &plan.links {
            graph.add_edge(inverse, resolve(from)?, resolve(to)?)?;
        }
        graph.validate_tree(inverse)?;

        let remap = PortRemap::from_pairs(
            &boundary_remap
                .into_iter()
                .map(|(fwd_index, slot)| (fwd_index, slot_index[slot]))
                .collect::<Vec<_>>(),
        );
        debug!(%fwd, %inverse, ports = order.len(), "composite inverted");
        Ok(Inversion {
            arrow: inverse,
            remap,
        })
    }
}

/// Direct an inverse edge from its out-like end to its in-like end.
fn orient(
    graph: &ArrowGraph,
    (l, r): (PortId, PortId),
    li: PortId,
    ri: PortId,
) -> Result<(PortId, PortId), ArrowError> {
    let lk = graph.port(li)?.kind;
    let rk = graph.port(ri)?.kind;
    match (lk.is_output(), rk.is_output()) {
        (true, false) => Ok((li, ri)),
        (false, true) => Ok((ri, li)),
        (true, true) => Err(ArrowError::DanglingInverse {
            left: l,
            right: r,
            role: "output",
        }),
        (false, false) => Err(ArrowError::DanglingInverse {
            left: l,
            right: r,
            role: "input",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ExprBuilder;
    use crate::interpret::evaluate;
    use crate::literal::Literal;

    fn kinds(graph: &ArrowGraph, arrow: ArrowId) -> Vec<PortKind> {
        graph
            .ports(arrow)
            .unwrap()
            .iter()
            .map(|&p| graph.port(p).unwrap().kind)
            .collect()
    }

    #[test]
    fn add_constant_round_trip() {
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "add_five");
        let x = b.input().unwrap();
        let five = b.constant(Literal::scalar(5.0)).unwrap();
        let z = b.add(x, five).unwrap();
        b.output(z).unwrap();
        let fwd = b.finish();

        let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
        assert_eq!(kinds(&g, inv), vec![PortKind::In, PortKind::Out]);
        let x = evaluate(&g, inv, &[Literal::scalar(8.0)]).unwrap();
        assert_eq!(x, vec![Literal::scalar(3.0)]);
    }

    #[test]
    fn shared_input_is_collapsed() {
        // z = x * y + x
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "xy_plus_x");
        let x = b.input().unwrap();
        let y = b.input().unwrap();
        let xy = b.mul(x, y).unwrap();
        let z = b.add(xy, x).unwrap();
        b.output(z).unwrap();
        let fwd = b.finish();

        let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
        assert_eq!(
            kinds(&g, inv),
            vec![
                PortKind::In,
                PortKind::Param,
                PortKind::Param,
                PortKind::Out,
                PortKind::Out,
                PortKind::Error
            ]
        );
        g.validate_tree(inv).unwrap();
    }

    #[test]
    fn forward_graph_is_untouched() {
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "sin");
        let x = b.input().unwrap();
        let s = b.apply(Prim::Sin, &[x]).unwrap();
        b.output(s[0]).unwrap();
        let fwd = b.finish();
        let before = g.display(fwd).to_string();
        invert(&mut g, &Registry::default(), fwd).unwrap();
        assert_eq!(g.display(fwd).to_string(), before);
    }

    #[test]
    fn unused_input_becomes_param() {
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "ignore_y");
        let x = b.input().unwrap();
        let _y = b.input().unwrap();
        let n = b.apply(Prim::Neg, &[x]).unwrap();
        b.output(n[0]).unwrap();
        let fwd = b.finish();

        let inv = invert_seeded(&mut g, &Registry::default(), fwd, PortAttributes::new()).unwrap();
        assert_eq!(
            kinds(&g, inv.arrow),
            vec![PortKind::In, PortKind::Param, PortKind::Out, PortKind::Out]
        );
        // forward y (index 1) is recovered at the second Out
        assert_eq!(inv.remap.inverse_index(1), Some(3));
        assert_eq!(inv.remap.inverse_index(2), Some(0));
        let out = evaluate(&g, inv.arrow, &[Literal::scalar(4.0), Literal::scalar(7.0)]).unwrap();
        assert_eq!(out, vec![Literal::scalar(-4.0), Literal::scalar(7.0)]);
    }

    #[test]
    fn dead_intermediate_surfaces_as_param() {
        // x -> sin (unused); x -> neg -> out
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "dead_sin");
        let x = b.input().unwrap();
        let _dead = b.sin(x).unwrap();
        let n = b.neg(x).unwrap();
        b.output(n).unwrap();
        let fwd = b.finish();

        let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
        assert_eq!(
            kinds(&g, inv),
            vec![
                PortKind::In,
                PortKind::Param,
                PortKind::Out,
                PortKind::Error,
                PortKind::Error
            ]
        );
        assert_eq!(
            g.ports_of_kind(inv, PortKind::In).unwrap().len(),
            g.ports_of_kind(fwd, PortKind::Out).unwrap().len()
        );
        g.validate_tree(inv).unwrap();
    }

    #[test]
    fn nested_composites_invert_recursively() {
        let mut g = ArrowGraph::new();
        let mut inner = ExprBuilder::new(&mut g, "double");
        let x = inner.input().unwrap();
        let two = inner.constant(Literal::scalar(2.0)).unwrap();
        let d = inner.mul(x, two).unwrap();
        inner.output(d).unwrap();
        let double = inner.finish();

        let mut outer = ExprBuilder::new(&mut g, "double_then_neg");
        let x = outer.input().unwrap();
        let d = outer.call(double, &[x]).unwrap();
        let n = outer.apply(Prim::Neg, &[d[0]]).unwrap();
        outer.output(n[0]).unwrap();
        let fwd = outer.finish();

        let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
        let x = evaluate(&g, inv, &[Literal::scalar(-10.0)]).unwrap();
        assert_eq!(x, vec![Literal::scalar(5.0)]);
    }

    #[test]
    fn missing_rule_propagates() {
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "scatter");
        let i = b.input().unwrap();
        let s = b.input().unwrap();
        let v = b.input().unwrap();
        let out = b.apply(Prim::Scatter, &[i, s, v]).unwrap();
        b.output(out[0]).unwrap();
        let fwd = b.finish();
        let err = invert(&mut g, &Registry::default(), fwd).unwrap_err();
        assert_eq!(err.code().0, "E0301");
    }
}
