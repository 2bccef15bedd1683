// symbolic.rs — Symbolic evaluation and per-primitive constraints
//
// Runs an arrow over symbolic expressions instead of literals. Each boundary
// `In` / `Param` port is bound to a fresh variable; every primitive maps its
// argument expressions to output expressions and contributes the relations
// that must hold between them (equal copies, domain bounds, clamp bounds).
//
// Preconditions: every receiving port reached during the walk is driven.
// Postconditions: one expression per out-like boundary port, in port order.
// Failure modes: undriven ports and arity mismatches (`Eval`, `Arity`).
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::error::ArrowError;
use crate::graph::{ArrowGraph, ArrowKind, PortKind};
use crate::id::{ArrowId, PortId};
use crate::literal::Literal;
use crate::prim::Prim;

#[derive(Debug, Clone, PartialEq)]
pub enum SymExpr {
    Var(String),
    Const(Literal),
    /// Output `output` of `prim` applied to `args`.
    Apply {
        prim: Prim,
        args: Vec<SymExpr>,
        output: usize,
    },
}

impl SymExpr {
    pub fn var(name: impl Into<String>) -> Self {
        SymExpr::Var(name.into())
    }

    fn num(value: f64) -> Self {
        SymExpr::Const(Literal::scalar(value))
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymExpr::Var(name) => write!(f, "{name}"),
            SymExpr::Const(lit) => write!(f, "{lit}"),
            SymExpr::Apply { prim, args, output } => {
                write!(f, "{prim}")?;
                if prim.n_out() > 1 {
                    write!(f, "#{output}")?;
                }
                write!(f, "(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Eq(SymExpr, SymExpr),
    Gt(SymExpr, SymExpr),
    Ge(SymExpr, SymExpr),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Eq(a, b) => write!(f, "{a} = {b}"),
            Constraint::Gt(a, b) => write!(f, "{a} > {b}"),
            Constraint::Ge(a, b) => write!(f, "{a} >= {b}"),
        }
    }
}

impl Prim {
    /// Relations between the symbolic inputs and outputs of this primitive.
    pub fn constraints(&self, inputs: &[SymExpr], outputs: &[SymExpr]) -> Vec<Constraint> {
        let mut out = Vec::new();
        match self {
            Prim::Dupl { .. } => pairwise_equal(outputs, &mut out),
            Prim::InvDupl { .. } => {
                if let Some(result) = outputs.first() {
                    for x in inputs {
                        out.push(Constraint::Eq(result.clone(), x.clone()));
                    }
                }
            }
            Prim::ApproxIdentity { n } => {
                pairwise_equal(&outputs[..(*n).min(outputs.len())], &mut out);
                if let Some(err) = outputs.get(*n) {
                    out.push(Constraint::Ge(err.clone(), SymExpr::num(0.0)));
                }
            }
            Prim::IntervalBoundIdentity { lo, hi } => {
                if let (Some(v), Some(err)) = (outputs.first(), outputs.get(1)) {
                    out.push(Constraint::Ge(v.clone(), SymExpr::num(*lo)));
                    out.push(Constraint::Ge(SymExpr::num(*hi), v.clone()));
                    out.push(Constraint::Ge(err.clone(), SymExpr::num(0.0)));
                }
            }
            Prim::Identity => {
                if let (Some(x), Some(y)) = (inputs.first(), outputs.first()) {
                    out.push(Constraint::Eq(y.clone(), x.clone()));
                }
            }
            Prim::Log => {
                if let Some(x) = inputs.first() {
                    out.push(Constraint::Gt(x.clone(), SymExpr::num(0.0)));
                }
            }
            Prim::LogBase => {
                for x in inputs {
                    out.push(Constraint::Gt(x.clone(), SymExpr::num(0.0)));
                }
            }
            Prim::Asin | Prim::Acos => {
                if let Some(x) = inputs.first() {
                    out.push(Constraint::Ge(SymExpr::num(1.0), x.clone()));
                    out.push(Constraint::Ge(x.clone(), SymExpr::num(-1.0)));
                }
            }
            Prim::Abs => {
                if let Some(y) = outputs.first() {
                    out.push(Constraint::Ge(y.clone(), SymExpr::num(0.0)));
                }
            }
            Prim::Exp => {
                if let Some(y) = outputs.first() {
                    out.push(Constraint::Gt(y.clone(), SymExpr::num(0.0)));
                }
            }
            _ => {}
        }
        out
    }
}

fn pairwise_equal(exprs: &[SymExpr], out: &mut Vec<Constraint>) {
    for (i, a) in exprs.iter().enumerate() {
        for b in &exprs[i + 1..] {
            out.push(Constraint::Eq(a.clone(), b.clone()));
        }
    }
}

/// Result of a symbolic walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbolic {
    /// Variables bound to the in-like boundary ports, in port order.
    pub inputs: Vec<SymExpr>,
    pub outputs: Vec<SymExpr>,
    pub constraints: Vec<Constraint>,
}

/// Evaluate `arrow` symbolically. `In` ports are named `input_{i}` and
/// `Param` ports `param_{i}`, where `i` is the port index.
pub fn symbolic_apply(graph: &ArrowGraph, arrow: ArrowId) -> Result<Symbolic, ArrowError> {
    let mut inputs = Vec::new();
    for &port in graph.ports(arrow)? {
        let p = graph.port(port)?;
        match p.kind {
            PortKind::In => inputs.push(SymExpr::var(format!("input_{}", p.index))),
            PortKind::Param => inputs.push(SymExpr::var(format!("param_{}", p.index))),
            PortKind::Out | PortKind::Error => {}
        }
    }
    let mut constraints = Vec::new();
    let outputs = expand(graph, arrow, &inputs, &mut constraints)?;
    Ok(Symbolic {
        inputs,
        outputs,
        constraints,
    })
}

fn expand(
    graph: &ArrowGraph,
    arrow: ArrowId,
    args: &[SymExpr],
    constraints: &mut Vec<Constraint>,
) -> Result<Vec<SymExpr>, ArrowError> {
    match &graph.arrow(arrow)?.kind {
        ArrowKind::Source(value) => Ok(vec![SymExpr::Const(value.clone())]),
        ArrowKind::Primitive(prim) => {
            if args.len() != prim.n_in() {
                return Err(ArrowError::Arity {
                    what: prim.name(),
                    expected: prim.n_in(),
                    actual: args.len(),
                });
            }
            let outputs: Vec<SymExpr> = match prim {
                Prim::Identity | Prim::Dupl { .. } => vec![args[0].clone(); prim.n_out()],
                Prim::InvDupl { .. } => vec![args[0].clone()],
                _ => (0..prim.n_out())
                    .map(|output| SymExpr::Apply {
                        prim: prim.clone(),
                        args: args.to_vec(),
                        output,
                    })
                    .collect(),
            };
            constraints.extend(prim.constraints(args, &outputs));
            Ok(outputs)
        }
        ArrowKind::Composite(_) => expand_composite(graph, arrow, args, constraints),
    }
}

fn expand_composite(
    graph: &ArrowGraph,
    composite: ArrowId,
    args: &[SymExpr],
    constraints: &mut Vec<Constraint>,
) -> Result<Vec<SymExpr>, ArrowError> {
    let name = &graph.arrow(composite)?.name;
    let in_ports = graph.in_ports(composite)?;
    if in_ports.len() != args.len() {
        return Err(ArrowError::Arity {
            what: format!("composite '{name}'"),
            expected: in_ports.len(),
            actual: args.len(),
        });
    }
    let edges = graph.edges(composite)?;
    let mut env: HashMap<PortId, SymExpr> = in_ports.into_iter().zip(args.iter().cloned()).collect();

    let mut pending: Vec<ArrowId> = graph.children(composite)?.to_vec();
    while !pending.is_empty() {
        let before = pending.len();
        let mut waiting = Vec::new();
        for child in pending {
            let child_args: Option<Vec<SymExpr>> = graph
                .in_ports(child)?
                .iter()
                .map(|&p| edges.source(p).and_then(|s| env.get(&s)).cloned())
                .collect();
            let Some(child_args) = child_args else {
                waiting.push(child);
                continue;
            };
            let results = expand(graph, child, &child_args, constraints)?;
            env.extend(graph.out_ports(child)?.into_iter().zip(results));
        }
        if waiting.len() == before {
            return Err(ArrowError::eval(
                format!("composite '{name}'"),
                format!("{} children have undriven inputs", waiting.len()),
            ));
        }
        pending = waiting;
    }

    graph
        .out_ports(composite)?
        .into_iter()
        .map(|port| {
            edges
                .source(port)
                .and_then(|s| env.get(&s))
                .cloned()
                .ok_or_else(|| {
                    ArrowError::eval(format!("composite '{name}'"), format!("output {port} is undriven"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ExprBuilder;

    #[test]
    fn xy_plus_x_expression() {
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "xy_plus_x");
        let x = b.input().unwrap();
        let y = b.input().unwrap();
        let xy = b.mul(x, y).unwrap();
        let z = b.add(xy, x).unwrap();
        b.output(z).unwrap();
        let c = b.finish();

        let sym = symbolic_apply(&g, c).unwrap();
        assert_eq!(sym.inputs.len(), 2);
        assert_eq!(sym.outputs[0].to_string(), "Add(Mul(input_0, input_1), input_0)");
        assert!(sym.constraints.is_empty());
    }

    #[test]
    fn dupl_outputs_pairwise_equal() {
        let xs: Vec<SymExpr> = (0..3).map(|i| SymExpr::var(format!("o{i}"))).collect();
        let cs = Prim::Dupl { n: 3 }.constraints(&[SymExpr::var("x")], &xs);
        let text: Vec<String> = cs.iter().map(ToString::to_string).collect();
        assert_eq!(text, vec!["o0 = o1", "o0 = o2", "o1 = o2"]);
    }

    #[test]
    fn inverse_exposes_param_and_clamp_constraints() {
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "sin");
        let x = b.input().unwrap();
        let s = b.sin(x).unwrap();
        b.output(s).unwrap();
        let fwd = b.finish();
        let inv = crate::invert::invert(&mut g, &crate::registry::Registry::default(), fwd).unwrap();

        let sym = symbolic_apply(&g, inv).unwrap();
        assert_eq!(sym.outputs.len(), 2);
        // clamp bounds and non-negative residual, then the arcsine domain
        assert_eq!(sym.constraints.len(), 5);
        assert!(matches!(sym.constraints[0], Constraint::Ge(_, _)));
        assert_eq!(sym.constraints[2].to_string(), format!("{} >= 0", sym.outputs[1]));
        assert!(sym.outputs[0].to_string().starts_with("Asin(IBI[-0.999, 0.999]#0"));
    }

    #[test]
    fn params_are_named_apart() {
        let mut g = ArrowGraph::new();
        let mut b = ExprBuilder::new(&mut g, "shift");
        let x = b.input().unwrap();
        let t = b.param().unwrap();
        let z = b.add(x, t).unwrap();
        b.output(z).unwrap();
        let c = b.finish();
        let sym = symbolic_apply(&g, c).unwrap();
        assert_eq!(sym.inputs, vec![SymExpr::var("input_0"), SymExpr::var("param_1")]);
    }
}
