// interpret.rs — Reference interpreter over f64 tensors
//
// Evaluates an arrow on concrete `Literal` inputs. This is an oracle for
// checking inversions, not a backend: no scheduling, no buffers, each child
// is evaluated once all of its inputs are available.
//
// Preconditions: inputs are given in the order of the arrow's in-like ports
//                (`In` and `Param`, by port index).
// Postconditions: outputs are returned in the order of the arrow's out-like
//                 ports (`Out` and `Error`, by port index).
// Failure modes: arity mismatches, incompatible shapes, out-of-range
//                indices and undriven ports produce `ArrowError::Eval`.
// Side effects: none.

use std::collections::HashMap;

use tracing::trace;

use crate::error::ArrowError;
use crate::graph::{ArrowGraph, ArrowKind};
use crate::id::{ArrowId, PortId};
use crate::literal::{element_count, Literal, MAX_ELEMENTS};
use crate::prim::Prim;

/// Evaluate `arrow` on `inputs`.
pub fn evaluate(
    graph: &ArrowGraph,
    arrow: ArrowId,
    inputs: &[Literal],
) -> Result<Vec<Literal>, ArrowError> {
    let a = graph.arrow(arrow)?;
    match &a.kind {
        ArrowKind::Primitive(prim) => apply_prim(prim, inputs),
        ArrowKind::Source(value) => Ok(vec![value.clone()]),
        ArrowKind::Composite(_) => evaluate_composite(graph, arrow, inputs),
    }
}

fn evaluate_composite(
    graph: &ArrowGraph,
    composite: ArrowId,
    inputs: &[Literal],
) -> Result<Vec<Literal>, ArrowError> {
    let name = &graph.arrow(composite)?.name;
    let in_ports = graph.in_ports(composite)?;
    if in_ports.len() != inputs.len() {
        return Err(ArrowError::Arity {
            what: format!("composite '{name}'"),
            expected: in_ports.len(),
            actual: inputs.len(),
        });
    }
    let edges = graph.edges(composite)?;
    let mut values: HashMap<PortId, Literal> = in_ports
        .iter()
        .copied()
        .zip(inputs.iter().cloned())
        .collect();

    let mut pending: Vec<ArrowId> = graph.children(composite)?.to_vec();
    while !pending.is_empty() {
        let mut waiting = Vec::with_capacity(pending.len());
        let before = pending.len();
        for child in pending {
            let child_ins = graph.in_ports(child)?;
            let args: Option<Vec<Literal>> = child_ins
                .iter()
                .map(|&p| edges.source(p).and_then(|s| values.get(&s)).cloned())
                .collect();
            let Some(args) = args else {
                waiting.push(child);
                continue;
            };
            let results = evaluate(graph, child, &args)?;
            trace!(%child, outputs = results.len(), "evaluated");
            for (port, value) in graph.out_ports(child)?.into_iter().zip(results) {
                values.insert(port, value);
            }
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
                .and_then(|s| values.get(&s))
                .cloned()
                .ok_or_else(|| {
                    ArrowError::eval(format!("composite '{name}'"), format!("output {port} is undriven"))
                })
        })
        .collect()
}

/// Apply a single primitive to concrete operands.
pub fn apply_prim(prim: &Prim, inputs: &[Literal]) -> Result<Vec<Literal>, ArrowError> {
    let n_in = prim.n_in();
    if inputs.len() != n_in {
        return Err(ArrowError::Arity {
            what: prim.name(),
            expected: n_in,
            actual: inputs.len(),
        });
    }
    let binary = |f: fn(f64, f64) -> f64| -> Result<Vec<Literal>, ArrowError> {
        inputs[0]
            .zip_with(&inputs[1], f)
            .map(|v| vec![v])
            .ok_or_else(|| {
                ArrowError::eval(
                    prim.name(),
                    format!(
                        "incompatible shapes {:?} and {:?}",
                        inputs[0].shape(),
                        inputs[1].shape()
                    ),
                )
            })
    };
    let unary = |f: fn(f64) -> f64| -> Result<Vec<Literal>, ArrowError> {
        Ok(vec![inputs[0].map(f)])
    };

    match prim {
        Prim::Add => binary(|a, b| a + b),
        Prim::Sub => binary(|a, b| a - b),
        Prim::Mul => binary(|a, b| a * b),
        Prim::Div => binary(|a, b| a / b),
        Prim::Pow => binary(f64::powf),
        Prim::LogBase => binary(|base, v| v.ln() / base.ln()),
        Prim::Neg => unary(|a| -a),
        Prim::Abs => unary(f64::abs),
        Prim::Sin => unary(f64::sin),
        Prim::Cos => unary(f64::cos),
        Prim::Exp => unary(f64::exp),
        Prim::Asin => unary(f64::asin),
        Prim::Acos => unary(f64::acos),
        Prim::Log => unary(f64::ln),
        Prim::Identity => unary(|a| a),
        Prim::Dupl { n } => Ok(vec![inputs[0].clone(); *n]),
        Prim::InvDupl { .. } => Ok(vec![inputs[0].clone()]),
        Prim::ApproxIdentity { n } => approx_identity(prim, *n, inputs),
        Prim::IntervalBoundIdentity { lo, hi } => {
            let (lo, hi) = (*lo, *hi);
            let clamp = move |x: f64| x.max(lo).min(hi);
            let clamped = inputs[0].map(clamp);
            let error = inputs[0].map(|x| (x - clamp(x)).abs());
            Ok(vec![clamped, error])
        }
        Prim::Gather => gather(prim, &inputs[0], &inputs[1]),
        Prim::Scatter => scatter(prim, &inputs[0], &inputs[1], &inputs[2]),
    }
}

/// Elementwise mean of the copies, plus the mean over copies of each copy's
/// mean absolute deviation from that mean.
fn approx_identity(prim: &Prim, n: usize, inputs: &[Literal]) -> Result<Vec<Literal>, ArrowError> {
    let Some(first) = inputs.first() else {
        return Err(ArrowError::eval(prim.name(), "no copies to collapse"));
    };
    let mut sum = first.clone();
    for x in &inputs[1..] {
        sum = sum.zip_with(x, |a, b| a + b).ok_or_else(|| {
            ArrowError::eval(prim.name(), "copies disagree in shape")
        })?;
    }
    let mean = sum.map(|v| v / n as f64);
    let mut deviation = 0.0;
    for x in inputs {
        let abs_dev = x
            .zip_with(&mean, |a, m| (a - m).abs())
            .ok_or_else(|| ArrowError::eval(prim.name(), "copies disagree in shape"))?;
        deviation += abs_dev.mean();
    }
    let mut out = vec![mean; n];
    out.push(Literal::scalar(deviation / n as f64));
    Ok(out)
}

fn indices_of(prim: &Prim, lit: &Literal, what: &str) -> Result<Vec<usize>, ArrowError> {
    lit.as_indices()
        .ok_or_else(|| ArrowError::eval(prim.name(), format!("{what} must be non-negative integers")))
}

fn gather(prim: &Prim, tensor: &Literal, indices: &Literal) -> Result<Vec<Literal>, ArrowError> {
    let idx = indices_of(prim, indices, "indices")?;
    let rows = tensor
        .gather_rows(&idx)
        .ok_or_else(|| ArrowError::eval(prim.name(), "index out of range"))?;
    let mut shape = indices.shape().to_vec();
    shape.extend_from_slice(tensor.shape().get(1..).unwrap_or(&[]));
    let out = Literal::tensor(shape, rows.data().to_vec())
        .ok_or_else(|| ArrowError::eval(prim.name(), "gathered rows do not fill result"))?;
    Ok(vec![out])
}

fn scatter(
    prim: &Prim,
    indices: &Literal,
    dense_shape: &Literal,
    values: &Literal,
) -> Result<Vec<Literal>, ArrowError> {
    let idx = indices_of(prim, indices, "indices")?;
    let shape = indices_of(prim, dense_shape, "dense shape")?;
    if element_count(&shape).is_none() {
        return Err(ArrowError::eval(
            prim.name(),
            format!("dense shape {shape:?} exceeds {MAX_ELEMENTS} elements"),
        ));
    }
    let dense = Literal::scatter_rows(shape, &idx, values)
        .ok_or_else(|| ArrowError::eval(prim.name(), "values do not match indices or shape"))?;
    Ok(vec![dense])
}
