// rules.rs — Default inversion rules
//
// One rule per invertible primitive kind. Each builds its inverse inside the
// caller's arena and returns the forward → inverse port index remap.
//
// Shapes of the synthesized composites (boundary port order):
//   parametric binary   [z In, θ Param, x Out, y Out]
//   clamped unary       [z In, x Out, residual Error]
//   duplication         [copy_0 .. copy_{n-1} In, x Out, residual Error]
//   gather              [selected In, complement Param, indices In, tensor Out]
//
// Failure modes: `MissingAttribute` when a rule needs a static fact the
// propagation pass did not establish.

use crate::error::ArrowError;
use crate::graph::ArrowGraph;
use crate::id::{ArrowId, PortId};
use crate::literal::{complement, Literal};
use crate::prim::{Prim, PrimOp};
use crate::registry::{Inversion, PortRemap, Registry, RuleCtx};

pub fn register_defaults(registry: &mut Registry) {
    registry.register(PrimOp::Add, invert_add);
    registry.register(PrimOp::Sub, invert_sub);
    registry.register(PrimOp::Mul, invert_mul);
    registry.register(PrimOp::Div, invert_div);
    registry.register(PrimOp::Pow, invert_pow);
    registry.register(PrimOp::LogBase, invert_log_base);
    registry.register(PrimOp::Neg, invert_neg);
    registry.register(PrimOp::Identity, invert_identity);
    registry.register(PrimOp::Abs, invert_abs);
    registry.register(PrimOp::Log, invert_log);
    registry.register(PrimOp::Asin, invert_asin);
    registry.register(PrimOp::Acos, invert_acos);
    registry.register(PrimOp::Sin, invert_sin);
    registry.register(PrimOp::Cos, invert_cos);
    registry.register(PrimOp::Exp, invert_exp);
    registry.register(PrimOp::Dupl, invert_dupl);
    registry.register(PrimOp::InvDupl, invert_inv_dupl);
    registry.register(PrimOp::Gather, invert_gather);
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Structural copy with the identity remap.
pub(crate) fn copy(graph: &mut ArrowGraph, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    let n = graph.ports(arrow)?.len();
    let copy = graph.copy_arrow(arrow)?;
    Ok(Inversion {
        arrow: copy,
        remap: PortRemap::identity(n),
    })
}

fn port(graph: &ArrowGraph, arrow: ArrowId, index: usize) -> Result<PortId, ArrowError> {
    graph.port_at(arrow, index)
}

fn const_inputs(ctx: &RuleCtx<'_>, arrow: ArrowId) -> Result<Vec<bool>, ArrowError> {
    Ok(ctx
        .graph
        .in_ports(arrow)?
        .into_iter()
        .map(|p| ctx.attrs.is_constant(p))
        .collect())
}

fn single(graph: &mut ArrowGraph, prim: Prim, remap: &[(usize, usize)]) -> Inversion {
    Inversion {
        arrow: graph.add_primitive(prim),
        remap: PortRemap::from_pairs(remap),
    }
}

const SWAP_UNARY: [(usize, usize); 2] = [(0, 1), (1, 0)];
const PARAMETRIC_BINARY: [(usize, usize); 3] = [(0, 2), (1, 3), (2, 0)];

// ── Binary arithmetic ───────────────────────────────────────────────────────

/// How to invert `z = f(x, y)` depending on which operand is constant.
struct BinaryPlan {
    /// Inverse when x is constant, recovering y.
    x_known: (Prim, [(usize, usize); 3]),
    /// Inverse when y is constant, recovering x.
    y_known: (Prim, [(usize, usize); 3]),
    /// With neither constant: x = lost(z, θ) and y = θ.
    lost: Prim,
    name: &'static str,
}

fn invert_binary(
    ctx: &mut RuleCtx<'_>,
    arrow: ArrowId,
    plan: BinaryPlan,
) -> Result<Inversion, ArrowError> {
    match const_inputs(ctx, arrow)?.as_slice() {
        [true, true] => copy(ctx.graph, arrow),
        [true, false] => Ok(single(ctx.graph, plan.x_known.0, &plan.x_known.1)),
        [false, true] => Ok(single(ctx.graph, plan.y_known.0, &plan.y_known.1)),
        _ => parametric_binary(ctx.graph, plan.name, plan.lost),
    }
}

/// `(z, θ) → (lost(z, θ), θ)` with θ a `Param` port.
fn parametric_binary(
    graph: &mut ArrowGraph,
    name: &str,
    lost: Prim,
) -> Result<Inversion, ArrowError> {
    let dupl = graph.add_primitive(Prim::Dupl { n: 2 });
    let op = graph.add_primitive(lost);
    let c = graph.compose(
        name,
        &[(port(graph, dupl, 1)?, port(graph, op, 1)?)],
        &[port(graph, op, 0)?, port(graph, dupl, 0)?],
        &[port(graph, op, 2)?, port(graph, dupl, 2)?],
    )?;
    graph.mark_param(port(graph, c, 1)?)?;
    Ok(Inversion {
        arrow: c,
        remap: PortRemap::from_pairs(&PARAMETRIC_BINARY),
    })
}

fn invert_add(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    invert_binary(
        ctx,
        arrow,
        BinaryPlan {
            x_known: (Prim::Sub, [(0, 1), (1, 2), (2, 0)]),
            y_known: (Prim::Sub, [(0, 2), (1, 1), (2, 0)]),
            lost: Prim::Sub,
            name: "InvAdd",
        },
    )
}

fn invert_sub(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    invert_binary(
        ctx,
        arrow,
        BinaryPlan {
            x_known: (Prim::Sub, [(0, 0), (1, 2), (2, 1)]),
            y_known: (Prim::Add, [(0, 2), (1, 1), (2, 0)]),
            lost: Prim::Add,
            name: "InvSub",
        },
    )
}

fn invert_mul(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    invert_binary(
        ctx,
        arrow,
        BinaryPlan {
            x_known: (Prim::Div, [(0, 1), (1, 2), (2, 0)]),
            y_known: (Prim::Div, [(0, 2), (1, 1), (2, 0)]),
            lost: Prim::Div,
            name: "InvMul",
        },
    )
}

fn invert_div(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    invert_binary(
        ctx,
        arrow,
        BinaryPlan {
            x_known: (Prim::Div, [(0, 0), (1, 2), (2, 1)]),
            y_known: (Prim::Mul, [(0, 2), (1, 1), (2, 0)]),
            lost: Prim::Mul,
            name: "InvDiv",
        },
    )
}

fn invert_pow(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    match const_inputs(ctx, arrow)?.as_slice() {
        [true, true] => copy(ctx.graph, arrow),
        // y = log_x(z)
        [true, false] => Ok(single(ctx.graph, Prim::LogBase, &[(0, 0), (1, 2), (2, 1)])),
        // x = z ^ (1 / y)
        [false, true] => {
            let g = &mut *ctx.graph;
            let one = g.add_source(Literal::scalar(1.0));
            let recip = g.add_primitive(Prim::Div);
            let pow = g.add_primitive(Prim::Pow);
            let c = g.compose(
                "PowRoot",
                &[
                    (port(g, one, 0)?, port(g, recip, 0)?),
                    (port(g, recip, 2)?, port(g, pow, 1)?),
                ],
                &[port(g, pow, 0)?, port(g, recip, 1)?],
                &[port(g, pow, 2)?],
            )?;
            Ok(Inversion {
                arrow: c,
                remap: PortRemap::from_pairs(&[(0, 2), (1, 1), (2, 0)]),
            })
        }
        // x = θ, y = log_θ(z)
        _ => {
            let g = &mut *ctx.graph;
            let dupl = g.add_primitive(Prim::Dupl { n: 2 });
            let log = g.add_primitive(Prim::LogBase);
            let c = g.compose(
                "InvPow",
                &[(port(g, dupl, 1)?, port(g, log, 0)?)],
                &[port(g, log, 1)?, port(g, dupl, 0)?],
                &[port(g, dupl, 2)?, port(g, log, 2)?],
            )?;
            g.mark_param(port(g, c, 1)?)?;
            Ok(Inversion {
                arrow: c,
                remap: PortRemap::from_pairs(&PARAMETRIC_BINARY),
            })
        }
    }
}

/// `z = log_b(v)` with b constant inverts to `v = b ^ z`.
fn invert_log_base(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    let base = port(ctx.graph, arrow, 0)?;
    if !ctx.attrs.is_constant(base) {
        return Err(ArrowError::MissingAttribute {
            op: PrimOp::LogBase,
            port: base,
            attribute: "constant base",
        });
    }
    Ok(single(ctx.graph, Prim::Pow, &[(0, 0), (1, 2), (2, 1)]))
}

// ── Unary ───────────────────────────────────────────────────────────────────

fn invert_neg(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    Ok(single(ctx.graph, Prim::Neg, &SWAP_UNARY))
}

fn invert_identity(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    Ok(single(ctx.graph, Prim::Identity, &SWAP_UNARY))
}

fn invert_log(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    Ok(single(ctx.graph, Prim::Exp, &SWAP_UNARY))
}

fn invert_asin(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    Ok(single(ctx.graph, Prim::Sin, &SWAP_UNARY))
}

fn invert_acos(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    Ok(single(ctx.graph, Prim::Cos, &SWAP_UNARY))
}

/// `x = θ · z` where θ picks the sign lost by `abs`.
fn invert_abs(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    let g = &mut *ctx.graph;
    let mul = g.add_primitive(Prim::Mul);
    let c = g.compose(
        "InvAbs",
        &[],
        &[port(g, mul, 0)?, port(g, mul, 1)?],
        &[port(g, mul, 2)?],
    )?;
    g.mark_param(port(g, c, 1)?)?;
    Ok(Inversion {
        arrow: c,
        remap: PortRemap::from_pairs(&[(0, 2), (1, 0)]),
    })
}

/// Clamp into `[lo, hi]`, then apply the exact inverse. The clamping residual
/// becomes an `Error` port.
fn clamped_inverse(
    graph: &mut ArrowGraph,
    name: &str,
    (lo, hi): (f64, f64),
    inverse: Prim,
) -> Result<Inversion, ArrowError> {
    let ibi = graph.add_primitive(Prim::IntervalBoundIdentity { lo, hi });
    let f = graph.add_primitive(inverse);
    let c = graph.compose(
        name,
        &[(port(graph, ibi, 1)?, port(graph, f, 0)?)],
        &[port(graph, ibi, 0)?],
        &[port(graph, f, 1)?, port(graph, ibi, 2)?],
    )?;
    graph.mark_error(port(graph, c, 2)?)?;
    Ok(Inversion {
        arrow: c,
        remap: PortRemap::from_pairs(&SWAP_UNARY),
    })
}

fn invert_sin(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    let b = ctx.options.trig_bound;
    clamped_inverse(ctx.graph, "InvSin", (-b, b), Prim::Asin)
}

fn invert_cos(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    let b = ctx.options.trig_bound;
    clamped_inverse(ctx.graph, "InvCos", (-b, b), Prim::Acos)
}

fn invert_exp(ctx: &mut RuleCtx<'_>, _: ArrowId) -> Result<Inversion, ArrowError> {
    let bounds = ctx.options.exp_bounds;
    clamped_inverse(ctx.graph, "InvExp", bounds, Prim::Log)
}

// ── Control flow ────────────────────────────────────────────────────────────

fn dupl_width(graph: &ArrowGraph, arrow: ArrowId) -> Result<usize, ArrowError> {
    match graph.arrow(arrow)?.prim() {
        Some(Prim::Dupl { n }) | Some(Prim::InvDupl { n }) => Ok(*n),
        _ => Err(ArrowError::UnknownArrow(arrow)),
    }
}

/// Collapse n reconstructed copies into their mean, reporting how far they
/// disagree on an `Error` port.
fn invert_dupl(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    let g = &mut *ctx.graph;
    let n = dupl_width(g, arrow)?;
    let approx = g.add_primitive(Prim::ApproxIdentity { n });
    let collapse = g.add_primitive(Prim::InvDupl { n });
    let mut edges = Vec::with_capacity(n);
    let mut ins = Vec::with_capacity(n);
    for i in 0..n {
        edges.push((port(g, approx, n + i)?, port(g, collapse, i)?));
        ins.push(port(g, approx, i)?);
    }
    let outs = [port(g, collapse, n)?, port(g, approx, 2 * n)?];
    let c = g.compose("InvDuplApprox", &edges, &ins, &outs)?;
    g.mark_error(port(g, c, n + 1)?)?;

    let mut remap = PortRemap::new();
    remap.insert(0, n);
    for i in 0..n {
        remap.insert(i + 1, i);
    }
    Ok(Inversion { arrow: c, remap })
}

fn invert_inv_dupl(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    let n = dupl_width(ctx.graph, arrow)?;
    let mut remap = PortRemap::new();
    for i in 0..n {
        remap.insert(i, i + 1);
    }
    remap.insert(n, 0);
    Ok(Inversion {
        arrow: ctx.graph.add_primitive(Prim::Dupl { n }),
        remap,
    })
}

// ── Indexing ────────────────────────────────────────────────────────────────

/// Rebuild the gathered tensor: the selected rows come from the forward
/// output, every other row from a `Param` port.
fn invert_gather(ctx: &mut RuleCtx<'_>, arrow: ArrowId) -> Result<Inversion, ArrowError> {
    let tensor = port(ctx.graph, arrow, 0)?;
    let indices = port(ctx.graph, arrow, 1)?;
    let out = port(ctx.graph, arrow, 2)?;
    if ctx.attrs.is_constant(out) {
        return copy(ctx.graph, arrow);
    }
    let shape = ctx
        .attrs
        .shape(tensor)
        .filter(|s| !s.is_empty())
        .map(<[usize]>::to_vec)
        .ok_or(ArrowError::MissingAttribute {
            op: PrimOp::Gather,
            port: tensor,
            attribute: "shape",
        })?;
    let idx = ctx
        .attrs
        .value(indices)
        .and_then(Literal::as_indices)
        .ok_or(ArrowError::MissingAttribute {
            op: PrimOp::Gather,
            port: indices,
            attribute: "value",
        })?;
    let rest = complement(&idx, shape[0]);

    let g = &mut *ctx.graph;
    let rest_src = g.add_source(Literal::vector(rest.iter().map(|&i| i as f64).collect()));
    let shape_src = g.add_source(Literal::vector(shape.iter().map(|&d| d as f64).collect()));
    let shapes = g.add_primitive(Prim::Dupl { n: 2 });
    let given = g.add_primitive(Prim::Scatter);
    let filled = g.add_primitive(Prim::Scatter);
    let sum = g.add_primitive(Prim::Add);
    let c = g.compose(
        "InvGather",
        &[
            (port(g, shape_src, 0)?, port(g, shapes, 0)?),
            (port(g, shapes, 1)?, port(g, given, 1)?),
            (port(g, shapes, 2)?, port(g, filled, 1)?),
            (port(g, rest_src, 0)?, port(g, filled, 0)?),
            (port(g, given, 3)?, port(g, sum, 0)?),
            (port(g, filled, 3)?, port(g, sum, 1)?),
        ],
        &[port(g, given, 2)?, port(g, filled, 2)?, port(g, given, 0)?],
        &[port(g, sum, 2)?],
    )?;
    g.mark_param(port(g, c, 1)?)?;
    Ok(Inversion {
        arrow: c,
        remap: PortRemap::from_pairs(&[(0, 3), (1, 2), (2, 0)]),
    })
}
