// prim.rs — Closed catalogue of primitive arrow kinds
//
// `Prim` carries the per-instance data of a primitive (duplication width,
// clamp interval); `PrimOp` is the fieldless tag used as the key of the
// inversion registry and in diagnostics.
//
// Port layout of every primitive: in-ports occupy indices 0..n_in, out-ports
// follow at n_in..n_in + n_out.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Prim {
    Add,
    Sub,
    Mul,
    Div,
    /// `x ^ y`
    Pow,
    /// `log(value) / log(base)` with ports (base, value) → out.
    LogBase,
    Neg,
    Abs,
    Sin,
    Cos,
    Exp,
    Asin,
    Acos,
    Log,
    Identity,
    /// `x → (x, …, x)` with `n` copies.
    Dupl { n: usize },
    /// `(x1, …, xn) → x1`, assuming all copies agree.
    InvDupl { n: usize },
    /// `(x1, …, xn) → (mean, …, mean, error)` where error is the mean
    /// absolute deviation of the copies from their mean.
    ApproxIdentity { n: usize },
    /// `x → (clamp(x, lo, hi), |x - clamp(x, lo, hi)|)`
    IntervalBoundIdentity { lo: f64, hi: f64 },
    /// `(tensor, indices) → tensor[indices]` along axis 0.
    Gather,
    /// `(indices, dense_shape, values) → dense` with zeros off `indices`.
    Scatter,
}

/// Fieldless primitive tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    LogBase,
    Neg,
    Abs,
    Sin,
    Cos,
    Exp,
    Asin,
    Acos,
    Log,
    Identity,
    Dupl,
    InvDupl,
    ApproxIdentity,
    IntervalBoundIdentity,
    Gather,
    Scatter,
}

/// All primitive tags in declaration order.
pub const ALL_OPS: [PrimOp; 21] = [
    PrimOp::Add,
    PrimOp::Sub,
    PrimOp::Mul,
    PrimOp::Div,
    PrimOp::Pow,
    PrimOp::LogBase,
    PrimOp::Neg,
    PrimOp::Abs,
    PrimOp::Sin,
    PrimOp::Cos,
    PrimOp::Exp,
    PrimOp::Asin,
    PrimOp::Acos,
    PrimOp::Log,
    PrimOp::Identity,
    PrimOp::Dupl,
    PrimOp::InvDupl,
    PrimOp::ApproxIdentity,
    PrimOp::IntervalBoundIdentity,
    PrimOp::Gather,
    PrimOp::Scatter,
];

impl fmt::Display for PrimOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Prim {
    pub fn op(&self) -> PrimOp {
        match self {
            Prim::Add => PrimOp::Add,
            Prim::Sub => PrimOp::Sub,
            Prim::Mul => PrimOp::Mul,
            Prim::Div => PrimOp::Div,
            Prim::Pow => PrimOp::Pow,
            Prim::LogBase => PrimOp::LogBase,
            Prim::Neg => PrimOp::Neg,
            Prim::Abs => PrimOp::Abs,
            Prim::Sin => PrimOp::Sin,
            Prim::Cos => PrimOp::Cos,
            Prim::Exp => PrimOp::Exp,
            Prim::Asin => PrimOp::Asin,
            Prim::Acos => PrimOp::Acos,
            Prim::Log => PrimOp::Log,
            Prim::Identity => PrimOp::Identity,
            Prim::Dupl { .. } => PrimOp::Dupl,
            Prim::InvDupl { .. } => PrimOp::InvDupl,
            Prim::ApproxIdentity { .. } => PrimOp::ApproxIdentity,
            Prim::IntervalBoundIdentity { .. } => PrimOp::IntervalBoundIdentity,
            Prim::Gather => PrimOp::Gather,
            Prim::Scatter => PrimOp::Scatter,
        }
    }

    /// `(n_in, n_out)`.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Prim::Add | Prim::Sub | Prim::Mul | Prim::Div | Prim::Pow | Prim::LogBase => (2, 1),
            Prim::Neg
            | Prim::Abs
            | Prim::Sin
            | Prim::Cos
            | Prim::Exp
            | Prim::Asin
            | Prim::Acos
            | Prim::Log
            | Prim::Identity => (1, 1),
            Prim::Dupl { n } => (1, *n),
            Prim::InvDupl { n } => (*n, 1),
            Prim::ApproxIdentity { n } => (*n, *n + 1),
            Prim::IntervalBoundIdentity { .. } => (1, 2),
            Prim::Gather => (2, 1),
            Prim::Scatter => (3, 1),
        }
    }

    pub fn n_in(&self) -> usize {
        self.arity().0
    }

    pub fn n_out(&self) -> usize {
        self.arity().1
    }

    /// Every port carries one shape: arithmetic, copies and clamps.
    /// `ApproxIdentity` (scalar error port) and the indexing primitives
    /// have their own shape rules.
    pub fn is_elementwise(&self) -> bool {
        !matches!(
            self,
            Prim::ApproxIdentity { .. } | Prim::Gather | Prim::Scatter
        )
    }

    /// Primitives through which a known literal value passes unchanged.
    pub fn forwards_value(&self) -> bool {
        matches!(
            self,
            Prim::Dupl { .. } | Prim::InvDupl { .. } | Prim::Identity
        )
    }

    /// Short display name, e.g. `Dupl(3)` or `IBI[-0.999, 0.999]`.
    pub fn name(&self) -> String {
        match self {
            Prim::Dupl { n } => format!("Dupl({n})"),
            Prim::InvDupl { n } => format!("InvDupl({n})"),
            Prim::ApproxIdentity { n } => format!("ApproxIdentity({n})"),
            Prim::IntervalBoundIdentity { lo, hi } => format!("IBI[{lo}, {hi}]"),
            other => other.op().to_string(),
        }
    }
}

impl fmt::Display for Prim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_tags_cover_catalogue() {
        let samples = [
            Prim::Add,
            Prim::Dupl { n: 3 },
            Prim::IntervalBoundIdentity { lo: 0.0, hi: 1.0 },
            Prim::Scatter,
        ];
        for p in &samples {
            assert!(ALL_OPS.contains(&p.op()));
        }
    }

    #[test]
    fn elementwise_classification() {
        assert!(Prim::Add.is_elementwise());
        assert!(Prim::Dupl { n: 2 }.is_elementwise());
        assert!(Prim::IntervalBoundIdentity { lo: 0.0, hi: 1.0 }.is_elementwise());
        assert!(!Prim::ApproxIdentity { n: 2 }.is_elementwise());
        assert!(!Prim::Gather.is_elementwise());
        assert!(!Prim::Scatter.is_elementwise());
    }

    #[test]
    fn arity_of_control_flow() {
        assert_eq!(Prim::Dupl { n: 3 }.arity(), (1, 3));
        assert_eq!(Prim::InvDupl { n: 3 }.arity(), (3, 1));
        assert_eq!(Prim::ApproxIdentity { n: 2 }.arity(), (2, 3));
        assert_eq!(Prim::IntervalBoundIdentity { lo: -1.0, hi: 1.0 }.arity(), (1, 2));
    }

    #[test]
    fn serde_uses_op_tag() {
        let json = serde_json::to_string(&Prim::Dupl { n: 2 }).unwrap();
        assert_eq!(json, r#"{"op":"Dupl","n":2}"#);
        let back: Prim = serde_json::from_str(r#"{"op":"Sin"}"#).unwrap();
        assert_eq!(back, Prim::Sin);
    }

    #[test]
    fn names() {
        assert_eq!(Prim::Add.name(), "Add");
        assert_eq!(Prim::Dupl { n: 2 }.name(), "Dupl(2)");
        assert_eq!(
            Prim::IntervalBoundIdentity { lo: -0.5, hi: 0.5 }.name(),
            "IBI[-0.5, 0.5]"
        );
    }
}
