// registry.rs — Inversion rule registry
//
// Maps each primitive kind to a rule that builds a local inverse sub-graph
// and states how the forward arrow's port indices map onto it. The registry
// is an ordinary value built once and passed by reference; it also carries
// the numeric options (clamp intervals) rules consult.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attr::PortAttributes;
use crate::error::ArrowError;
use crate::graph::{ArrowGraph, ArrowKind};
use crate::id::ArrowId;
use crate::prim::PrimOp;
use crate::rules;

// ── Options ─────────────────────────────────────────────────────────────────

/// Tunables for approximate inversions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertOptions {
    /// Sine and cosine inputs are clamped to `[-trig_bound, trig_bound]`
    /// before arcsine / arccosine.
    pub trig_bound: f64,
    /// Exponential outputs are clamped to this interval before the logarithm.
    pub exp_bounds: (f64, f64),
}

impl Default for InvertOptions {
    fn default() -> Self {
        InvertOptions {
            trig_bound: 0.999,
            exp_bounds: (1e-6, 1e6),
        }
    }
}

// ── Remaps ──────────────────────────────────────────────────────────────────

/// Correspondence between forward port indices and inverse port indices.
///
/// Inverse ports absent from the map (fresh `Param` / `Error` ports) have no
/// forward counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortRemap {
    fwd_to_inv: BTreeMap<usize, usize>,
}

impl PortRemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(n: usize) -> Self {
        PortRemap {
            fwd_to_inv: (0..n).map(|i| (i, i)).collect(),
        }
    }

    /// Build from `(forward, inverse)` pairs.
    pub fn from_pairs(pairs: &[(usize, usize)]) -> Self {
        PortRemap {
            fwd_to_inv: pairs.iter().copied().collect(),
        }
    }

    pub fn insert(&mut self, forward: usize, inverse: usize) {
        self.fwd_to_inv.insert(forward, inverse);
    }

    pub fn inverse_index(&self, forward: usize) -> Option<usize> {
        self.fwd_to_inv.get(&forward).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.fwd_to_inv.iter().map(|(&f, &i)| (f, i))
    }

    pub fn len(&self) -> usize {
        self.fwd_to_inv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fwd_to_inv.is_empty()
    }
}

/// A local inverse: the replacement arrow plus its port remap.
#[derive(Debug, Clone, PartialEq)]
pub struct Inversion {
    pub arrow: ArrowId,
    pub remap: PortRemap,
}

// ── Rules ───────────────────────────────────────────────────────────────────

/// Everything a rule may consult or extend.
pub struct RuleCtx<'a> {
    pub graph: &'a mut ArrowGraph,
    pub attrs: &'a PortAttributes,
    pub options: &'a InvertOptions,
}

pub type InvertRule = fn(&mut RuleCtx<'_>, ArrowId) -> Result<Inversion, ArrowError>;

#[derive(Debug, Clone)]
pub struct Registry {
    rules: HashMap<PrimOp, InvertRule>,
    options: InvertOptions,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults(InvertOptions::default())
    }
}

impl Registry {
    /// An empty registry: every primitive lacks a rule.
    pub fn new(options: InvertOptions) -> Self {
        Registry {
            rules: HashMap::new(),
            options,
        }
    }

    /// The standard rule set.
    pub fn with_defaults(options: InvertOptions) -> Self {
        let mut registry = Self::new(options);
        rules::register_defaults(&mut registry);
        registry
    }

    /// Register (or replace) the rule for `op`, returning the previous one.
    pub fn register(&mut self, op: PrimOp, rule: InvertRule) -> Option<InvertRule> {
        self.rules.insert(op, rule)
    }

    pub fn lookup(&self, op: PrimOp) -> Option<InvertRule> {
        self.rules.get(&op).copied()
    }

    /// Registered primitive kinds, in declaration order.
    pub fn ops(&self) -> Vec<PrimOp> {
        let mut ops: Vec<PrimOp> = self.rules.keys().copied().collect();
        ops.sort();
        ops
    }

    pub fn options(&self) -> &InvertOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Invert a primitive or source arrow.
    ///
    /// Sources and primitives whose inputs are all CONSTANT are copied with
    /// the identity remap; anything else goes through the registered rule.
    pub fn invert_leaf(
        &self,
        graph: &mut ArrowGraph,
        attrs: &PortAttributes,
        arrow: ArrowId,
    ) -> Result<Inversion, ArrowError> {
        let op = match &graph.arrow(arrow)?.kind {
            ArrowKind::Primitive(p) => p.op(),
            ArrowKind::Composite(_) => return Err(ArrowError::NotLeaf(arrow)),
            ArrowKind::Source(_) => return rules::copy(graph, arrow),
        };
        let ins = graph.in_ports(arrow)?;
        if !ins.is_empty() && ins.iter().all(|&p| attrs.is_constant(p)) {
            debug!(%arrow, %op, "constant inputs, copying");
            return rules::copy(graph, arrow);
        }
        let rule = self.lookup(op).ok_or(ArrowError::NoInverseRule(op))?;
        let mut ctx = RuleCtx {
            graph,
            attrs,
            options: &self.options,
        };
        let inv = rule(&mut ctx, arrow)?;
        debug!(%arrow, %op, inverse = %inv.arrow, remapped = inv.remap.len(), "rule applied");
        Ok(inv)
    }
}
