// attr.rs — Port attribute store
//
// Facts about ports (constant-ness, shape, known value, labels) are kept
// outside the graph, keyed by `PortId`. Facts only ever grow: setting a fact
// that is already present succeeds when it agrees and fails with
// `ConflictingFact` when it does not. Labels are a set that only grows and
// never conflicts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ArrowError;
use crate::id::PortId;
use crate::literal::{Literal, Shape};

/// Whether a port's value is fixed at graph-construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constness {
    Constant,
    Variable,
}

impl Constness {
    /// AND-join: constant only if both sides are constant.
    pub fn join(self, other: Constness) -> Constness {
        match (self, other) {
            (Constness::Constant, Constness::Constant) => Constness::Constant,
            _ => Constness::Variable,
        }
    }
}

impl fmt::Display for Constness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constness::Constant => f.write_str("CONSTANT"),
            Constness::Variable => f.write_str("VARIABLE"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortFacts {
    pub constant: Option<Constness>,
    pub shape: Option<Shape>,
    pub value: Option<Literal>,
    /// Free-form tags attached by the caller. They stay on their port.
    pub labels: BTreeSet<String>,
}

impl PortFacts {
    pub fn constant(c: Constness) -> Self {
        PortFacts {
            constant: Some(c),
            ..Default::default()
        }
    }

    pub fn shape(shape: Shape) -> Self {
        PortFacts {
            shape: Some(shape),
            ..Default::default()
        }
    }

    /// Facts implied by a known literal: its value and its shape.
    pub fn value(value: Literal) -> Self {
        PortFacts {
            shape: Some(value.shape().to_vec()),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn with_constant(mut self, c: Constness) -> Self {
        self.constant = Some(c);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constant.is_none()
            && self.shape.is_none()
            && self.value.is_none()
            && self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortAttributes {
    facts: BTreeMap<PortId, PortFacts>,
}

impl PortAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, port: PortId) -> Option<&PortFacts> {
        self.facts.get(&port)
    }

    pub fn constness(&self, port: PortId) -> Option<Constness> {
        self.facts.get(&port).and_then(|f| f.constant)
    }

    pub fn is_constant(&self, port: PortId) -> bool {
        self.constness(port) == Some(Constness::Constant)
    }

    pub fn shape(&self, port: PortId) -> Option<&[usize]> {
        self.facts.get(&port).and_then(|f| f.shape.as_deref())
    }

    pub fn value(&self, port: PortId) -> Option<&Literal> {
        self.facts.get(&port).and_then(|f| f.value.as_ref())
    }

    pub fn labels(&self, port: PortId) -> impl Iterator<Item = &str> {
        self.facts
            .get(&port)
            .into_iter()
            .flat_map(|f| f.labels.iter().map(String::as_str))
    }

    pub fn has_label(&self, port: PortId, label: &str) -> bool {
        self.facts.get(&port).is_some_and(|f| f.labels.contains(label))
    }

    /// Tag `port`. Returns whether the label is new.
    pub fn add_label(&mut self, port: PortId, label: impl Into<String>) -> bool {
        self.facts.entry(port).or_default().labels.insert(label.into())
    }

    pub fn set_constness(&mut self, port: PortId, c: Constness) -> Result<bool, ArrowError> {
        self.merge(port, &PortFacts::constant(c))
    }

    pub fn set_shape(&mut self, port: PortId, shape: Shape) -> Result<bool, ArrowError> {
        self.merge(port, &PortFacts::shape(shape))
    }

    /// Record a known value; its shape is recorded alongside.
    pub fn set_value(&mut self, port: PortId, value: Literal) -> Result<bool, ArrowError> {
        self.merge(port, &PortFacts::value(value))
    }

    /// Merge `incoming` into the facts of `port`. Returns whether anything
    /// new was learned.
    pub fn merge(&mut self, port: PortId, incoming: &PortFacts) -> Result<bool, ArrowError> {
        let entry = self.facts.entry(port).or_default();
        let mut changed = false;

        if let Some(c) = incoming.constant {
            match entry.constant {
                None => {
                    entry.constant = Some(c);
                    changed = true;
                }
                Some(existing) if existing != c => {
                    return Err(conflict(port, "constness", &existing, &c));
                }
                Some(_) => {}
            }
        }
        if let Some(shape) = &incoming.shape {
            match &entry.shape {
                None => {
                    entry.shape = Some(shape.clone());
                    changed = true;
                }
                Some(existing) if existing != shape => {
                    return Err(conflict(port, "shape", &format!("{existing:?}"), &format!("{shape:?}")));
                }
                Some(_) => {}
            }
        }
        if let Some(value) = &incoming.value {
            match &entry.value {
                None => {
                    entry.value = Some(value.clone());
                    changed = true;
                }
                Some(existing) if existing != value => {
                    return Err(conflict(port, "value", existing, value));
                }
                Some(_) => {}
            }
        }
        for label in &incoming.labels {
            changed |= entry.labels.insert(label.clone());
        }
        if changed {
            trace!(%port, facts = ?entry, "fact merged");
        }
        Ok(changed)
    }

    /// Copy the value facts of `from` onto `to`; labels are not carried.
    /// Returns whether `to` changed.
    pub fn flow(&mut self, from: PortId, to: PortId) -> Result<bool, ArrowError> {
        let Some(src) = self.facts.get(&from) else {
            return Ok(false);
        };
        let carried = PortFacts {
            constant: src.constant,
            shape: src.shape.clone(),
            value: src.value.clone(),
            labels: BTreeSet::new(),
        };
        if carried.is_empty() {
            return Ok(false);
        }
        self.merge(to, &carried)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PortId, &PortFacts)> {
        self.facts.iter().map(|(&p, f)| (p, f))
    }
}

fn conflict(
    port: PortId,
    fact: &'static str,
    existing: &impl fmt::Display,
    derived: &impl fmt::Display,
) -> ArrowError {
    ArrowError::ConflictingFact {
        port,
        fact,
        existing: existing.to_string(),
        derived: derived.to_string(),
    }
}
