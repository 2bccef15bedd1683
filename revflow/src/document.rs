// document.rs — Serialized arrow trees
//
// `GraphDoc` is the interchange form handed to and read from external tools
// (code-generation backends, the command-line driver). A document is a tree:
// each composite lists its boundary port kinds, its children in wiring order
// and its edges, with endpoints addressed as (child index or boundary, port
// index).
//
// Preconditions: none for export beyond a valid arrow id.
// Postconditions: `import(export(a))` rebuilds a tree isomorphic to `a`;
//                 the fingerprint depends only on document content.
// Failure modes: malformed documents (bad version, out-of-range child or
//                port, inconsistent literal) yield `ArrowError::Document`;
//                wiring violations in the document yield the usual
//                structural errors.
// Side effects: import grows the arena.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ArrowError;
use crate::graph::{ArrowGraph, ArrowKind, PortKind};
use crate::id::{ArrowId, PortId};
use crate::literal::Literal;
use crate::prim::Prim;

pub const DOC_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDoc {
    pub version: u32,
    pub root: NodeDoc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDoc {
    Primitive {
        prim: Prim,
    },
    Source {
        value: Literal,
    },
    Composite {
        name: String,
        ports: Vec<PortKind>,
        children: Vec<NodeDoc>,
        edges: Vec<EdgeDoc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub from: PortRef,
    pub to: PortRef,
}

/// A port addressed relative to the enclosing composite. `child: None`
/// refers to the composite's own boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<usize>,
    pub port: usize,
}

impl GraphDoc {
    pub fn from_json(text: &str) -> Result<Self, ArrowError> {
        serde_json::from_str(text).map_err(|e| ArrowError::Document(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ArrowError> {
        serde_json::to_string_pretty(self).map_err(|e| ArrowError::Document(e.to_string()))
    }

    /// Compact JSON: the canonical form hashed by `fingerprint`.
    pub fn canonical_json(&self) -> Result<String, ArrowError> {
        serde_json::to_string(self).map_err(|e| ArrowError::Document(e.to_string()))
    }

    /// SHA-256 of the canonical JSON, as 64 lowercase hex characters.
    pub fn fingerprint(&self) -> Result<String, ArrowError> {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json()?.as_bytes());
        Ok(hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect())
    }
}

// ── Export ──────────────────────────────────────────────────────────────────

pub fn export(graph: &ArrowGraph, arrow: ArrowId) -> Result<GraphDoc, ArrowError> {
    Ok(GraphDoc {
        version: DOC_VERSION,
        root: export_node(graph, arrow)?,
    })
}

fn export_node(graph: &ArrowGraph, arrow: ArrowId) -> Result<NodeDoc, ArrowError> {
    let a = graph.arrow(arrow)?;
    let c = match &a.kind {
        ArrowKind::Primitive(prim) => return Ok(NodeDoc::Primitive { prim: prim.clone() }),
        ArrowKind::Source(value) => return Ok(NodeDoc::Source { value: value.clone() }),
        ArrowKind::Composite(c) => c,
    };
    let ports = a
        .ports()
        .iter()
        .map(|&p| Ok(graph.port(p)?.kind))
        .collect::<Result<Vec<_>, ArrowError>>()?;
    let position: HashMap<ArrowId, usize> = c
        .children()
        .iter()
        .enumerate()
        .map(|(i, &child)| (child, i))
        .collect();
    let port_ref = |port: PortId| -> Result<PortRef, ArrowError> {
        let p = graph.port(port)?;
        let child = if p.arrow == arrow {
            None
        } else {
            Some(
                *position
                    .get(&p.arrow)
                    .ok_or(ArrowError::UnknownArrow(p.arrow))?,
            )
        };
        Ok(PortRef {
            child,
            port: p.index,
        })
    };
    let edges = c
        .edges()
        .iter()
        .map(|(l, r)| {
            Ok(EdgeDoc {
                from: port_ref(l)?,
                to: port_ref(r)?,
            })
        })
        .collect::<Result<Vec<_>, ArrowError>>()?;
    let children = c
        .children()
        .iter()
        .map(|&child| export_node(graph, child))
        .collect::<Result<Vec<_>, ArrowError>>()?;
    Ok(NodeDoc::Composite {
        name: a.name.clone(),
        ports,
        children,
        edges,
    })
}

/// Fingerprint of the exported form of `arrow`.
pub fn fingerprint(graph: &ArrowGraph, arrow: ArrowId) -> Result<String, ArrowError> {
    export(graph, arrow)?.fingerprint()
}

// ── Import ──────────────────────────────────────────────────────────────────

/// Rebuild the document's tree in `graph` and return the new root.
pub fn import(doc: &GraphDoc, graph: &mut ArrowGraph) -> Result<ArrowId, ArrowError> {
    if doc.version != DOC_VERSION {
        return Err(ArrowError::Document(format!(
            "unsupported document version {} (expected {DOC_VERSION})",
            doc.version
        )));
    }
    let root = import_node(&doc.root, graph)?;
    if graph.arrow(root)?.is_composite() {
        graph.validate_tree(root)?;
    }
    Ok(root)
}

fn import_node(node: &NodeDoc, graph: &mut ArrowGraph) -> Result<ArrowId, ArrowError> {
    match node {
        NodeDoc::Primitive { prim } => Ok(graph.add_primitive(prim.clone())),
        NodeDoc::Source { value } => {
            let checked = Literal::tensor(value.shape().to_vec(), value.data().to_vec())
                .ok_or_else(|| {
                    ArrowError::Document(format!(
                        "literal of shape {:?} has {} elements",
                        value.shape(),
                        value.data().len()
                    ))
                })?;
            Ok(graph.add_source(checked))
        }
        NodeDoc::Composite {
            name,
            ports,
            children,
            edges,
        } => {
            let composite = graph.add_composite(name.clone());
            for &kind in ports {
                graph.add_boundary_port(composite, kind)?;
            }
            let mut ids = Vec::with_capacity(children.len());
            for child in children {
                let id = import_node(child, graph)?;
                graph.add_child(composite, id)?;
                ids.push(id);
            }
            for edge in edges {
                let from = resolve(graph, composite, &ids, edge.from)?;
                let to = resolve(graph, composite, &ids, edge.to)?;
                graph.add_edge(composite, from, to)?;
            }
            Ok(composite)
        }
    }
}

fn resolve(
    graph: &ArrowGraph,
    composite: ArrowId,
    children: &[ArrowId],
    r: PortRef,
) -> Result<PortId, ArrowError> {
    let owner = match r.child {
        None => composite,
        Some(i) => *children.get(i).ok_or_else(|| {
            ArrowError::Document(format!(
                "edge refers to child {i} but '{}' has {} children",
                graph.arrow(composite).map(|a| a.name.as_str()).unwrap_or("?"),
                children.len()
            ))
        })?,
    };
    let ports = graph.ports(owner)?;
    ports.get(r.port).copied().ok_or_else(|| {
        ArrowError::Document(format!(
            "edge refers to port {} of {owner}, which has {} ports",
            r.port,
            ports.len()
        ))
    })
}
