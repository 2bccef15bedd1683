// dot.rs — Graphviz DOT output for arrow trees
//
// Renders an arrow for `dot` and friends: every composite becomes a cluster,
// primitives and sources become boxes, and composite boundary ports become
// small point nodes coloured by kind. Edges are drawn inside the cluster
// that owns them and labelled `from->to` with the port indices on the
// owning arrows.
//
// Preconditions: `arrow` is a valid id in `graph`.
// Postconditions: returns a DOT string; output is deterministic for a given
//                 arena (children and edges are emitted in stored order).
// Failure modes: unknown arrows or ports encountered while walking.
// Side effects: none.

use crate::error::ArrowError;
use crate::graph::{ArrowGraph, ArrowKind, PortKind};
use crate::id::{ArrowId, PortId};

/// Emit `arrow` as a Graphviz DOT string.
pub fn emit_dot(graph: &ArrowGraph, arrow: ArrowId) -> Result<String, ArrowError> {
    let mut buf = String::new();
    buf.push_str("digraph revflow {\n");
    buf.push_str("    rankdir=LR;\n");
    buf.push_str("    node [fontname=\"Helvetica\", fontsize=10];\n");
    buf.push_str("    edge [fontname=\"Helvetica\", fontsize=9];\n");
    write_arrow(graph, arrow, 1, &mut buf)?;
    buf.push_str("}\n");
    Ok(buf)
}

fn write_arrow(
    graph: &ArrowGraph,
    arrow: ArrowId,
    depth: usize,
    buf: &mut String,
) -> Result<(), ArrowError> {
    let pad = "    ".repeat(depth);
    let a = graph.arrow(arrow)?;
    let c = match &a.kind {
        ArrowKind::Primitive(_) => {
            buf.push_str(&format!("{pad}{arrow} [label=\"{}\", shape=box];\n", escape(&a.name)));
            return Ok(());
        }
        ArrowKind::Source(value) => {
            buf.push_str(&format!(
                "{pad}{arrow} [label=\"{}\", shape=box, style=filled, fillcolor=gray90];\n",
                escape(&value.to_string())
            ));
            return Ok(());
        }
        ArrowKind::Composite(c) => c,
    };

    buf.push('\n');
    buf.push_str(&format!("{pad}subgraph cluster_{arrow} {{\n"));
    buf.push_str(&format!("{pad}    label=\"{}\";\n", escape(&a.name)));
    buf.push_str(&format!("{pad}    style=rounded;\n"));
    buf.push_str(&format!("{pad}    color=gray50;\n"));
    for &port in a.ports() {
        let p = graph.port(port)?;
        buf.push_str(&format!(
            "{pad}    {port} [shape=point, width=0.12, color={}, xlabel=\"{} {}\"];\n",
            port_colour(p.kind),
            p.kind,
            p.index
        ));
    }
    for &child in c.children() {
        write_arrow(graph, child, depth + 1, buf)?;
    }
    for (l, r) in c.edges().iter() {
        let (from, li) = endpoint(graph, l)?;
        let (to, ri) = endpoint(graph, r)?;
        buf.push_str(&format!("{pad}    {from} -> {to} [label=\"{li}->{ri}\"];\n"));
    }
    buf.push_str(&format!("{pad}}}\n"));
    Ok(())
}

/// DOT node standing for `port`, and the port's index on its owner.
fn endpoint(graph: &ArrowGraph, port: PortId) -> Result<(String, usize), ArrowError> {
    let p = graph.port(port)?;
    let node = if graph.arrow(p.arrow)?.is_composite() {
        port.to_string()
    } else {
        p.arrow.to_string()
    };
    Ok((node, p.index))
}

fn port_colour(kind: PortKind) -> &'static str {
    match kind {
        PortKind::In | PortKind::Out => "black",
        PortKind::Param => "blue",
        PortKind::Error => "red",
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
