use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use revflow::attr::{Constness, PortAttributes};
use revflow::document::{self, GraphDoc};
use revflow::{ArrowError, ArrowGraph, ArrowId, InvertOptions, PortId, Registry};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Emit {
    /// Boundary summary of the inverse and its port remap
    Summary,
    /// The inverse as a graph document
    Json,
    /// The inverse as Graphviz DOT
    Dot,
    /// Ports of the forward graph that become known from `--known`
    Known,
}

#[derive(Parser, Debug)]
#[command(
    name = "revflow",
    version,
    about = "Inverts port-graph arrows into parametric, approximate inverses"
)]
struct Cli {
    /// Forward graph document (.json)
    graph: PathBuf,

    /// Output artifact
    #[arg(long, value_enum, default_value_t = Emit::Summary)]
    emit: Emit,

    /// Forward boundary in-port index treated as known (repeatable, `known` only)
    #[arg(long = "known")]
    known: Vec<usize>,

    /// Forward boundary in-port index treated as constant (repeatable)
    #[arg(long = "constant")]
    constant: Vec<usize>,

    /// Clamp bound for arcsine / arccosine inputs
    #[arg(long)]
    trig_bound: Option<f64>,

    /// Lower clamp bound for logarithm inputs
    #[arg(long)]
    exp_lower: Option<f64>,

    /// Upper clamp bound for logarithm inputs
    #[arg(long)]
    exp_upper: Option<f64>,

    /// Log rule firings and recursion (RUST_LOG overrides)
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> InvertOptions {
        let mut options = InvertOptions::default();
        if let Some(b) = self.trig_bound {
            options.trig_bound = b;
        }
        if let Some(lo) = self.exp_lower {
            options.exp_bounds.0 = lo;
        }
        if let Some(hi) = self.exp_upper {
            options.exp_bounds.1 = hi;
        }
        options
    }
}

fn main() {
    let cli = Cli::parse();

    let default = if cli.verbose { "revflow=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // ── Load forward graph ──
    let text = match std::fs::read_to_string(&cli.graph) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("revflow: error: {}: {}", cli.graph.display(), e);
            process::exit(2);
        }
    };
    let mut graph = ArrowGraph::new();
    let forward = match GraphDoc::from_json(&text).and_then(|doc| document::import(&doc, &mut graph)) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("revflow: error[{}]: {}: {}", e.code(), cli.graph.display(), e);
            process::exit(2);
        }
    };

    let seeds = boundary_in_ports(&graph, forward, &cli.known).and_then(|known| {
        Ok((known, boundary_in_ports(&graph, forward, &cli.constant)?))
    });
    let (known, constant) = match seeds {
        Ok(s) => s,
        Err(e) => {
            eprintln!("revflow: error[{}]: {}: {}", e.code(), cli.graph.display(), e);
            process::exit(2);
        }
    };

    let result = match cli.emit {
        Emit::Known => emit_known(&graph, forward, &known),
        emit => emit_inverse(&mut graph, forward, cli.options(), &constant, emit),
    };
    match result {
        Ok(out) => print!("{out}"),
        Err(e) => {
            eprintln!("revflow: error[{}]: {}", e.code(), e);
            process::exit(1);
        }
    }
}

/// Resolve boundary port indices given on the command line; each must name
/// an input-direction port of `arrow`.
fn boundary_in_ports(
    graph: &ArrowGraph,
    arrow: ArrowId,
    indices: &[usize],
) -> Result<BTreeSet<PortId>, ArrowError> {
    let ports = graph.ports(arrow)?;
    indices
        .iter()
        .map(|&index| {
            ports
                .get(index)
                .copied()
                .filter(|&p| graph.port(p).is_ok_and(|p| p.kind.is_input()))
                .ok_or_else(|| ArrowError::NotAnInput {
                    name: graph.arrow(arrow).map(|a| a.name.clone()).unwrap_or_default(),
                    index,
                })
        })
        .collect()
}

fn emit_known(
    graph: &ArrowGraph,
    forward: ArrowId,
    seeds: &BTreeSet<PortId>,
) -> Result<String, ArrowError> {
    let marking = revflow::marking::mark_source(graph, forward, seeds)?;
    let mut out = format!("known: {} in, {} out\n", marking.ins.len(), marking.outs.len());
    for &port in marking.ins.iter().chain(&marking.outs) {
        let p = graph.port(port)?;
        let owner = graph.arrow(p.arrow)?;
        out.push_str(&format!("{port}\t{}\t{} {}[{}]\n", p.kind, owner.name, p.arrow, p.index));
    }
    Ok(out)
}

fn emit_inverse(
    graph: &mut ArrowGraph,
    forward: ArrowId,
    options: InvertOptions,
    constant: &BTreeSet<PortId>,
    emit: Emit,
) -> Result<String, ArrowError> {
    let registry = Registry::with_defaults(options);
    let mut seed = PortAttributes::new();
    for &port in constant {
        seed.set_constness(port, Constness::Constant)?;
    }
    let inv = revflow::invert_seeded(graph, &registry, forward, seed)?;
    match emit {
        Emit::Json => {
            let mut json = document::export(graph, inv.arrow)?.to_json()?;
            json.push('\n');
            Ok(json)
        }
        Emit::Dot => revflow::dot::emit_dot(graph, inv.arrow),
        Emit::Summary | Emit::Known => {
            let mut out = graph.summary(inv.arrow)?;
            out.push('\n');
            for (fwd, idx) in inv.remap.iter() {
                let kind = graph.port(graph.port_at(inv.arrow, idx)?)?.kind;
                out.push_str(&format!("  forward {fwd} -> inverse {idx} ({kind})\n"));
            }
            Ok(out)
        }
    }
}
