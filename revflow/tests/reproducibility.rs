// Reproducibility tests.
//
// Inversion must be deterministic: the same forward document yields a
// byte-identical inverse document, and graph fingerprints depend only on
// content, not on arena ids or on how many times a graph was rebuilt.

use std::path::PathBuf;
use std::process::Command;

use revflow::document::{self, GraphDoc};
use revflow::{invert, ArrowGraph, Registry};

fn revflow_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_revflow"))
}

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn run_revflow(args: &[&str]) -> String {
    let output = Command::new(revflow_binary())
        .args(args)
        .output()
        .expect("failed to run revflow");
    assert!(
        output.status.success(),
        "revflow failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

/// Inverting the same document twice produces byte-identical JSON.
#[test]
fn same_document_identical_inverse_json() {
    let path = data("xy_plus_x.json");
    let path = path.to_str().unwrap();
    let first = run_revflow(&[path, "--emit", "json"]);
    let second = run_revflow(&[path, "--emit", "json"]);
    assert_eq!(first, second, "inverse JSON should be byte-identical across runs");
}

/// Same for DOT output.
#[test]
fn same_document_identical_dot() {
    let path = data("xy_plus_x.json");
    let path = path.to_str().unwrap();
    assert_eq!(
        run_revflow(&[path, "--emit", "dot"]),
        run_revflow(&[path, "--emit", "dot"])
    );
}

/// Fingerprints ignore arena ids: importing into a busier arena does not
/// change them.
#[test]
fn fingerprint_independent_of_arena_state() {
    let text = std::fs::read_to_string(data("xy_plus_x.json")).unwrap();
    let doc = GraphDoc::from_json(&text).unwrap();

    let mut fresh = ArrowGraph::new();
    let a = document::import(&doc, &mut fresh).unwrap();

    let mut busy = ArrowGraph::new();
    for _ in 0..5 {
        document::import(&doc, &mut busy).unwrap();
    }
    let b = document::import(&doc, &mut busy).unwrap();

    assert_eq!(
        document::fingerprint(&fresh, a).unwrap(),
        document::fingerprint(&busy, b).unwrap()
    );
    assert_eq!(document::fingerprint(&fresh, a).unwrap(), doc.fingerprint().unwrap());
}

/// Inverses built in different arenas have the same fingerprint.
#[test]
fn inverse_fingerprint_is_stable() {
    let text = std::fs::read_to_string(data("xy_plus_x.json")).unwrap();
    let doc = GraphDoc::from_json(&text).unwrap();
    let registry = Registry::default();

    let fingerprints: Vec<String> = (0..3)
        .map(|warmup| {
            let mut g = ArrowGraph::new();
            for _ in 0..warmup {
                g.add_composite("padding");
            }
            let fwd = document::import(&doc, &mut g).unwrap();
            let inv = invert(&mut g, &registry, fwd).unwrap();
            document::fingerprint(&g, inv).unwrap()
        })
        .collect();
    assert_eq!(fingerprints[0], fingerprints[1]);
    assert_eq!(fingerprints[1], fingerprints[2]);
}
