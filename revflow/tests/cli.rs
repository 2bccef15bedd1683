// Binary tests: drive the `revflow` executable on the documents in
// tests/data and check its output and exit codes.

use std::path::PathBuf;
use std::process::{Command, Output};

fn revflow_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_revflow"))
}

fn data(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn run(args: &[&str]) -> Output {
    Command::new(revflow_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run revflow")
}

fn stdout_of(args: &[&str]) -> String {
    let out = run(args);
    assert!(
        out.status.success(),
        "revflow failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).expect("non-UTF8 output")
}

#[test]
fn summary_lists_boundary_and_remap() {
    let out = stdout_of(&[&data("xy_plus_x.json")]);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        vec![
            "composite 'inv_xy_plus_x': in=1 param=2 out=2 error=1, 3 children, 9 edges",
            "  forward 0 -> inverse 3 (out)",
            "  forward 1 -> inverse 4 (out)",
            "  forward 2 -> inverse 0 (in)",
        ]
    );
}

#[test]
fn json_output_is_a_valid_document() {
    let out = stdout_of(&[&data("add_five.json"), "--emit", "json"]);
    let doc = revflow::document::GraphDoc::from_json(&out).unwrap();
    let mut g = revflow::ArrowGraph::new();
    let inv = revflow::document::import(&doc, &mut g).unwrap();
    let x = revflow::interpret::evaluate(&g, inv, &[revflow::Literal::scalar(8.0)]).unwrap();
    assert_eq!(x, vec![revflow::Literal::scalar(3.0)]);
}

#[test]
fn dot_output() {
    let out = stdout_of(&[&data("xy_plus_x.json"), "--emit", "dot"]);
    assert!(out.starts_with("digraph revflow {"));
    assert!(out.contains("label=\"inv_xy_plus_x\""));
    assert!(out.contains("color=red"));
}

#[test]
fn known_ports_from_seeds() {
    let out = stdout_of(&[&data("add_five.json"), "--emit", "known", "--known", "0"]);
    assert!(out.starts_with("known: "));
    assert!(out.contains("\tout\tadd_five a0[1]\n"), "got:\n{out}");

    let none = stdout_of(&[&data("add_five.json"), "--emit", "known"]);
    assert!(!none.contains("\tout\tadd_five a0[1]\n"));
}

#[test]
fn constant_flag_removes_a_parameter() {
    let out = stdout_of(&[&data("xy_plus_x.json"), "--constant", "1"]);
    assert!(out.starts_with("composite 'inv_xy_plus_x': in=2 param=1 out=1 error=1"), "got:\n{out}");
}

#[test]
fn missing_rule_exits_1() {
    let out = run(&[&data("scatter.json")]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("revflow: error[E0301]"), "stderr: {stderr}");
}

#[test]
fn bad_documents_exit_2() {
    let out = run(&[&data("double_driven.json")]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("error[E0106]"));

    let out = run(&[&data("does_not_exist.json")]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("revflow: error: "));
}

#[test]
fn seed_indices_must_name_in_ports() {
    // Port 2 of xy_plus_x is its output.
    let out = run(&[&data("xy_plus_x.json"), "--constant", "2"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("error[E0502]"), "stderr: {stderr}");
    assert!(stderr.contains("no input port at index 2"), "stderr: {stderr}");
    assert!(out.stdout.is_empty());

    let out = run(&[&data("add_five.json"), "--emit", "known", "--known", "9"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("error[E0502]"));
}

#[test]
fn verbose_logs_to_stderr_only() {
    let quiet = stdout_of(&[&data("xy_plus_x.json")]);
    let out = run(&[&data("xy_plus_x.json"), "--verbose"]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), quiet);
    assert!(String::from_utf8_lossy(&out.stderr).contains("rule applied"));
}
