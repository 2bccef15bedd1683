// End-to-end inversion tests: build a forward graph, run it through the
// reference interpreter, invert it and check that the inverse recovers the
// inputs (exactly, up to a parameter, or up to a reported error).

use revflow::attr::PortAttributes;
use revflow::interpret::evaluate;
use revflow::{
    invert, invert_seeded, ArrowError, ArrowGraph, ArrowId, ExprBuilder, InvertOptions, Literal,
    PortKind, Registry,
};

fn scalar(v: f64) -> Literal {
    Literal::scalar(v)
}

fn scalars(out: &[Literal]) -> Vec<f64> {
    out.iter().map(|l| l.as_scalar().unwrap()).collect()
}

fn xy_plus_x(g: &mut ArrowGraph) -> ArrowId {
    let mut b = ExprBuilder::new(g, "xy_plus_x");
    let x = b.input().unwrap();
    let y = b.input().unwrap();
    let xy = b.mul(x, y).unwrap();
    let z = b.add(xy, x).unwrap();
    b.output(z).unwrap();
    b.finish()
}

#[test]
fn add_five_round_trip() {
    let mut g = ArrowGraph::new();
    let mut b = ExprBuilder::new(&mut g, "add_five");
    let x = b.input().unwrap();
    let five = b.constant(scalar(5.0)).unwrap();
    let z = b.add(x, five).unwrap();
    b.output(z).unwrap();
    let fwd = b.finish();

    let z = evaluate(&g, fwd, &[scalar(3.0)]).unwrap();
    assert_eq!(z, vec![scalar(8.0)]);
    let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
    assert!(!g.is_parametric(inv).unwrap());
    assert!(!g.is_approximate(inv).unwrap());
    assert_eq!(evaluate(&g, inv, &z).unwrap(), vec![scalar(3.0)]);
}

#[test]
fn xy_plus_x_consistent_parameters_have_no_error() {
    let mut g = ArrowGraph::new();
    let fwd = xy_plus_x(&mut g);
    let z = evaluate(&g, fwd, &[scalar(2.0), scalar(3.0)]).unwrap();
    assert_eq!(z, vec![scalar(8.0)]);

    let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
    // inputs: z, then the multiply's parameter (y), then the add's (x copy)
    let out = evaluate(&g, inv, &[scalar(8.0), scalar(3.0), scalar(2.0)]).unwrap();
    let [x, y, err] = scalars(&out)[..] else {
        panic!("expected three outputs, got {out:?}");
    };
    assert!((x - 2.0).abs() < 1e-12);
    assert_eq!(y, 3.0);
    assert!(err.abs() < 1e-12);
}

#[test]
fn xy_plus_x_inconsistent_parameters_report_error() {
    let mut g = ArrowGraph::new();
    let fwd = xy_plus_x(&mut g);
    let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
    let out = evaluate(&g, inv, &[scalar(8.0), scalar(3.0), scalar(1.0)]).unwrap();
    let v = scalars(&out);
    // copies disagree: (8 - 1) / 3 vs 1
    let expected_x = (7.0 / 3.0 + 1.0) / 2.0;
    assert!((v[0] - expected_x).abs() < 1e-12);
    assert!(v[2] > 0.0);
}

#[test]
fn sin_inverse_is_total() {
    let mut g = ArrowGraph::new();
    let mut b = ExprBuilder::new(&mut g, "wave");
    let x = b.input().unwrap();
    let s = b.sin(x).unwrap();
    b.output(s).unwrap();
    let fwd = b.finish();
    let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
    assert_eq!(g.error_ports(inv).unwrap().len(), 1);

    let inside = scalars(&evaluate(&g, inv, &[scalar(0.5)]).unwrap());
    assert!((inside[0].sin() - 0.5).abs() < 1e-12);
    assert_eq!(inside[1], 0.0);

    let outside = scalars(&evaluate(&g, inv, &[scalar(1.5)]).unwrap());
    assert!(outside[0].is_finite());
    assert!((outside[1] - (1.5 - 0.999)).abs() < 1e-12);
}

#[test]
fn clamp_bound_comes_from_options() {
    let mut g = ArrowGraph::new();
    let mut b = ExprBuilder::new(&mut g, "wave");
    let x = b.input().unwrap();
    let s = b.sin(x).unwrap();
    b.output(s).unwrap();
    let fwd = b.finish();
    let registry = Registry::with_defaults(InvertOptions {
        trig_bound: 0.5,
        ..InvertOptions::default()
    });
    let inv = invert(&mut g, &registry, fwd).unwrap();
    let out = scalars(&evaluate(&g, inv, &[scalar(0.75)]).unwrap());
    assert!((out[1] - 0.25).abs() < 1e-12);
}

#[test]
fn gather_rebuilds_tensor_from_rows_and_complement() {
    let mut g = ArrowGraph::new();
    let mut b = ExprBuilder::new(&mut g, "select");
    let t = b.input().unwrap();
    let idx = b.constant(Literal::vector(vec![1.0, 3.0])).unwrap();
    let rows = b.gather(t, idx).unwrap();
    b.output(rows).unwrap();
    let fwd = b.finish();

    let tensor = Literal::tensor(vec![4, 2], (0..8).map(f64::from).collect()).unwrap();
    let selected = evaluate(&g, fwd, std::slice::from_ref(&tensor)).unwrap();
    assert_eq!(selected[0].data(), &[2.0, 3.0, 6.0, 7.0]);

    let mut seed = PortAttributes::new();
    seed.set_shape(t, vec![4, 2]).unwrap();
    let inv = invert_seeded(&mut g, &Registry::default(), fwd, seed).unwrap();
    let kinds: Vec<PortKind> = g
        .ports(inv.arrow)
        .unwrap()
        .iter()
        .map(|&p| g.port(p).unwrap().kind)
        .collect();
    assert_eq!(kinds, vec![PortKind::In, PortKind::Param, PortKind::Out]);

    let rest = Literal::tensor(vec![2, 2], vec![0.0, 1.0, 4.0, 5.0]).unwrap();
    let rebuilt = evaluate(&g, inv.arrow, &[selected[0].clone(), rest]).unwrap();
    assert!(rebuilt[0].approx_eq(&tensor, 0.0));
}

#[test]
fn gather_without_shape_is_diagnosed() {
    let mut g = ArrowGraph::new();
    let mut b = ExprBuilder::new(&mut g, "select");
    let t = b.input().unwrap();
    let idx = b.constant(Literal::vector(vec![0.0])).unwrap();
    let rows = b.gather(t, idx).unwrap();
    b.output(rows).unwrap();
    let fwd = b.finish();
    let err = invert(&mut g, &Registry::default(), fwd).unwrap_err();
    assert!(matches!(
        err,
        ArrowError::MissingAttribute {
            attribute: "shape",
            ..
        }
    ));
}

#[test]
fn constant_input_seed_keeps_operand_given() {
    // z = x * y with y declared constant: inverse takes z and y, returns x
    let mut g = ArrowGraph::new();
    let mut b = ExprBuilder::new(&mut g, "scale");
    let x = b.input().unwrap();
    let y = b.input().unwrap();
    let z = b.mul(x, y).unwrap();
    b.output(z).unwrap();
    let fwd = b.finish();

    let mut seed = PortAttributes::new();
    seed.set_constness(y, revflow::Constness::Constant).unwrap();
    let inv = invert_seeded(&mut g, &Registry::default(), fwd, seed).unwrap();
    assert!(!g.is_parametric(inv.arrow).unwrap());
    let z_at = inv.remap.inverse_index(2).unwrap();
    let y_at = inv.remap.inverse_index(1).unwrap();
    let mut args = vec![scalar(0.0); 2];
    args[z_at] = scalar(12.0);
    args[y_at] = scalar(4.0);
    let out = evaluate(&g, inv.arrow, &args).unwrap();
    assert_eq!(out, vec![scalar(3.0)]);
}

#[test]
fn nan_constant_folds_and_inverts() {
    // x + log(-1): the folded operand is NaN
    let mut g = ArrowGraph::new();
    let mut b = ExprBuilder::new(&mut g, "nan_offset");
    let x = b.input().unwrap();
    let minus_one = b.constant(scalar(-1.0)).unwrap();
    let l = b.log(minus_one).unwrap();
    let z = b.add(x, l).unwrap();
    b.output(z).unwrap();
    let fwd = b.finish();

    let attrs = revflow::propagate::propagate(&g, fwd).unwrap();
    assert!(attrs.value(l).and_then(Literal::as_scalar).is_some_and(f64::is_nan));

    let inv = invert(&mut g, &Registry::default(), fwd).unwrap();
    assert!(!g.is_parametric(inv).unwrap());
    assert_eq!(g.in_ports(inv).unwrap().len(), 1);
    assert_eq!(g.out_ports(inv).unwrap().len(), 1);
}
