mod common;

use common::builder;
use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex},
};

use neurograph_core::{
    config::NormalTriLConfig, Builder, BuilderState, Error, InnerClass, InputClass, Op,
    RuntimeContext, Shape, Symbol,
};
use rstest::rstest;

#[test]
fn input_feeds_inner_node() {
    let (runtime, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 1, InnerClass::default()).unwrap();
    b.add_directed_link(&x, &y, 0, 0).unwrap();
    b.commit().unwrap();

    let outs = b.outputs(&y).unwrap();
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].shape(), &Shape::batched([3]));
    assert_eq!(outs[0].shape().to_string(), "[?, 3]");
    assert_eq!(runtime.find(outs[0].name()).unwrap().id, outs[0].id());
    assert_eq!(b.state(), BuilderState::Committed);
}

#[test]
fn removed_link_leaves_islot_unresolved() {
    let (_, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 1, InnerClass::default()).unwrap();
    b.add_directed_link(&x, &y, 0, 0).unwrap();
    b.remove_directed_link(&x, &y, 0, 0).unwrap();
    let err = b.commit().unwrap_err();
    assert!(matches!(err, Error::UnresolvedSlot { ref node, islot: 0 } if *node == y));
    assert!(b.links().is_empty());
}

#[test]
fn removing_a_missing_link_fails() {
    let (_, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 1, InnerClass::default()).unwrap();
    assert!(matches!(
        b.remove_directed_link(&x, &y, 0, 0),
        Err(Error::Wiring { .. })
    ));
}

#[rstest]
#[case(0)]
#[case(1)]
fn every_islot_needs_a_link(#[case] dropped: usize) {
    let (_, mut b) = builder();
    let x0 = b.add_input([2], InputClass::Placeholder).unwrap();
    let x1 = b.add_input([4], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 2, InnerClass::default()).unwrap();
    b.add_directed_link(&x0, &y, 0, 0).unwrap();
    b.add_directed_link(&x1, &y, 0, 1).unwrap();
    let src = if dropped == 0 { &x0 } else { &x1 };
    b.remove_directed_link(src, &y, 0, dropped).unwrap();
    assert!(matches!(
        b.commit(),
        Err(Error::UnresolvedSlot { islot, .. }) if islot == dropped
    ));
}

#[test]
fn second_commit_is_rejected_without_rematerializing() {
    let (runtime, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 1, InnerClass::default()).unwrap();
    b.add_directed_link(&x, &y, 0, 0).unwrap();
    b.commit().unwrap();
    let symbols = runtime.len();

    for _ in 0..2 {
        assert!(matches!(b.commit(), Err(Error::AlreadyCommitted(_))));
    }
    assert_eq!(runtime.len(), symbols);
    assert!(matches!(
        b.add_input([1], InputClass::Placeholder),
        Err(Error::AlreadyCommitted(_))
    ));
}

fn two_input_graph(first: usize) -> Vec<Symbol> {
    let runtime = RuntimeContext::new();
    let mut b = Builder::new(runtime.clone());
    let x0 = b.add_input([2], InputClass::Placeholder).unwrap();
    let x1 = b.add_input([5], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 2, InnerClass::default()).unwrap();
    let links = [(&x0, 0), (&x1, 1)];
    let order = if first == 0 { [0, 1] } else { [1, 0] };
    for i in order {
        let (src, islot) = links[i];
        b.add_directed_link(src, &y, 0, islot).unwrap();
    }
    b.commit().unwrap();
    let symbols = runtime.symbols().clone();
    symbols
}

#[test]
fn wiring_order_does_not_change_the_graph() {
    let a = two_input_graph(0);
    let b = two_input_graph(1);
    assert_eq!(a, b);
    let concat = a
        .iter()
        .find(|s| matches!(s.op, Op::Concat { .. }))
        .unwrap();
    assert_eq!(concat.shape, Shape::batched([7]));
}

#[test]
fn cycles_are_reported() {
    let (_, mut b) = builder();
    let p = b.add_inner([3], 1, InnerClass::default()).unwrap();
    let q = b.add_inner([3], 1, InnerClass::default()).unwrap();
    b.add_directed_link(&p, &q, 0, 0).unwrap();
    b.add_directed_link(&q, &p, 0, 0).unwrap();
    let err = b.commit().unwrap_err();
    assert!(matches!(err, Error::Cycle { ref scope, .. } if scope == "main"));
    // The builder can still be inspected after a failed validation.
    assert_eq!(b.state(), BuilderState::Open);
}

#[test]
fn occupied_and_out_of_range_slots() {
    let (_, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 1, InnerClass::default()).unwrap();
    b.add_directed_link(&x, &y, 0, 0).unwrap();
    assert!(matches!(
        b.add_directed_link(&x, &y, 0, 0),
        Err(Error::Wiring { .. })
    ));
    assert!(matches!(
        b.add_directed_link(&x, &y, 1, 0),
        Err(Error::Wiring { .. })
    ));
    assert!(matches!(
        b.add_directed_link(&x, &y, 0, 1),
        Err(Error::Wiring { .. })
    ));
    assert!(matches!(
        b.add_directed_link("nope", &y, 0, 0),
        Err(Error::UnknownNode { .. })
    ));
}

#[test]
fn normal_tril_checks_its_feature_dimension() {
    let (_, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let n = b
        .add_inner(
            [2],
            1,
            InnerClass::NormalTriL(NormalTriLConfig {
                num_features: Some(4),
                ..Default::default()
            }),
        )
        .unwrap();
    let err = b.add_directed_link(&x, &n, 0, 0).unwrap_err();
    assert!(matches!(err, Error::Shape { islot: 0, .. }));
}

#[test]
fn normal_tril_exposes_sample_loc_and_scale() {
    let (_, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let n = b
        .add_inner([2], 1, InnerClass::NormalTriL(Default::default()))
        .unwrap();
    b.add_directed_link(&x, &n, 0, 0).unwrap();
    b.commit().unwrap();
    let outs = b.outputs(&n).unwrap();
    assert_eq!(outs.len(), 3);
    assert_eq!(outs[0].shape(), &Shape::batched([2]));
    assert_eq!(outs[1].shape(), &Shape::batched([2]));
    assert_eq!(outs[2].shape(), &Shape::batched([2, 2]));
    assert_eq!(outs[2].name(), format!("main/{n}_scale"));
}

#[test]
fn otensor_names_point_at_main_outputs() {
    let (_, mut b) = builder();
    let x = b.add_input([3], InputClass::Placeholder).unwrap();
    let y = b.add_inner([3], 1, InnerClass::default()).unwrap();
    b.add_directed_link(&x, &y, 0, 0).unwrap();
    b.commit().unwrap();
    let names = b.otensor_names();
    assert_eq!(names.len(), 2);
    assert_eq!(names[&x], format!("main/{x}_main"));
    assert_eq!(names[&y], format!("main/{y}_main"));
}

/// A writer collecting formatted log lines.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn rejected_commit_is_not_logged() {
    let logs = Captured::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        let (_, mut b) = builder();
        b.add_input([3], InputClass::Placeholder).unwrap();
        b.commit().unwrap();
        assert!(matches!(b.commit(), Err(Error::AlreadyCommitted(_))));
    });
    let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    // Only the accepted commit reports its node count.
    assert_eq!(text.matches("nodes=1").count(), 1);
}

#[test]
fn failed_materialization_poisons_the_builder() {
    let runtime = RuntimeContext::new();
    let mut first = Builder::new(runtime.clone());
    let x = first.add_input([2], InputClass::Placeholder).unwrap();
    let y = first.add_inner([3], 1, InnerClass::default()).unwrap();
    first.add_directed_link(&x, &y, 0, 0).unwrap();
    first.commit().unwrap();

    // Same scope and node names, wider input: the shared weights no longer fit.
    let mut second = Builder::new(runtime);
    let x = second.add_input([4], InputClass::Placeholder).unwrap();
    let y = second.add_inner([3], 1, InnerClass::default()).unwrap();
    second.add_directed_link(&x, &y, 0, 0).unwrap();
    assert!(matches!(
        second.commit(),
        Err(Error::VariableShape { .. })
    ));
    assert_eq!(second.state(), BuilderState::Failed);
    assert!(matches!(second.commit(), Err(Error::BuilderFailed(_))));
    assert!(matches!(
        second.add_input([1], InputClass::Placeholder),
        Err(Error::BuilderFailed(_))
    ));
}

#[test]
fn open_builders_cannot_invoke_nodes() {
    let (runtime, mut b) = builder();
    let y = b.add_inner([3], 1, InnerClass::default()).unwrap();
    let x = runtime.materialize("x", Op::Placeholder, Shape::batched([2]), Default::default());
    let before = runtime.len();
    assert!(matches!(
        b.invoke_node(&y, &BTreeMap::from([(0, x)])),
        Err(Error::NotCommitted(_))
    ));
    assert_eq!(runtime.len(), before);
}
