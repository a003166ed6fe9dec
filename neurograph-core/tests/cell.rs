mod common;

use common::builder;
use neurograph_core::{
    cell::CellState, static_unroll, Error, GraphNode, InputClass, NormalTriLCell, Op, RecurrentStep,
    RuntimeContext, Shape, StepState, TwoEncodersCell,
};

macro_rules! init_states_for_cell {
    ($name:ident, $make:expr, $n:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn one_init_state_per_component() {
                let (_, mut ext) = builder();
                let mut cell = ($make)(&mut ext);
                let before = ext.len();
                let names = cell.get_init_states(&mut ext).unwrap();
                assert_eq!(names.len(), $n);
                assert_eq!(names.len(), cell.state_size().len());
                assert_eq!(ext.len(), before + $n);
                for name in &names {
                    assert_eq!(ext.node(name).unwrap().class(), "NormalIn");
                }
            }

            #[test]
            fn output_is_state() {
                let (_, mut ext) = builder();
                let cell = ($make)(&mut ext);
                assert_eq!(cell.output_size(), cell.state_size());
            }
        }
    };
}

init_states_for_cell!(
    two_encoders,
    |ext: &mut neurograph_core::Builder| TwoEncodersCell::new([3, 4], ext).unwrap(),
    2
);
init_states_for_cell!(
    normal_tril,
    |ext: &mut neurograph_core::Builder| NormalTriLCell::new(ext, 3).unwrap(),
    1
);

fn variable_count(runtime: &RuntimeContext) -> usize {
    let symbols = runtime.symbols();
    symbols
        .iter()
        .filter(|s| matches!(s.op, Op::Variable { .. }))
        .count()
}

#[test]
fn two_encoders_registers_init_states_on_construction() {
    let (_, mut ext) = builder();
    let cell = TwoEncodersCell::new([3, 4], &mut ext).unwrap();
    assert_eq!(cell.init_states().len(), 2);
    assert!(cell.init_states().iter().all(|n| ext.contains(n)));
    assert_eq!(cell.state(), CellState::StepGraphBuilt);
    // The step graph lives in the cell, not in the external builder.
    assert!(!ext.contains("Custom"));
    assert!(cell.encoder().unwrap().is_committed());
}

#[test]
fn two_encoders_steps_thread_both_states() {
    let (runtime, mut ext) = builder();
    let x = ext.add_input([2], InputClass::Placeholder).unwrap();
    let mut cell = TwoEncodersCell::new([3, 4], &mut ext).unwrap();
    ext.commit().unwrap();

    let init: Vec<_> = cell
        .init_states()
        .iter()
        .map(|n| ext.output(n, 0).unwrap().clone())
        .collect();
    let x = ext.output(&x, 0).unwrap().clone();

    let (out, state) = cell
        .step(x.clone().into(), StepState::Multiple(init.clone()))
        .unwrap();
    assert_eq!(out, state);
    let out = out.into_vec();
    assert_eq!(out[0].shape(), &Shape::batched([3]));
    assert_eq!(out[1].shape(), &Shape::batched([4]));
    let variables = variable_count(&runtime);

    let unrolled = static_unroll(&mut cell, vec![StepState::from(x.clone()); 3], state).unwrap();
    assert_eq!(unrolled.outputs.len(), 3);
    assert_eq!(unrolled.final_state.len(), 2);
    assert_eq!(cell.state(), CellState::Invoked(4));
    // Every step reuses the encoder parameters.
    assert_eq!(variable_count(&runtime), variables);
}

#[test]
fn normal_tril_accepts_bare_values() {
    let (_, mut ext) = builder();
    let mut cell = NormalTriLCell::new(&ext, 3).unwrap();
    let init = cell.get_init_states(&mut ext).unwrap();
    let x = ext.add_input([2], InputClass::Placeholder).unwrap();
    ext.commit().unwrap();

    let state = ext.output(&init[0], 0).unwrap().clone();
    let x = ext.output(&x, 0).unwrap().clone();
    let (out, next) = cell.step(x.into(), state.into()).unwrap();
    match (&out, &next) {
        (StepState::Single(a), StepState::Single(b)) => {
            assert_eq!(a, b);
            assert_eq!(a.shape(), &Shape::batched([3]));
        }
        other => panic!("expected single states, got {other:?}"),
    }
}

#[test]
fn state_arity_is_checked() {
    let (_, mut ext) = builder();
    let x = ext.add_input([2], InputClass::Placeholder).unwrap();
    let mut cell = TwoEncodersCell::new([3, 4], &mut ext).unwrap();
    ext.commit().unwrap();
    let s0 = ext.output(&cell.init_states()[0], 0).unwrap().clone();
    let x = ext.output(&x, 0).unwrap().clone();

    assert!(matches!(
        cell.step(x.clone().into(), s0.clone().into()),
        Err(Error::Wiring { .. })
    ));
    assert!(matches!(
        static_unroll(&mut cell, vec![StepState::from(x)], s0.into()),
        Err(Error::Wiring { .. })
    ));
    assert_eq!(cell.state(), CellState::StepGraphBuilt);
}

#[test]
fn normal_tril_rejects_a_mismatched_state() {
    let (_, mut ext) = builder();
    let mut cell = NormalTriLCell::new(&ext, 3).unwrap();
    let wrong = ext.add_input([5], InputClass::Placeholder).unwrap();
    let x = ext.add_input([2], InputClass::Placeholder).unwrap();
    ext.commit().unwrap();
    let wrong = ext.output(&wrong, 0).unwrap().clone();
    let x = ext.output(&x, 0).unwrap().clone();
    assert!(matches!(
        cell.step(x.into(), wrong.into()),
        Err(Error::Shape { islot: 0, .. })
    ));
}

fn variables_under(runtime: &RuntimeContext, scope: &str) -> Vec<(String, Shape)> {
    let prefix = format!("{scope}/");
    runtime
        .symbols()
        .iter()
        .filter(|s| matches!(s.op, Op::Variable { .. }) && s.name.starts_with(&prefix))
        .map(|s| (s.name.clone(), s.shape.clone()))
        .collect()
}

#[test]
fn separate_cells_own_separate_parameters() {
    let (runtime, mut ext) = builder();
    let mut small = NormalTriLCell::new(&ext, 3).unwrap();
    let mut large = NormalTriLCell::new(&ext, 5).unwrap();
    assert_eq!(small.scope(), "main/NormalTriLCell");
    assert_eq!(large.scope(), "main/NormalTriLCell_1");

    let s0 = small.get_init_states(&mut ext).unwrap();
    let s1 = large.get_init_states(&mut ext).unwrap();
    let x = ext.add_input([2], InputClass::Placeholder).unwrap();
    ext.commit().unwrap();
    let x = ext.output(&x, 0).unwrap().clone();
    let s0 = ext.output(&s0[0], 0).unwrap().clone();
    let s1 = ext.output(&s1[0], 0).unwrap().clone();

    let before = variable_count(&runtime);
    small.step(x.clone().into(), s0.into()).unwrap();
    let after_small = variable_count(&runtime);
    large.step(x.into(), s1.into()).unwrap();
    let after_large = variable_count(&runtime);
    assert!(after_small > before);
    assert_eq!(after_large - after_small, after_small - before);

    let small_vars = variables_under(&runtime, small.scope());
    let large_vars = variables_under(&runtime, large.scope());
    assert_eq!(small_vars.len(), after_small - before);
    assert_eq!(large_vars.len(), after_large - after_small);
    assert!(small_vars.iter().all(|v| !large_vars.contains(v)));
    // State and input are concatenated: 5 + 2 features.
    let hidden = format!("{}/NormalTriLCell/hidden_0/weights", large.scope());
    assert_eq!(runtime.find(&hidden).unwrap().shape, Shape::fixed([7, 64]));
}

#[test]
fn two_encoder_cells_do_not_share_a_scope() {
    let (_, mut ext) = builder();
    let a = TwoEncodersCell::new([3, 4], &mut ext).unwrap();
    let b = TwoEncodersCell::new([3, 4], &mut ext).unwrap();
    assert_ne!(a.scope(), b.scope());
    assert!(a.init_states().iter().all(|n| !b.init_states().contains(n)));
}
