use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use neurograph_core::{
    static_unroll, Builder, InnerClass, InputClass, RuntimeContext, StepState, TwoEncodersCell,
};

/// `depth` deterministic nodes chained behind one input.
fn chain(depth: usize) -> Builder {
    let mut b = Builder::new(RuntimeContext::new());
    let mut prev = b.add_input([16], InputClass::Placeholder).unwrap();
    for _ in 0..depth {
        let next = b.add_inner([16], 1, InnerClass::default()).unwrap();
        b.add_directed_link(&prev, &next, 0, 0).unwrap();
        prev = next;
    }
    b
}

fn bench_commit_chain(c: &mut Criterion) {
    for depth in [16, 128] {
        c.bench_function(&format!("commit_chain_{depth}"), |bencher| {
            bencher.iter_batched(
                || chain(depth),
                |mut b| b.commit().unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
}

fn bench_unroll_two_encoders(c: &mut Criterion) {
    c.bench_function("unroll_two_encoders_32", |bencher| {
        bencher.iter_batched(
            || {
                let mut ext = Builder::new(RuntimeContext::new());
                let x = ext.add_input([8], InputClass::Placeholder).unwrap();
                let cell = TwoEncodersCell::new([16, 16], &mut ext).unwrap();
                ext.commit().unwrap();
                let init: Vec<_> = cell
                    .init_states()
                    .iter()
                    .map(|n| ext.output(n, 0).unwrap().clone())
                    .collect();
                let x = ext.output(&x, 0).unwrap().clone();
                (cell, x, init)
            },
            |(mut cell, x, init)| {
                static_unroll(&mut cell, vec![StepState::from(x); 32], init.into()).unwrap()
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_commit_chain, bench_unroll_two_encoders);
criterion_main!(benches);
