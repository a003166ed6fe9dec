use neurograph_core::{
    static_unroll, Builder, BuilderConfig, InputClass, RecurrentStep, RuntimeContext, StepState,
    TwoEncodersCell,
};

fn main() -> neurograph_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = RuntimeContext::new();
    let mut ext = Builder::with_config(
        runtime.clone(),
        BuilderConfig {
            batch_size: Some(4),
            ..BuilderConfig::scoped("model")
        },
    );
    let obs = ext.add_input_named("obs", [2], InputClass::Placeholder)?;
    let mut cell = TwoEncodersCell::new([3, 5], &mut ext)?;
    ext.commit()?;

    let init: Vec<_> = cell
        .init_states()
        .iter()
        .map(|n| ext.output(n, 0).cloned())
        .collect::<neurograph_core::Result<_>>()?;
    let obs = ext.output(&obs, 0)?.clone();

    let unrolled = static_unroll(&mut cell, vec![StepState::from(obs); 10], init.into())?;
    for (state, size) in unrolled.final_state.as_slice().iter().zip(cell.state_size()) {
        println!("{} {} (state of size {size})", state.name(), state.shape());
    }
    println!("{} symbols", runtime.len());
    dbg!(ext.otensor_names());
    Ok(())
}
