use std::sync::Once;

use neurograph_core::{Builder, RuntimeContext};

static TRACING: Once = Once::new();

/// Surface `tracing` events in test output. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn builder() -> (RuntimeContext, Builder) {
    init_tracing();
    let runtime = RuntimeContext::new();
    let builder = Builder::new(runtime.clone());
    (runtime, builder)
}
