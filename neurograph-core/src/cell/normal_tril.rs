use crate::{
    config::{NormalInputConfig, NormalTriLConfig},
    Builder, InnerClass, InputClass, Result,
};

use super::{CellCore, CellState, RecurrentStep, StepState};

/// A single-state cell whose step is one [`crate::node::NormalTriLNode`]
/// reading `(state, input..)`. The sample is both the output and the new
/// state.
#[derive(Debug)]
pub struct NormalTriLCell {
    core: CellCore,
    name: String,
    init: NormalInputConfig,
}

impl NormalTriLCell {
    /// A cell with one step input.
    pub fn new(ext: &Builder, state_dim: usize) -> Result<Self> {
        Self::with_config(ext, state_dim, 2, NormalTriLConfig::default())
    }

    /// `num_inputs` counts the state islot. Islot 0 must carry `state_dim`
    /// features.
    pub fn with_config(
        ext: &Builder,
        state_dim: usize,
        num_inputs: usize,
        config: NormalTriLConfig,
    ) -> Result<Self> {
        Self::named(ext, "NormalTriLCell", state_dim, num_inputs, config)
    }

    /// Like [`NormalTriLCell::with_config`], with the step graph scoped under
    /// `<ext scope>/<name>`.
    pub fn named(
        ext: &Builder,
        name: &str,
        state_dim: usize,
        num_inputs: usize,
        config: NormalTriLConfig,
    ) -> Result<Self> {
        let name = name.to_string();
        let mut cell = Self {
            core: CellCore::new(ext, &name, vec![state_dim]),
            name,
            init: NormalInputConfig::default(),
        };
        let config = NormalTriLConfig {
            num_features: Some(state_dim),
            ..config
        };
        cell.core.builder.add_inner_named(
            cell.name.clone(),
            [state_dim],
            num_inputs,
            InnerClass::NormalTriL(config),
        )?;
        cell.core.advance(CellState::WiringDeclared);
        cell.core.freeze(&cell.name)?;
        Ok(cell)
    }

    /// Options of the initial-state input registered by
    /// [`RecurrentStep::get_init_states`].
    pub fn with_init(mut self, init: NormalInputConfig) -> Self {
        self.init = init;
        self
    }

    pub fn state(&self) -> CellState {
        self.core.state
    }

    /// Scope of the step graph's symbols.
    pub fn scope(&self) -> &str {
        self.core.builder.scope()
    }
}

impl RecurrentStep for NormalTriLCell {
    fn state_size(&self) -> &[usize] {
        &self.core.state_dims
    }

    fn output_size(&self) -> &[usize] {
        &self.core.state_dims
    }

    fn get_init_states(&mut self, ext: &mut Builder) -> Result<Vec<String>> {
        Ok(vec![ext.add_input(
            &self.core.state_dims,
            InputClass::Normal(self.init.clone()),
        )?])
    }

    fn step(&mut self, inputs: StepState, state: StepState) -> Result<(StepState, StepState)> {
        let outputs = self.core.invoke(&self.name, inputs, state)?;
        let sample = outputs.into_iter().next().ok_or_else(|| {
            crate::Error::msg(format!("`{}` produced no sample", self.name))
        })?;
        Ok((StepState::Single(sample.clone()), StepState::Single(sample)))
    }
}
