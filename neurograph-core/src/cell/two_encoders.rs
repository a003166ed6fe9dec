use tracing::debug;

use crate::{
    config::TwoEncodersConfig, Builder, Error, InnerClass, InputClass, Result,
};

use super::{CellCore, CellState, RecurrentStep, StepState};

const ENCODER: &str = "Custom";

/// A two-state cell made of two deterministic encoders.
///
/// The first encoder maps `(state_0, input)` to the new `state_0`; the second
/// maps `(state_1, new state_0)` to the new `state_1`. The two new states are
/// also the cell's output.
///
/// Constructing the cell registers its two initial-state inputs on the
/// external builder, see [`TwoEncodersCell::init_states`].
#[derive(Debug)]
pub struct TwoEncodersCell {
    core: CellCore,
    init_states: Vec<String>,
    config: TwoEncodersConfig,
}

impl TwoEncodersCell {
    pub fn new(state_sizes: [usize; 2], ext: &mut Builder) -> Result<Self> {
        Self::with_config(state_sizes, ext, TwoEncodersConfig::default())
    }

    pub fn with_config(
        state_sizes: [usize; 2],
        ext: &mut Builder,
        config: TwoEncodersConfig,
    ) -> Result<Self> {
        let name = config.name.as_deref().unwrap_or("TwoEncCell").to_string();
        let mut cell = Self {
            core: CellCore::new(ext, &name, state_sizes.to_vec()),
            init_states: Vec::new(),
            config,
        };
        cell.declare_cell_encoder()?;
        cell.init_states = cell.get_init_states(ext)?;
        Ok(cell)
    }

    fn declare_cell_encoder(&mut self) -> Result<()> {
        let [s0, s1] = [self.core.state_dims[0], self.core.state_dims[1]];
        let class = InnerClass::Deterministic(self.config.encoder.clone());
        {
            let cust = self.core.builder.create_custom_node(3, 2, ENCODER)?;
            let in1 = cust.add_inner([s0], 2, class.clone())?;
            let in2 = cust.add_inner([s1], 2, class)?;
            cust.add_directed_link(&in1, &in2, 0, 1)?;
            cust.declare_islot(0, &in1, 0)?;
            cust.declare_islot(1, &in2, 0)?;
            cust.declare_islot(2, &in1, 1)?;
            cust.declare_oslot(0, &in1, 0)?;
            cust.declare_oslot(1, &in2, 0)?;
        }
        self.core.advance(CellState::WiringDeclared);

        self.core.freeze(ENCODER)?;
        debug!(scope = self.core.builder.scope(), s0, s1, "two-encoder cell built");
        Ok(())
    }

    /// Names of the initial-state nodes on the external builder.
    pub fn init_states(&self) -> &[String] {
        &self.init_states
    }

    pub fn state(&self) -> CellState {
        self.core.state
    }

    /// Scope of the step graph's symbols.
    pub fn scope(&self) -> &str {
        self.core.builder.scope()
    }

    /// The composite node holding the step graph.
    pub fn encoder(&self) -> Result<&crate::CustomNode> {
        self.core.builder.custom_node(ENCODER)
    }
}

impl RecurrentStep for TwoEncodersCell {
    fn state_size(&self) -> &[usize] {
        &self.core.state_dims
    }

    fn output_size(&self) -> &[usize] {
        &self.core.state_dims
    }

    fn get_init_states(&mut self, ext: &mut Builder) -> Result<Vec<String>> {
        let class = InputClass::Normal(self.config.init.clone());
        self.core
            .state_dims
            .iter()
            .map(|&d| ext.add_input([d], class.clone()))
            .collect()
    }

    fn step(&mut self, inputs: StepState, state: StepState) -> Result<(StepState, StepState)> {
        if inputs.len() != 1 {
            return Err(Error::wiring(
                ENCODER,
                format!("expected 1 step input, got {}", inputs.len()),
            ));
        }
        let outputs = self.core.invoke(ENCODER, inputs, state)?;
        Ok((
            StepState::Multiple(outputs.clone()),
            StepState::Multiple(outputs),
        ))
    }
}
