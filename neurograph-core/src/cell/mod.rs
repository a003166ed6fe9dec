//! Recurrent cells.
//!
//! A cell owns a private builder holding its one-step transition graph. The
//! graph is declared and frozen once at construction and then invoked once
//! per timestep through [`RecurrentStep::step`]:
//!
//! ```text
//! islot:   0 .. n_states      n_states ..
//!          [ state_0 .. ]     [ input_0 .. ]
//!                 \               /
//!                  step graph (shared variables)
//!                         |
//!              output == new state
//! ```
//!
//! Initial states must exist before the first step, so they are produced by
//! input nodes registered on the *external* builder
//! ([`RecurrentStep::get_init_states`]).

pub mod normal_tril;
pub mod two_encoders;

use std::collections::BTreeMap;

pub use normal_tril::NormalTriLCell;
pub use two_encoders::TwoEncodersCell;

use crate::{
    config::BuilderConfig, node::SlotRef, runtime::GraphTensor, Builder, Error, Result,
};

/// One or several tensors passed to, or returned from, a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepState {
    Single(GraphTensor),
    Multiple(Vec<GraphTensor>),
}

impl StepState {
    pub fn len(&self) -> usize {
        match self {
            StepState::Single(_) => 1,
            StepState::Multiple(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize into an ordered sequence.
    pub fn into_vec(self) -> Vec<GraphTensor> {
        match self {
            StepState::Single(t) => vec![t],
            StepState::Multiple(v) => v,
        }
    }

    pub fn as_slice(&self) -> &[GraphTensor] {
        match self {
            StepState::Single(t) => std::slice::from_ref(t),
            StepState::Multiple(v) => v,
        }
    }
}

impl From<GraphTensor> for StepState {
    fn from(value: GraphTensor) -> Self {
        StepState::Single(value)
    }
}

impl From<Vec<GraphTensor>> for StepState {
    fn from(value: Vec<GraphTensor>) -> Self {
        StepState::Multiple(value)
    }
}

/// The step interface consumed by sequence drivers such as
/// [`crate::static_unroll`].
pub trait RecurrentStep {
    /// Feature dimension of each state component.
    fn state_size(&self) -> &[usize];

    /// Feature dimension of each output component.
    fn output_size(&self) -> &[usize];

    /// Register one input node per state component on `ext` and return their
    /// names, ordered as [`RecurrentStep::state_size`].
    fn get_init_states(&mut self, _ext: &mut Builder) -> Result<Vec<String>> {
        Err(Error::NotImplemented("get_init_states"))
    }

    /// Run one timestep, returning `(output, new_state)`.
    fn step(&mut self, inputs: StepState, state: StepState) -> Result<(StepState, StepState)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Constructed,
    WiringDeclared,
    StepGraphBuilt,
    /// Number of steps run so far.
    Invoked(usize),
}

/// What every cell shares: the private step builder and its lifecycle.
#[derive(Debug)]
pub(crate) struct CellCore {
    pub(crate) builder: Builder,
    pub(crate) state_dims: Vec<usize>,
    pub(crate) state: CellState,
}

impl CellCore {
    /// A step builder scoped under `<ext scope>/<name>`, sharing the external
    /// builder's runtime. Every cell gets its own scope, so two cells never
    /// share parameters; the second `Cell` under `main` lives in
    /// `main/Cell_1`.
    pub(crate) fn new(ext: &Builder, name: &str, state_dims: Vec<usize>) -> Self {
        let config = BuilderConfig {
            scope: ext
                .runtime()
                .unique_scope(&format!("{}/{}", ext.scope(), name)),
            ..ext.config().clone()
        };
        Self {
            builder: Builder::with_config(ext.runtime().clone(), config),
            state_dims,
            state: CellState::Constructed,
        }
    }

    pub(crate) fn advance(&mut self, to: CellState) {
        self.state = to;
    }

    /// Feed every islot of the step node from outside and freeze the private
    /// builder.
    pub(crate) fn freeze(&mut self, node: &str) -> Result<()> {
        let islots = self.builder.node(node)?.num_inputs();
        for islot in 0..islots {
            self.builder.mark_external(SlotRef::new(node, islot))?;
        }
        self.builder.plan()?;
        self.advance(CellState::StepGraphBuilt);
        Ok(())
    }

    /// States at islots `0..n`, inputs from `n`.
    pub(crate) fn slot_map(
        &self,
        inputs: StepState,
        state: StepState,
    ) -> Result<BTreeMap<usize, GraphTensor>> {
        if state.len() != self.state_dims.len() {
            return Err(Error::wiring(
                self.builder.scope(),
                format!(
                    "expected {} state components, got {}",
                    self.state_dims.len(),
                    state.len()
                ),
            ));
        }
        Ok(state
            .into_vec()
            .into_iter()
            .chain(inputs.into_vec())
            .enumerate()
            .collect())
    }

    /// Invoke the step node `node` of the private builder.
    pub(crate) fn invoke(
        &mut self,
        node: &str,
        inputs: StepState,
        state: StepState,
    ) -> Result<Vec<GraphTensor>> {
        match self.state {
            CellState::StepGraphBuilt | CellState::Invoked(_) => {}
            _ => return Err(Error::NotCommitted(self.builder.scope().to_string())),
        }
        let slots = self.slot_map(inputs, state)?;
        let outputs = self.builder.invoke_node(node, &slots)?;
        let n = match self.state {
            CellState::Invoked(n) => n + 1,
            _ => 1,
        };
        self.advance(CellState::Invoked(n));
        Ok(outputs)
    }
}
