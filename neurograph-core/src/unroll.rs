use tracing::debug;

use crate::{
    cell::{RecurrentStep, StepState},
    Error, Result,
};

/// Result of [`static_unroll`].
#[derive(Debug, Clone, PartialEq)]
pub struct Unrolled {
    /// One output per timestep.
    pub outputs: Vec<StepState>,
    pub final_state: StepState,
}

/// Run `cell` once per element of `inputs`, threading the state from each
/// step into the next.
pub fn static_unroll<C, I>(cell: &mut C, inputs: I, initial: StepState) -> Result<Unrolled>
where
    C: RecurrentStep + ?Sized,
    I: IntoIterator<Item = StepState>,
{
    if initial.len() != cell.state_size().len() {
        return Err(Error::wiring(
            "unroll",
            format!(
                "initial state has {} components, the cell expects {}",
                initial.len(),
                cell.state_size().len()
            ),
        ));
    }
    let mut state = initial;
    let mut outputs = Vec::new();
    for (t, x) in inputs.into_iter().enumerate() {
        let (out, next) = cell.step(x, state)?;
        debug!(t, "unroll step");
        outputs.push(out);
        state = next;
    }
    Ok(Unrolled {
        outputs,
        final_state: state,
    })
}
