use crate::{config::DeterministicConfig, runtime::GraphTensor, Dim, Result, Shape};

use super::{check_batched, concat_inputs, dense, hidden_stack, BuildContext, GraphNode, SlotRegistry};

/// Feed-forward map from the concatenation of its inputs to a tensor of the
/// declared shape, flattened after the batch dimension.
#[derive(Debug, Clone)]
pub struct DeterministicNode {
    name: String,
    features: Vec<usize>,
    batch: Dim,
    config: DeterministicConfig,
    slots: SlotRegistry,
}

impl DeterministicNode {
    pub(crate) fn new(
        name: String,
        features: Vec<usize>,
        num_inputs: usize,
        batch: Dim,
        config: DeterministicConfig,
    ) -> Self {
        Self {
            name,
            features,
            batch,
            config,
            slots: SlotRegistry::new(num_inputs, 1),
        }
    }

    pub fn config(&self) -> &DeterministicConfig {
        &self.config
    }
}

impl GraphNode for DeterministicNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        "Det"
    }

    fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotRegistry {
        &mut self.slots
    }

    fn oslot_shape(&self, oslot: usize) -> Option<Shape> {
        let units: usize = self.features.iter().product();
        (oslot == 0).then(|| Shape::with_batch(self.batch, [units]))
    }

    fn check_islot(&self, islot: usize, shape: &Shape) -> Result<()> {
        check_batched(&self.name, islot, self.batch, shape)
    }

    fn materialize(
        &mut self,
        ctx: &BuildContext<'_>,
        inputs: &[GraphTensor],
    ) -> Result<Vec<GraphTensor>> {
        let x = concat_inputs(ctx, &self.name, inputs)?;
        let h = hidden_stack(ctx, &self.name, x, &self.config)?;
        let units = self.features.iter().product();
        let out = dense(
            ctx,
            &ctx.output_name(&self.name, "main"),
            &h,
            units,
            self.config.output_activation,
        )?;
        Ok(vec![out])
    }
}
