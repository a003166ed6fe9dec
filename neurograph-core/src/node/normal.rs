use crate::{
    config::{Activation, NormalTriLConfig},
    runtime::{GraphTensor, Op},
    Dim, Error, Result, Shape,
};

use super::{check_batched, concat_inputs, dense, hidden_stack, BuildContext, GraphNode, SlotRegistry};

/// Multivariate normal whose mean and lower-triangular scale are computed
/// from the node inputs.
///
/// Oslot 0 is a reparameterized sample, oslot 1 the mean and oslot 2 the
/// `[batch, d, d]` scale.
#[derive(Debug, Clone)]
pub struct NormalTriLNode {
    name: String,
    dim: usize,
    batch: Dim,
    config: NormalTriLConfig,
    slots: SlotRegistry,
}

impl NormalTriLNode {
    pub(crate) fn new(
        name: String,
        features: &[usize],
        num_inputs: usize,
        batch: Dim,
        config: NormalTriLConfig,
    ) -> Self {
        Self {
            name,
            dim: features.iter().product(),
            batch,
            config,
            slots: SlotRegistry::new(num_inputs, 3),
        }
    }

    pub fn config(&self) -> &NormalTriLConfig {
        &self.config
    }

    /// Dimension of the random variable.
    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl GraphNode for NormalTriLNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        "NormalTriL"
    }

    fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotRegistry {
        &mut self.slots
    }

    fn oslot_shape(&self, oslot: usize) -> Option<Shape> {
        match oslot {
            0 | 1 => Some(Shape::with_batch(self.batch, [self.dim])),
            2 => Some(Shape::with_batch(self.batch, [self.dim, self.dim])),
            _ => None,
        }
    }

    fn check_islot(&self, islot: usize, shape: &Shape) -> Result<()> {
        check_batched(&self.name, islot, self.batch, shape)?;
        match self.config.num_features {
            Some(want) if islot == 0 && shape.last_known() != Some(want) => Err(Error::Shape {
                node: self.name.clone(),
                islot,
                expected: format!("feature dimension {want}"),
                got: shape.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn materialize(
        &mut self,
        ctx: &BuildContext<'_>,
        inputs: &[GraphTensor],
    ) -> Result<Vec<GraphTensor>> {
        let d = self.dim;
        let x = concat_inputs(ctx, &self.name, inputs)?;
        let h = hidden_stack(ctx, &self.name, x, &self.config.hidden())?;

        let loc = dense(
            ctx,
            &ctx.output_name(&self.name, "loc"),
            &h,
            d,
            Activation::None,
        )?;
        let tril = dense(
            ctx,
            &ctx.inner_name(&self.name, "tril"),
            &h,
            d * d,
            Activation::None,
        )?;
        let scale = ctx.runtime.materialize(
            &ctx.output_name(&self.name, "scale"),
            Op::FillTriangular { input: tril.id() },
            tril.shape().with_last(d).extended(d),
            ctx.dtype,
        );
        let sample = ctx.runtime.materialize(
            &ctx.output_name(&self.name, "main"),
            Op::NormalSample {
                loc: loc.id(),
                scale_tril: scale.id(),
            },
            loc.shape().clone(),
            ctx.dtype,
        );
        Ok(vec![sample, loc, scale])
    }
}
