use crate::{
    runtime::{GraphTensor, Init, Op},
    Dim, Result, Shape,
};

use super::{BuildContext, GraphNode, InputClass, SlotRegistry};

/// A root of the graph: no islots, fed by data or sampled from a learned
/// distribution.
#[derive(Debug, Clone)]
pub struct InputNode {
    name: String,
    features: Vec<usize>,
    batch: Dim,
    class: InputClass,
    slots: SlotRegistry,
}

impl InputNode {
    pub(crate) fn new(name: String, features: Vec<usize>, batch: Dim, class: InputClass) -> Self {
        let num_outputs = match class {
            InputClass::Placeholder => 1,
            InputClass::Normal(_) => 3,
        };
        Self {
            name,
            features,
            batch,
            class,
            slots: SlotRegistry::new(0, num_outputs),
        }
    }

    pub fn input_class(&self) -> &InputClass {
        &self.class
    }

    pub fn features(&self) -> &[usize] {
        &self.features
    }

    fn dim(&self) -> usize {
        self.features.iter().product()
    }
}

impl GraphNode for InputNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        match self.class {
            InputClass::Placeholder => "In",
            InputClass::Normal(_) => "NormalIn",
        }
    }

    fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotRegistry {
        &mut self.slots
    }

    fn oslot_shape(&self, oslot: usize) -> Option<Shape> {
        match (oslot, &self.class) {
            (0, _) => Some(Shape::with_batch(self.batch, &self.features)),
            (1, InputClass::Normal(_)) => Some(Shape::fixed([self.dim()])),
            (2, InputClass::Normal(_)) => Some(Shape::fixed([self.dim(), self.dim()])),
            _ => None,
        }
    }

    fn materialize(
        &mut self,
        ctx: &BuildContext<'_>,
        _inputs: &[GraphTensor],
    ) -> Result<Vec<GraphTensor>> {
        let shape = Shape::with_batch(self.batch, &self.features);
        match &self.class {
            InputClass::Placeholder => Ok(vec![ctx.runtime.materialize(
                &ctx.output_name(&self.name, "main"),
                Op::Placeholder,
                shape,
                ctx.dtype,
            )]),
            InputClass::Normal(config) => {
                let d = self.dim();
                let init = if config.loc_init_std > 0.0 {
                    Init::Normal {
                        std: config.loc_init_std,
                    }
                } else {
                    Init::Zeros
                };
                let loc = ctx.runtime.variable(
                    &ctx.output_name(&self.name, "loc"),
                    init,
                    Shape::fixed([d]),
                    ctx.dtype,
                )?;
                let scale = ctx.runtime.variable(
                    &ctx.output_name(&self.name, "scale"),
                    Init::Identity,
                    Shape::fixed([d, d]),
                    ctx.dtype,
                )?;
                let sample = ctx.runtime.materialize(
                    &ctx.output_name(&self.name, "main"),
                    Op::NormalSample {
                        loc: loc.id(),
                        scale_tril: scale.id(),
                    },
                    shape,
                    ctx.dtype,
                );
                Ok(vec![sample, loc, scale])
            }
        }
    }
}
