//! Graph nodes and their slot wiring.
//!
//! A node exposes numbered input slots (islots) and output slots (oslots).
//! Nodes are created through a [`crate::Builder`], connected with directed
//! links `(src, oslot) -> (dst, islot)` and materialized into the
//! [`RuntimeContext`] once every islot has a source.
//!
//! | Node | islots | oslots |
//! |------|--------|--------|
//! | [`InputNode`] (placeholder) | 0 | `main` |
//! | [`InputNode`] (normal) | 0 | `main`, `loc`, `scale` |
//! | [`DeterministicNode`] | any | `main` |
//! | [`NormalTriLNode`] | any | `main`, `loc`, `scale` |
//! | [`CustomNode`] | declared | declared |

pub mod custom;
pub mod deterministic;
pub mod input;
pub mod normal;
pub mod slots;

use std::fmt::Debug;

pub use custom::CustomNode;
pub use deterministic::DeterministicNode;
pub use input::InputNode;
pub use normal::NormalTriLNode;
pub use slots::{SlotRef, SlotRegistry};

use crate::{
    config::{Activation, DeterministicConfig, NormalInputConfig, NormalTriLConfig},
    runtime::{GraphTensor, Init, Op},
    DType, Dim, Error, Result, RuntimeContext, Shape,
};

/// What a node needs from its builder while materializing.
pub struct BuildContext<'a> {
    pub runtime: &'a RuntimeContext,
    pub scope: &'a str,
    pub dtype: DType,
}

impl BuildContext<'_> {
    /// Symbol name of a node's output slot, `<scope>/<node>_<label>`.
    pub fn output_name(&self, node: &str, label: &str) -> String {
        format!("{}/{}_{}", self.scope, node, label)
    }

    /// Symbol name of a node's internal tensor, `<scope>/<node>/<part>`.
    pub fn inner_name(&self, node: &str, part: &str) -> String {
        format!("{}/{}/{}", self.scope, node, part)
    }
}

/// The capability every node of a builder implements.
pub trait GraphNode: Debug {
    fn name(&self) -> &str;

    /// Short class label, also the prefix of generated names.
    fn class(&self) -> &'static str;

    fn slots(&self) -> &SlotRegistry;

    fn slots_mut(&mut self) -> &mut SlotRegistry;

    fn num_inputs(&self) -> usize {
        self.slots().num_inputs()
    }

    fn num_outputs(&self) -> usize {
        self.slots().num_outputs()
    }

    /// Shape of the tensor this node produces at `oslot`, if known before
    /// materialization.
    fn oslot_shape(&self, oslot: usize) -> Option<Shape>;

    /// Validate the shape of a tensor about to be connected to `islot`.
    fn check_islot(&self, _islot: usize, _shape: &Shape) -> Result<()> {
        Ok(())
    }

    /// Hook run by the owning builder before it validates its graph.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Emit this node's symbols given one tensor per islot, returning one
    /// tensor per oslot.
    fn materialize(&mut self, ctx: &BuildContext<'_>, inputs: &[GraphTensor])
        -> Result<Vec<GraphTensor>>;

    fn as_custom(&self) -> Option<&CustomNode> {
        None
    }

    fn as_custom_mut(&mut self) -> Option<&mut CustomNode> {
        None
    }
}

/// Node classes with no islots.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InputClass {
    /// Fed with data at execution time.
    #[default]
    Placeholder,
    /// A learned normal distribution, sampled once per batch row.
    Normal(NormalInputConfig),
}

/// Node classes transforming their inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum InnerClass {
    Deterministic(DeterministicConfig),
    NormalTriL(NormalTriLConfig),
}

impl Default for InnerClass {
    fn default() -> Self {
        Self::Deterministic(DeterministicConfig::default())
    }
}

/// Reject ranks below two and batch dimensions that disagree.
pub(crate) fn check_batched(node: &str, islot: usize, batch: Dim, shape: &Shape) -> Result<()> {
    if shape.rank() < 2 {
        return Err(Error::Shape {
            node: node.to_string(),
            islot,
            expected: "[batch, features..]".to_string(),
            got: shape.to_string(),
        });
    }
    if let (Dim::Known(want), Some(Dim::Known(got))) = (batch, shape.batch()) {
        if want != got {
            return Err(Error::Shape {
                node: node.to_string(),
                islot,
                expected: format!("batch of {want}"),
                got: shape.to_string(),
            });
        }
    }
    if shape.last_known().is_none() {
        return Err(Error::Shape {
            node: node.to_string(),
            islot,
            expected: "a known feature dimension".to_string(),
            got: shape.to_string(),
        });
    }
    Ok(())
}

/// Concatenate the inputs along the trailing axis, passing a single input
/// through untouched.
pub(crate) fn concat_inputs(
    ctx: &BuildContext<'_>,
    node: &str,
    inputs: &[GraphTensor],
) -> Result<GraphTensor> {
    match inputs {
        [] => Err(Error::UnresolvedSlot {
            node: node.to_string(),
            islot: 0,
        }),
        [single] => Ok(single.clone()),
        many => {
            let mut features = 0;
            for (islot, t) in many.iter().enumerate() {
                check_batched(node, islot, Dim::Dynamic, t.shape())?;
                features += t.shape().last_known().unwrap_or_default();
            }
            let shape = many[0].shape().with_last(features);
            Ok(ctx.runtime.materialize(
                &ctx.inner_name(node, "concat"),
                Op::Concat {
                    inputs: many.iter().map(GraphTensor::id).collect(),
                },
                shape,
                ctx.dtype,
            ))
        }
    }
}

/// One affine layer followed by `activation`. The result symbol is named
/// `prefix`, its parameters live under it.
pub(crate) fn dense(
    ctx: &BuildContext<'_>,
    prefix: &str,
    x: &GraphTensor,
    units: usize,
    activation: Activation,
) -> Result<GraphTensor> {
    let fan_in = x.shape().last_known().unwrap_or(1);
    let weights = ctx.runtime.variable(
        &format!("{prefix}/weights"),
        Init::Normal {
            std: 1.0 / (fan_in as f64).sqrt(),
        },
        Shape::fixed([fan_in, units]),
        ctx.dtype,
    )?;
    let bias = ctx.runtime.variable(
        &format!("{prefix}/bias"),
        Init::Zeros,
        Shape::fixed([units]),
        ctx.dtype,
    )?;
    let shape = x.shape().with_last(units);
    let affine = Op::Affine {
        input: x.id(),
        weights: weights.id(),
        bias: bias.id(),
    };
    Ok(match activation {
        Activation::None => ctx.runtime.materialize(prefix, affine, shape, ctx.dtype),
        kind => {
            let pre = ctx.runtime.materialize(
                &format!("{prefix}/affine"),
                affine,
                shape.clone(),
                ctx.dtype,
            );
            ctx.runtime.materialize(
                prefix,
                Op::Activation {
                    input: pre.id(),
                    kind,
                },
                shape,
                ctx.dtype,
            )
        }
    })
}

/// The hidden stack of a feed-forward network.
pub(crate) fn hidden_stack(
    ctx: &BuildContext<'_>,
    node: &str,
    x: GraphTensor,
    config: &DeterministicConfig,
) -> Result<GraphTensor> {
    config
        .hidden_units()
        .into_iter()
        .enumerate()
        .try_fold(x, |h, (i, units)| {
            dense(
                ctx,
                &ctx.inner_name(node, &format!("hidden_{i}")),
                &h,
                units,
                config.activation,
            )
        })
}
