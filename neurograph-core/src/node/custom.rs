use std::collections::{BTreeMap, HashMap};

use petgraph::algo::has_path_connecting;
use tracing::{debug, warn};

use crate::{
    builder::Builder,
    error::SlotKind,
    runtime::GraphTensor,
    Error, InnerClass, InputClass, Result, Shape,
};

use super::{BuildContext, GraphNode, SlotRef, SlotRegistry};

/// A composite node wrapping its own [`Builder`].
///
/// From the outside it looks like any other node: a fixed number of islots
/// and oslots. Each islot is an alias for an islot of some internal node and
/// each oslot an alias for an internal oslot. Internal nodes are not
/// addressable from the enclosing builder.
#[derive(Debug)]
pub struct CustomNode {
    name: String,
    builder: Builder,
    islot_aliases: Vec<Option<SlotRef>>,
    oslot_aliases: Vec<Option<SlotRef>>,
    slots: SlotRegistry,
    committed: bool,
}

impl CustomNode {
    pub(crate) fn new(name: String, num_inputs: usize, num_outputs: usize, builder: Builder) -> Self {
        Self {
            name,
            builder,
            islot_aliases: vec![None; num_inputs],
            oslot_aliases: vec![None; num_outputs],
            slots: SlotRegistry::new(num_inputs, num_outputs),
            committed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner_builder(&self) -> &Builder {
        &self.builder
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn add_input(&mut self, shape: impl AsRef<[usize]>, class: InputClass) -> Result<String> {
        self.builder.add_input(shape, class)
    }

    pub fn add_inner(
        &mut self,
        shape: impl AsRef<[usize]>,
        num_inputs: usize,
        class: InnerClass,
    ) -> Result<String> {
        self.builder.add_inner(shape, num_inputs, class)
    }

    pub fn add_inner_named(
        &mut self,
        name: impl Into<String>,
        shape: impl AsRef<[usize]>,
        num_inputs: usize,
        class: InnerClass,
    ) -> Result<String> {
        self.builder.add_inner_named(name, shape, num_inputs, class)
    }

    pub fn add_directed_link(
        &mut self,
        src: &str,
        dst: &str,
        oslot: usize,
        islot: usize,
    ) -> Result<()> {
        self.builder.add_directed_link(src, dst, oslot, islot)
    }

    /// Alias islot `islot` of this node to islot `inner_islot` of the internal
    /// node `inner`.
    pub fn declare_islot(&mut self, islot: usize, inner: &str, inner_islot: usize) -> Result<()> {
        let len = self.islot_aliases.len();
        match self.islot_aliases.get(islot) {
            None => {
                return Err(Error::Range {
                    node: self.name.clone(),
                    kind: SlotKind::Islot,
                    index: islot,
                    len,
                })
            }
            Some(Some(_)) => {
                return Err(Error::DuplicateDeclaration {
                    node: self.name.clone(),
                    kind: SlotKind::Islot,
                    index: islot,
                })
            }
            Some(None) => {}
        }
        let target = SlotRef::new(inner, inner_islot);
        self.builder.mark_external(target.clone())?;
        debug!(node = %self.name, islot, inner = %target, "declare islot");
        self.islot_aliases[islot] = Some(target);
        Ok(())
    }

    /// Alias oslot `oslot` of this node to oslot `inner_oslot` of the internal
    /// node `inner`.
    pub fn declare_oslot(&mut self, oslot: usize, inner: &str, inner_oslot: usize) -> Result<()> {
        let len = self.oslot_aliases.len();
        match self.oslot_aliases.get(oslot) {
            None => {
                return Err(Error::Range {
                    node: self.name.clone(),
                    kind: SlotKind::Oslot,
                    index: oslot,
                    len,
                })
            }
            Some(Some(_)) => {
                return Err(Error::DuplicateDeclaration {
                    node: self.name.clone(),
                    kind: SlotKind::Oslot,
                    index: oslot,
                })
            }
            Some(None) => {}
        }
        self.builder
            .node(inner)?
            .slots()
            .check_oslot(inner, inner_oslot)?;
        let target = SlotRef::new(inner, inner_oslot);
        debug!(node = %self.name, oslot, inner = %target, "declare oslot");
        self.oslot_aliases[oslot] = Some(target);
        Ok(())
    }

    pub fn islot_alias(&self, islot: usize) -> Option<&SlotRef> {
        self.islot_aliases.get(islot).and_then(Option::as_ref)
    }

    pub fn oslot_alias(&self, oslot: usize) -> Option<&SlotRef> {
        self.oslot_aliases.get(oslot).and_then(Option::as_ref)
    }

    /// Freeze the internal graph. Every slot must be declared and every
    /// internal islot either linked or aliased.
    pub fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(Error::AlreadyCommitted(self.name.clone()));
        }
        if let Some(islot) = self.islot_aliases.iter().position(Option::is_none) {
            return Err(Error::UnresolvedSlot {
                node: self.name.clone(),
                islot,
            });
        }
        if let Some(oslot) = self.oslot_aliases.iter().position(Option::is_none) {
            return Err(Error::msg(format!(
                "oslot {oslot} of custom node `{}` is not declared",
                self.name
            )));
        }
        self.builder.plan()?;
        self.warn_unused()?;
        self.committed = true;
        debug!(node = %self.name, inner = self.builder.len(), "custom node committed");
        Ok(())
    }

    /// Internal nodes that reach no declared oslot are dead code.
    fn warn_unused(&self) -> Result<()> {
        let (graph, idx) = self.builder.link_graph()?;
        let mut sinks = Vec::with_capacity(self.oslot_aliases.len());
        for alias in self.oslot_aliases.iter().flatten() {
            let pos = self
                .builder
                .node_names()
                .position(|n| n == alias.node)
                .ok_or_else(|| Error::UnknownNode {
                    scope: self.builder.scope().to_string(),
                    name: alias.node.clone(),
                })?;
            sinks.push(idx[pos]);
        }
        for (i, name) in self.builder.node_names().enumerate() {
            if !sinks
                .iter()
                .any(|&sink| has_path_connecting(&graph, idx[i], sink, None))
            {
                warn!(node = %self.name, inner = name, "internal node reaches no declared oslot");
            }
        }
        Ok(())
    }

    /// Materialize the internal graph once more from explicit islot tensors.
    /// Variables are shared with earlier materializations.
    pub fn call(&mut self, islot_to_tensor: &BTreeMap<usize, GraphTensor>) -> Result<Vec<GraphTensor>> {
        let mut inputs = Vec::with_capacity(self.islot_aliases.len());
        for islot in 0..self.islot_aliases.len() {
            let tensor = islot_to_tensor
                .get(&islot)
                .ok_or_else(|| Error::UnresolvedSlot {
                    node: self.name.clone(),
                    islot,
                })?;
            self.check_islot(islot, tensor.shape())?;
            inputs.push(tensor.clone());
        }
        self.prepare()?;
        self.run(&inputs)
    }

    fn run(&mut self, inputs: &[GraphTensor]) -> Result<Vec<GraphTensor>> {
        if !self.committed {
            return Err(Error::NotCommitted(self.name.clone()));
        }
        let mut feeds = HashMap::with_capacity(inputs.len());
        for (alias, tensor) in self.islot_aliases.iter().zip(inputs) {
            if let Some(alias) = alias {
                feeds.insert(alias.clone(), tensor.clone());
            }
        }
        let produced = self.builder.execute(&feeds)?;
        self.oslot_aliases
            .iter()
            .enumerate()
            .map(|(oslot, alias)| {
                alias
                    .as_ref()
                    .and_then(|a| produced.get(&a.node).and_then(|outs| outs.get(a.slot)))
                    .cloned()
                    .ok_or_else(|| {
                        Error::msg(format!(
                            "oslot {oslot} of custom node `{}` produced no tensor",
                            self.name
                        ))
                    })
            })
            .collect()
    }
}

impl GraphNode for CustomNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        "Custom"
    }

    fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotRegistry {
        &mut self.slots
    }

    fn oslot_shape(&self, oslot: usize) -> Option<Shape> {
        let alias = self.oslot_alias(oslot)?;
        self.builder.node(&alias.node).ok()?.oslot_shape(alias.slot)
    }

    fn check_islot(&self, islot: usize, shape: &Shape) -> Result<()> {
        match self.islot_alias(islot) {
            Some(alias) => self
                .builder
                .node(&alias.node)?
                .check_islot(alias.slot, shape),
            None => Ok(()),
        }
    }

    fn prepare(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        self.commit()
    }

    fn materialize(
        &mut self,
        _ctx: &BuildContext<'_>,
        inputs: &[GraphTensor],
    ) -> Result<Vec<GraphTensor>> {
        self.run(inputs)
    }

    fn as_custom(&self) -> Option<&CustomNode> {
        Some(self)
    }

    fn as_custom_mut(&mut self) -> Option<&mut CustomNode> {
        Some(self)
    }
}
