use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::{algo::toposort, graph::DiGraph, graph::NodeIndex};
use tracing::{debug, info};

use crate::{
    config::BuilderConfig,
    node::{
        BuildContext, CustomNode, DeterministicNode, GraphNode, InnerClass, InputClass, InputNode,
        NormalTriLNode, SlotRef,
    },
    runtime::GraphTensor,
    Context, Dim, Error, Result, RuntimeContext,
};

/// A directed link `(src, oslot) -> (dst, islot)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub src: String,
    pub oslot: usize,
    pub dst: String,
    pub islot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// Nodes and links can be added.
    Open,
    /// Validated and ordered, waiting for inputs from an enclosing node.
    Planned,
    /// Materialized. Read-only.
    Committed,
    /// Materialization failed. The builder must be rebuilt.
    Failed,
}

/// Owns a set of nodes and the links between their slots, and compiles them
/// into the [`RuntimeContext`] on [`Builder::commit`].
#[derive(Debug)]
pub struct Builder {
    config: BuilderConfig,
    runtime: RuntimeContext,
    nodes: Vec<Box<dyn GraphNode>>,
    index: HashMap<String, usize>,
    links: Vec<Link>,
    counter: usize,
    /// Islots fed from outside the builder, by an enclosing custom node.
    external: BTreeSet<SlotRef>,
    order: Vec<usize>,
    outputs: HashMap<String, Vec<GraphTensor>>,
    state: BuilderState,
}

impl Builder {
    /// Create an empty builder under the default `main` scope.
    pub fn new(runtime: RuntimeContext) -> Self {
        Self::with_config(runtime, BuilderConfig::default())
    }

    pub fn with_config(runtime: RuntimeContext, config: BuilderConfig) -> Self {
        Self {
            config,
            runtime,
            nodes: Vec::new(),
            index: HashMap::new(),
            links: Vec::new(),
            counter: 0,
            external: BTreeSet::new(),
            order: Vec::new(),
            outputs: HashMap::new(),
            state: BuilderState::Open,
        }
    }

    pub fn scope(&self) -> &str {
        &self.config.scope
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn is_committed(&self) -> bool {
        self.state == BuilderState::Committed
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in insertion order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node(&self, name: &str) -> Result<&dyn GraphNode> {
        Ok(self.nodes[self.position(name)?].as_ref())
    }

    pub fn custom_node(&self, name: &str) -> Result<&CustomNode> {
        self.nodes[self.position(name)?]
            .as_custom()
            .with_context(|| format!("`{name}` is not a custom node"))
    }

    pub fn custom_node_mut(&mut self, name: &str) -> Result<&mut CustomNode> {
        let i = self.position(name)?;
        self.nodes[i]
            .as_custom_mut()
            .with_context(|| format!("`{name}` is not a custom node"))
    }

    pub(crate) fn batch(&self) -> Dim {
        self.config.batch_size.map_or(Dim::Dynamic, Dim::Known)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownNode {
                scope: self.scope().to_string(),
                name: name.to_string(),
            })
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            BuilderState::Open => Ok(()),
            BuilderState::Failed => Err(Error::BuilderFailed(self.scope().to_string())),
            BuilderState::Planned | BuilderState::Committed => {
                Err(Error::AlreadyCommitted(self.scope().to_string()))
            }
        }
    }

    fn next_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{prefix}_{}", self.counter);
            self.counter += 1;
            if !self.index.contains_key(&name) {
                return name;
            }
        }
    }

    fn insert(&mut self, node: Box<dyn GraphNode>) -> Result<usize> {
        let name = node.name();
        if name.is_empty() || name.contains('/') {
            return Err(Error::msg(format!(
                "invalid node name `{name}`, names must be non-empty and free of `/`"
            )));
        }
        if self.index.contains_key(name) {
            return Err(Error::NameTaken {
                scope: self.scope().to_string(),
                name: name.to_string(),
            });
        }
        debug!(
            scope = self.scope(),
            node = name,
            class = node.class(),
            islots = node.num_inputs(),
            oslots = node.num_outputs(),
            "add node"
        );
        let i = self.nodes.len();
        self.index.insert(name.to_string(), i);
        self.nodes.push(node);
        Ok(i)
    }

    /// Add a node with no islots. `shape` excludes the batch dimension.
    pub fn add_input(&mut self, shape: impl AsRef<[usize]>, class: InputClass) -> Result<String> {
        self.ensure_open()?;
        let prefix = match class {
            InputClass::Placeholder => "In",
            InputClass::Normal(_) => "NormalIn",
        };
        let name = self.next_name(prefix);
        self.add_input_named(name, shape, class)
    }

    pub fn add_input_named(
        &mut self,
        name: impl Into<String>,
        shape: impl AsRef<[usize]>,
        class: InputClass,
    ) -> Result<String> {
        self.ensure_open()?;
        let node = InputNode::new(name.into(), shape.as_ref().to_vec(), self.batch(), class);
        let i = self.insert(Box::new(node))?;
        Ok(self.nodes[i].name().to_string())
    }

    /// Add a node transforming `num_inputs` tensors into an output of `shape`
    /// (batch dimension excluded).
    pub fn add_inner(
        &mut self,
        shape: impl AsRef<[usize]>,
        num_inputs: usize,
        class: InnerClass,
    ) -> Result<String> {
        self.ensure_open()?;
        let prefix = match class {
            InnerClass::Deterministic(_) => "Det",
            InnerClass::NormalTriL(_) => "NormalTriL",
        };
        let name = self.next_name(prefix);
        self.add_inner_named(name, shape, num_inputs, class)
    }

    pub fn add_inner_named(
        &mut self,
        name: impl Into<String>,
        shape: impl AsRef<[usize]>,
        num_inputs: usize,
        class: InnerClass,
    ) -> Result<String> {
        self.ensure_open()?;
        let name = name.into();
        if num_inputs == 0 {
            return Err(Error::wiring(name, "inner nodes need at least one islot"));
        }
        let batch = self.batch();
        let node: Box<dyn GraphNode> = match class {
            InnerClass::Deterministic(config) => Box::new(DeterministicNode::new(
                name,
                shape.as_ref().to_vec(),
                num_inputs,
                batch,
                config,
            )),
            InnerClass::NormalTriL(config) => Box::new(NormalTriLNode::new(
                name,
                shape.as_ref(),
                num_inputs,
                batch,
                config,
            )),
        };
        let i = self.insert(node)?;
        Ok(self.nodes[i].name().to_string())
    }

    /// Add a composite node whose internal builder is scoped under
    /// `<scope>/<name>`.
    pub fn create_custom_node(
        &mut self,
        num_inputs: usize,
        num_outputs: usize,
        name: impl Into<String>,
    ) -> Result<&mut CustomNode> {
        self.ensure_open()?;
        let name = name.into();
        let config = BuilderConfig {
            scope: format!("{}/{}", self.scope(), name),
            ..self.config.clone()
        };
        let inner = Builder::with_config(self.runtime.clone(), config);
        let i = self.insert(Box::new(CustomNode::new(
            name.clone(),
            num_inputs,
            num_outputs,
            inner,
        )))?;
        self.nodes[i]
            .as_custom_mut()
            .with_context(|| format!("`{name}` is not a custom node"))
    }

    /// Connect oslot `oslot` of `src` to islot `islot` of `dst`.
    pub fn add_directed_link(
        &mut self,
        src: &str,
        dst: &str,
        oslot: usize,
        islot: usize,
    ) -> Result<()> {
        self.ensure_open()?;
        let s = self.position(src)?;
        let d = self.position(dst)?;
        self.nodes[s].slots().check_oslot(src, oslot)?;
        self.nodes[d].slots().check_islot_free(dst, islot)?;
        if self.external.contains(&SlotRef::new(dst, islot)) {
            return Err(Error::wiring(
                dst,
                format!("islot {islot} is fed by the enclosing custom node"),
            ));
        }
        let shape = self.nodes[s].oslot_shape(oslot);
        if let Some(shape) = &shape {
            self.nodes[d].check_islot(islot, shape)?;
        }
        self.nodes[d]
            .slots_mut()
            .connect_islot(dst, islot, SlotRef::new(src, oslot), shape)?;
        self.nodes[s]
            .slots_mut()
            .add_destination(src, oslot, SlotRef::new(dst, islot))?;
        debug!(scope = self.scope(), src, oslot, dst, islot, "add link");
        self.links.push(Link {
            src: src.to_string(),
            oslot,
            dst: dst.to_string(),
            islot,
        });
        Ok(())
    }

    /// Undo [`Builder::add_directed_link`].
    pub fn remove_directed_link(
        &mut self,
        src: &str,
        dst: &str,
        oslot: usize,
        islot: usize,
    ) -> Result<()> {
        self.ensure_open()?;
        let pos = self
            .links
            .iter()
            .position(|l| l.src == src && l.dst == dst && l.oslot == oslot && l.islot == islot)
            .ok_or_else(|| {
                Error::wiring(dst, format!("no link from {src}:{oslot} to islot {islot}"))
            })?;
        self.links.remove(pos);
        let d = self.position(dst)?;
        self.nodes[d].slots_mut().disconnect_islot(islot);
        let s = self.position(src)?;
        self.nodes[s]
            .slots_mut()
            .remove_destination(oslot, &SlotRef::new(dst, islot));
        debug!(scope = self.scope(), src, oslot, dst, islot, "remove link");
        Ok(())
    }

    /// Mark an islot as fed from outside this builder.
    pub(crate) fn mark_external(&mut self, slot: SlotRef) -> Result<()> {
        self.ensure_open()?;
        let node = self.node(&slot.node)?;
        node.slots().check_islot_free(&slot.node, slot.slot)?;
        if !self.external.insert(slot.clone()) {
            return Err(Error::wiring(
                &slot.node,
                format!("islot {} is already aliased", slot.slot),
            ));
        }
        Ok(())
    }

    /// Validate and order the graph.
    pub(crate) fn plan(&mut self) -> Result<()> {
        self.ensure_open()?;
        for node in self.nodes.iter_mut() {
            node.prepare()?;
        }
        for node in &self.nodes {
            if let Some(islot) = node
                .slots()
                .unresolved()
                .find(|&islot| !self.external.contains(&SlotRef::new(node.name(), islot)))
            {
                return Err(Error::UnresolvedSlot {
                    node: node.name().to_string(),
                    islot,
                });
            }
        }
        // Links made while a source shape was still unknown.
        for link in &self.links {
            let src = &self.nodes[self.position(&link.src)?];
            if let Some(shape) = src.oslot_shape(link.oslot) {
                self.nodes[self.position(&link.dst)?].check_islot(link.islot, &shape)?;
            }
        }
        self.order = self.topological_order()?;
        self.state = BuilderState::Planned;
        Ok(())
    }

    pub(crate) fn link_graph(&self) -> Result<(DiGraph<usize, ()>, Vec<NodeIndex>)> {
        let mut graph = DiGraph::<usize, ()>::with_capacity(self.nodes.len(), self.links.len());
        let idx: Vec<NodeIndex> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
        let mut edges = self
            .links
            .iter()
            .map(|l| Ok((self.position(&l.src)?, self.position(&l.dst)?)))
            .collect::<Result<Vec<_>>>()?;
        // Wiring order must not leak into the build order.
        edges.sort_unstable();
        for (s, d) in edges {
            graph.add_edge(idx[s], idx[d], ());
        }
        Ok((graph, idx))
    }

    fn topological_order(&self) -> Result<Vec<usize>> {
        let (graph, _) = self.link_graph()?;
        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|n| graph[n]).collect()),
            Err(cycle) => Err(Error::Cycle {
                scope: self.scope().to_string(),
                node: self.nodes[graph[cycle.node_id()]].name().to_string(),
            }),
        }
    }

    /// Materialize every node in dependency order. `feeds` provides the
    /// tensors of external islots.
    pub(crate) fn execute(
        &mut self,
        feeds: &HashMap<SlotRef, GraphTensor>,
    ) -> Result<HashMap<String, Vec<GraphTensor>>> {
        if self.state != BuilderState::Planned {
            return Err(Error::NotCommitted(self.scope().to_string()));
        }
        let ctx = BuildContext {
            runtime: &self.runtime,
            scope: &self.config.scope,
            dtype: self.config.dtype,
        };
        let mut produced: HashMap<String, Vec<GraphTensor>> = HashMap::with_capacity(self.order.len());
        for &i in &self.order {
            let node = &mut self.nodes[i];
            let mut inputs = Vec::with_capacity(node.num_inputs());
            for islot in 0..node.num_inputs() {
                let unresolved = || Error::UnresolvedSlot {
                    node: node.name().to_string(),
                    islot,
                };
                let tensor = match node.slots().source(islot) {
                    Some(src) => produced
                        .get(&src.node)
                        .and_then(|outs| outs.get(src.slot))
                        .cloned()
                        .ok_or_else(unresolved)?,
                    None => feeds
                        .get(&SlotRef::new(node.name(), islot))
                        .cloned()
                        .ok_or_else(unresolved)?,
                };
                node.check_islot(islot, tensor.shape())?;
                inputs.push(tensor);
            }
            let outputs = node.materialize(&ctx, &inputs)?;
            if outputs.len() != node.num_outputs() {
                return Err(Error::msg(format!(
                    "node `{}` produced {} tensors for {} oslots",
                    node.name(),
                    outputs.len(),
                    node.num_outputs()
                )));
            }
            produced.insert(node.name().to_string(), outputs);
        }
        Ok(produced)
    }

    /// Validate the graph and materialize it into the runtime.
    ///
    /// Fails with [`Error::UnresolvedSlot`] if an islot has no source, with
    /// [`Error::Shape`] if a linked shape does not fit and with
    /// [`Error::Cycle`] if the links form a cycle; the builder stays open in
    /// these cases. A failure while materializing leaves it
    /// [`BuilderState::Failed`]. A second call after a successful commit fails
    /// with [`Error::AlreadyCommitted`].
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        info!(
            scope = self.scope(),
            nodes = self.nodes.len(),
            links = self.links.len(),
            "commit"
        );
        self.plan()?;
        match self.execute(&HashMap::new()) {
            Ok(outputs) => {
                self.outputs = outputs;
                self.state = BuilderState::Committed;
                info!(
                    scope = self.scope(),
                    symbols = self.runtime.len(),
                    "committed"
                );
                Ok(())
            }
            Err(e) => {
                self.state = BuilderState::Failed;
                Err(e)
            }
        }
    }

    /// Materialize a single node with explicit islot tensors, leaving the
    /// builder's links aside. Used to invoke a step graph repeatedly, so the
    /// builder must be frozen first.
    pub fn invoke_node(
        &mut self,
        name: &str,
        islot_to_tensor: &BTreeMap<usize, GraphTensor>,
    ) -> Result<Vec<GraphTensor>> {
        match self.state {
            BuilderState::Planned | BuilderState::Committed => {}
            BuilderState::Failed => return Err(Error::BuilderFailed(self.scope().to_string())),
            BuilderState::Open => return Err(Error::NotCommitted(self.scope().to_string())),
        }
        let i = self.position(name)?;
        let ctx = BuildContext {
            runtime: &self.runtime,
            scope: &self.config.scope,
            dtype: self.config.dtype,
        };
        let node = &mut self.nodes[i];
        if let Some((&islot, _)) = islot_to_tensor.range(node.num_inputs()..).next() {
            return Err(Error::wiring(
                name,
                format!(
                    "islot {islot} is out of range, the node has {} islots",
                    node.num_inputs()
                ),
            ));
        }
        let mut inputs = Vec::with_capacity(node.num_inputs());
        for islot in 0..node.num_inputs() {
            let tensor = islot_to_tensor
                .get(&islot)
                .ok_or_else(|| Error::UnresolvedSlot {
                    node: name.to_string(),
                    islot,
                })?;
            node.check_islot(islot, tensor.shape())?;
            inputs.push(tensor.clone());
        }
        node.prepare()?;
        node.materialize(&ctx, &inputs)
    }

    /// Output tensors of a node, one per oslot.
    pub fn outputs(&self, name: &str) -> Result<&[GraphTensor]> {
        if !self.is_committed() {
            return Err(Error::NotCommitted(self.scope().to_string()));
        }
        self.position(name)?;
        self.outputs
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::NotCommitted(name.to_string()))
    }

    pub fn output(&self, name: &str, oslot: usize) -> Result<&GraphTensor> {
        self.outputs(name)?.get(oslot).ok_or_else(|| {
            Error::wiring(name, format!("oslot {oslot} is out of range"))
        })
    }

    /// Node name to the symbol name of its oslot 0. Empty before commit.
    pub fn otensor_names(&self) -> BTreeMap<String, String> {
        self.outputs
            .iter()
            .filter_map(|(node, outs)| outs.first().map(|t| (node.clone(), t.name().to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn builder() -> Builder {
        Builder::new(RuntimeContext::new())
    }

    #[test]
    fn generated_names_use_the_counter() {
        let mut b = builder();
        let a = b.add_input([3], InputClass::Placeholder).unwrap();
        let c = b.add_inner([3], 1, InnerClass::default()).unwrap();
        assert_eq!(a, "In_0");
        assert_eq!(c, "Det_1");
        assert_eq!(b.node_names().collect::<Vec<_>>(), vec!["In_0", "Det_1"]);
    }

    #[test]
    fn names_are_unique() {
        let mut b = builder();
        b.add_input_named("x", [3], InputClass::Placeholder).unwrap();
        let err = b
            .add_input_named("x", [2], InputClass::Placeholder)
            .unwrap_err();
        assert!(matches!(err, Error::NameTaken { .. }));
    }

    #[test]
    fn slash_is_rejected_in_names() {
        let mut b = builder();
        assert!(b
            .add_input_named("a/b", [3], InputClass::Placeholder)
            .is_err());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut b = builder();
        let n = b.add_inner([3], 1, InnerClass::default()).unwrap();
        b.add_directed_link(&n, &n, 0, 0).unwrap();
        let err = b.commit().unwrap_err();
        assert!(matches!(err, Error::Cycle { node, .. } if node == n));
    }

    #[test]
    fn batch_size_fixes_leading_dim() {
        let mut b = Builder::with_config(
            RuntimeContext::new(),
            BuilderConfig {
                batch_size: Some(8),
                ..Default::default()
            },
        );
        let x = b.add_input([4], InputClass::Placeholder).unwrap();
        b.commit().unwrap();
        assert_eq!(b.output(&x, 0).unwrap().shape(), &Shape::with_batch(Dim::Known(8), [4]));
    }

    #[test]
    fn outputs_need_a_commit() {
        let mut b = builder();
        let x = b.add_input([4], InputClass::Placeholder).unwrap();
        assert!(matches!(b.outputs(&x), Err(Error::NotCommitted(_))));
        assert!(b.otensor_names().is_empty());
    }
}
