use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard},
};

use petgraph::Graph as PetGraph;
use petgraph::{
    dot::{Config, Dot},
    graph::NodeIndex,
};
use tracing::trace;

use crate::{config::Activation, DType, Error, Result, Shape};

/// Handle to the symbolic runtime that builders materialize into.
///
/// Cloning is cheap and every clone appends to the same symbol table, so a
/// builder, its custom nodes and the cells created against it all share one
/// graph. Dropping the last clone disposes of the graph.
#[derive(Clone, Default)]
pub struct RuntimeContext {
    data: Arc<RwLock<Vec<Symbol>>>,
    names: Arc<RwLock<HashMap<String, usize>>>,
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("symbols", &self.len())
            .finish()
    }
}

impl RuntimeContext {
    /// Create an empty runtime context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to the materialized symbols, in creation order.
    pub fn symbols(&self) -> RwLockReadGuard<'_, Vec<Symbol>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.symbols().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols().is_empty()
    }

    /// Look up a symbol by its (unique) name.
    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.symbols().iter().find(|s| s.name == name).cloned()
    }

    pub fn symbol(&self, id: SymbolId) -> Option<Symbol> {
        self.symbols().get(id.0).cloned()
    }

    /// Append a symbol and return a handle to it. If `name` was used before,
    /// a `_<n>` suffix keeps the new symbol name unique.
    pub fn materialize(&self, name: &str, op: Op, shape: Shape, dtype: DType) -> GraphTensor {
        let name = self.unique_name(name);
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let id = SymbolId(data.len());
        trace!(symbol = %name, %shape, op = %op, "materialize");
        data.push(Symbol {
            id,
            name: name.clone(),
            op,
            shape: shape.clone(),
            dtype,
        });
        GraphTensor {
            id,
            name,
            shape,
            dtype,
        }
    }

    /// Get or create a trainable parameter. Variables are shared by name, so
    /// materializing the same node again reuses its parameters. Reusing a
    /// name with another shape fails with [`Error::VariableShape`].
    pub fn variable(
        &self,
        name: &str,
        init: Init,
        shape: Shape,
        dtype: DType,
    ) -> Result<GraphTensor> {
        match self.find(name) {
            Some(symbol) if matches!(symbol.op, Op::Variable { .. }) => {
                if symbol.shape != shape {
                    return Err(Error::VariableShape {
                        name: name.to_string(),
                        expected: symbol.shape.to_string(),
                        got: shape.to_string(),
                    });
                }
                Ok(symbol.handle())
            }
            _ => Ok(self.materialize(name, Op::Variable { init }, shape, dtype)),
        }
    }

    /// Reserve a scope no other caller of this runtime has been given.
    /// `<base>` first, then `<base>_1`, `<base>_2`, ...
    pub fn unique_scope(&self, base: &str) -> String {
        self.unique_name(base)
    }

    fn unique_name(&self, name: &str) -> String {
        let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
        let mut count = match names.get(name) {
            Some(&count) => count,
            None => {
                names.insert(name.to_string(), 0);
                return name.to_string();
            }
        };
        loop {
            count += 1;
            let candidate = format!("{name}_{count}");
            // Suffixed names can themselves collide with user names.
            if !names.contains_key(&candidate) {
                names.insert(name.to_string(), count);
                names.insert(candidate.clone(), 0);
                return candidate;
            }
        }
    }

    pub fn to_petgraph(&self) -> PetGraph<String, ()> {
        let symbols = self.symbols();
        let mut g = PetGraph::<String, ()>::new();
        let idx_map: Vec<NodeIndex> = symbols
            .iter()
            .map(|s| g.add_node(format!("{}: {}", s.name, s.op)))
            .collect();

        for (i, symbol) in symbols.iter().enumerate() {
            for src in symbol.op.inputs() {
                g.add_edge(idx_map[src.0], idx_map[i], ());
            }
        }
        g
    }

    /// Produce a DOT format string of the materialized graph.
    pub fn to_dot(&self) -> String {
        let g = self.to_petgraph();
        format!("{:?}", Dot::with_config(&g, &[Config::EdgeNoLabel]))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SymbolId(usize);

impl From<SymbolId> for usize {
    fn from(value: SymbolId) -> Self {
        value.0
    }
}

/// A materialized symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub op: Op,
    pub shape: Shape,
    pub dtype: DType,
}

impl Symbol {
    pub fn handle(&self) -> GraphTensor {
        GraphTensor {
            id: self.id,
            name: self.name.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype,
        }
    }
}

/// A handle to a materialized symbol. Performing operations on it does not
/// cause any computation.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphTensor {
    id: SymbolId,
    name: String,
    shape: Shape,
    dtype: DType,
}

impl GraphTensor {
    pub fn id(&self) -> SymbolId {
        self.id
    }

    /// Name of the underlying output symbol.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum Init {
    Zeros,
    Identity,
    /// Normal with zero mean and the given standard deviation.
    Normal { std: f64 },
}

#[derive(PartialEq, Debug, Clone)]
pub enum Op {
    /// Fed with concrete data at execution time.
    Placeholder,
    /// A trainable parameter.
    Variable {
        init: Init,
    },
    /// Concatenation along the trailing axis.
    Concat {
        inputs: Vec<SymbolId>,
    },
    /// input @ weights + bias
    Affine {
        input: SymbolId,
        weights: SymbolId,
        bias: SymbolId,
    },
    Activation {
        input: SymbolId,
        kind: Activation,
    },
    /// Reshape the trailing `d * d` entries into a lower-triangular `d x d`
    /// matrix with a positive diagonal.
    FillTriangular {
        input: SymbolId,
    },
    /// Reparameterized sample `loc + scale_tril @ eps`.
    NormalSample {
        loc: SymbolId,
        scale_tril: SymbolId,
    },
}

impl Op {
    pub fn inputs(&self) -> Vec<SymbolId> {
        match self {
            Op::Placeholder | Op::Variable { .. } => vec![],
            Op::Concat { inputs } => inputs.clone(),
            Op::Affine {
                input,
                weights,
                bias,
            } => vec![*input, *weights, *bias],
            Op::Activation { input, .. } | Op::FillTriangular { input } => vec![*input],
            Op::NormalSample { loc, scale_tril } => vec![*loc, *scale_tril],
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Placeholder => f.write_str("Placeholder"),
            Op::Variable { init } => write!(f, "Variable({init:?})"),
            Op::Concat { inputs } => write!(f, "Concat({})", inputs.len()),
            Op::Affine { .. } => f.write_str("Affine"),
            Op::Activation { kind, .. } => write!(f, "Activation({kind:?})"),
            Op::FillTriangular { .. } => f.write_str("FillTriangular"),
            Op::NormalSample { .. } => f.write_str("NormalSample"),
        }
    }
}
