//! Neurograph assembles probabilistic sequence models out of typed nodes wired
//! through numbered slots.
//!
//! Nodes expose input slots (islots) and output slots (oslots). A [`Builder`]
//! owns the nodes and the directed links between them, and on
//! [`Builder::commit`] orders them topologically and materializes each one into
//! a shared [`RuntimeContext`]. Nothing is computed: the runtime holds a
//! symbolic graph meant for an external tensor engine.
//!
//! ## A quick guide
//! - Create a [`RuntimeContext`] and a [`Builder`] on top of it.
//! - Add nodes with [`Builder::add_input`] and [`Builder::add_inner`], then wire
//!   them with [`Builder::add_directed_link`].
//! - Group nodes into a reusable sub-graph with [`Builder::create_custom_node`].
//! - Call [`Builder::commit`] and read the produced handles with
//!   [`Builder::output`].
//! - For recurrences, build a cell (see [`cell`]) and drive it with
//!   [`static_unroll`].
//!
//! ## What can you do with it?
//! ```
//! use neurograph_core::{Builder, InnerClass, InputClass, RuntimeContext};
//!
//! let runtime = RuntimeContext::new();
//! let mut builder = Builder::new(runtime.clone());
//! let x = builder.add_input([3], InputClass::Placeholder).unwrap();
//! let y = builder.add_inner([3], 1, InnerClass::default()).unwrap();
//! builder.add_directed_link(&x, &y, 0, 0).unwrap();
//! builder.commit().unwrap();
//!
//! let out = builder.output(&y, 0).unwrap();
//! assert_eq!(out.shape().to_string(), "[?, 3]");
//! assert!(runtime.to_dot().contains("Affine"));
//! ```

mod builder;
pub mod cell;
pub mod config;
mod dtype;
mod error;
pub mod feed;
pub mod node;
mod runtime;
mod shape;
mod unroll;

pub use builder::{Builder, BuilderState, Link};
pub use cell::{NormalTriLCell, RecurrentStep, StepState, TwoEncodersCell};
pub use config::{
    Activation, BuilderConfig, DeterministicConfig, Directives, NormalInputConfig,
    NormalTriLConfig, TwoEncodersConfig,
};
pub use dtype::DType;
pub use error::{Context, Error, Result, SlotKind};
pub use node::{CustomNode, GraphNode, InnerClass, InputClass, SlotRef};
pub use runtime::{GraphTensor, Init, Op, RuntimeContext, Symbol, SymbolId};
pub use shape::{Dim, Shape};
pub use unroll::{static_unroll, Unrolled};
