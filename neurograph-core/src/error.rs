use std::{convert::Infallible, fmt::Display};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A slot index out of a node's declared range, an islot that is already
    /// fed, or a link that does not exist.
    #[error("wiring error on node `{node}`: {msg}")]
    Wiring { node: String, msg: String },

    /// The incoming tensor shape does not fit what the node expects.
    #[error("shape error on node `{node}` islot {islot}: expected {expected}, got {got}")]
    Shape {
        node: String,
        islot: usize,
        expected: String,
        got: String,
    },

    /// A shared variable requested again with a different shape.
    #[error("variable `{name}` exists with shape {expected}, requested {got}")]
    VariableShape {
        name: String,
        expected: String,
        got: String,
    },

    #[error("islot {islot} of node `{node}` has no incoming link")]
    UnresolvedSlot { node: String, islot: usize },

    #[error("cycle detected in builder `{scope}` through node `{node}`")]
    Cycle { scope: String, node: String },

    #[error("{kind} {index} is out of range for custom node `{node}` with {len} {kind}s")]
    Range {
        node: String,
        kind: SlotKind,
        index: usize,
        len: usize,
    },

    #[error("{kind} {index} of custom node `{node}` was already declared")]
    DuplicateDeclaration {
        node: String,
        kind: SlotKind,
        index: usize,
    },

    #[error("`{0}` is not implemented for this cell")]
    NotImplemented(&'static str),

    #[error("dataset key `{0}` must start with one of `train_`, `valid_` or `test_`")]
    DatasetKey(String),

    #[error("no node named `{name}` in builder `{scope}`")]
    UnknownNode { scope: String, name: String },

    #[error("a node named `{name}` already exists in builder `{scope}`")]
    NameTaken { scope: String, name: String },

    #[error("`{0}` has already been committed")]
    AlreadyCommitted(String),

    #[error("`{0}` must be committed first")]
    NotCommitted(String),

    #[error("builder `{0}` failed a previous commit and must be rebuilt")]
    BuilderFailed(String),

    #[error("invalid directives: {0}")]
    InvalidDirective(#[from] serde_json::Error),

    #[error("Message: {0}")]
    Msg(String),

    #[error("{inner}\n{backtrace}")]
    WithBacktrace {
        inner: Box<Self>,
        backtrace: Box<std::backtrace::Backtrace>,
    },
}

/// Which side of a node a slot index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Islot,
    Oslot,
}

impl Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Islot => f.write_str("islot"),
            Self::Oslot => f.write_str("oslot"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new error based on a printable error message.
    pub fn msg<M: Display>(msg: M) -> Self {
        Self::Msg(msg.to_string()).bt()
    }

    pub fn wiring(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Wiring {
            node: node.into(),
            msg: msg.into(),
        }
    }

    pub fn bt(self) -> Self {
        let backtrace = std::backtrace::Backtrace::capture();
        match backtrace.status() {
            std::backtrace::BacktraceStatus::Disabled
            | std::backtrace::BacktraceStatus::Unsupported => self,
            _ => Self::WithBacktrace {
                inner: Box::new(self),
                backtrace: Box::new(backtrace),
            },
        }
    }

    /// The error with any backtrace wrapper removed.
    pub fn root(&self) -> &Self {
        match self {
            Self::WithBacktrace { inner, .. } => inner.root(),
            other => other,
        }
    }
}

#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::Error::Msg(format!($msg).into()).bt())
    };
    ($err:expr $(,)?) => {
        return Err($crate::Error::Msg(format!($err).into()).bt())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($fmt, $($arg)*).into()).bt())
    };
}

pub(crate) mod private {
    pub trait Sealed {}

    impl<T> Sealed for Option<T> {}
}

/// Turn a missing value into an error carrying a message.
///
/// Inspired by [`anyhow::Context`].
pub trait Context<T, E>: private::Sealed {
    /// Fail with `context` when the value is missing.
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static;

    /// Like [`Context::context`], with the message built only on failure.
    fn with_context<C, F>(self, f: F) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> Context<T, Infallible> for Option<T> {
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Some(ok) => Ok(ok),
            None => Err(Error::msg(context)),
        }
    }

    fn with_context<C, F>(self, context: F) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        match self {
            Some(ok) => Ok(ok),
            None => Err(Error::msg(context())),
        }
    }
}
