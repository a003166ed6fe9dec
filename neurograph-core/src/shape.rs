use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// One dimension of a symbolic shape. The batch dimension is usually
/// [`Dim::Dynamic`] until a batch size is fixed on the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Dynamic,
    Known(usize),
}

impl Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dynamic => f.write_str("?"),
            Self::Known(n) => write!(f, "{n}"),
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Self::Known(value)
    }
}

/// Shape of a symbol, batch dimension included when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<Dim>);

impl Shape {
    pub fn new(dims: impl IntoIterator<Item = Dim>) -> Self {
        Self(dims.into_iter().collect())
    }

    /// A shape with fully known dimensions and no batch axis.
    pub fn fixed(dims: impl AsRef<[usize]>) -> Self {
        Self(dims.as_ref().iter().copied().map(Dim::Known).collect())
    }

    /// Prepend a dynamic batch axis to `features`.
    pub fn batched(features: impl AsRef<[usize]>) -> Self {
        Self::with_batch(Dim::Dynamic, features)
    }

    pub fn with_batch(batch: Dim, features: impl AsRef<[usize]>) -> Self {
        let mut dims = Vec::with_capacity(features.as_ref().len() + 1);
        dims.push(batch);
        dims.extend(features.as_ref().iter().copied().map(Dim::Known));
        Self(dims)
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn batch(&self) -> Option<Dim> {
        self.0.first().copied()
    }

    /// The trailing (feature) dimension.
    pub fn last(&self) -> Option<Dim> {
        self.0.last().copied()
    }

    /// The known size of the trailing dimension.
    pub fn last_known(&self) -> Option<usize> {
        match self.last() {
            Some(Dim::Known(n)) => Some(n),
            _ => None,
        }
    }

    /// Everything but the batch axis.
    pub fn features(&self) -> &[Dim] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Replace the trailing dimension.
    pub fn with_last(&self, last: usize) -> Self {
        let mut dims = self.0.clone();
        match dims.last_mut() {
            Some(d) => *d = Dim::Known(last),
            None => dims.push(Dim::Known(last)),
        }
        Self(dims)
    }

    /// Append a trailing dimension.
    pub fn extended(&self, last: usize) -> Self {
        let mut dims = self.0.clone();
        dims.push(Dim::Known(last));
        Self(dims)
    }

    pub fn element_count(&self) -> Option<usize> {
        self.0
            .iter()
            .map(|d| match d {
                Dim::Known(n) => Some(*n),
                Dim::Dynamic => None,
            })
            .product()
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batched_display() {
        assert_eq!(Shape::batched([3, 4]).to_string(), "[?, 3, 4]");
    }

    #[test]
    fn with_last_replaces_feature_dim() {
        let s = Shape::batched([5]).with_last(2);
        assert_eq!(s, Shape::batched([2]));
        assert_eq!(s.last_known(), Some(2));
    }

    #[test]
    fn element_count_needs_known_dims() {
        assert_eq!(Shape::fixed([2, 3]).element_count(), Some(6));
        assert_eq!(Shape::batched([3]).element_count(), None);
    }
}
