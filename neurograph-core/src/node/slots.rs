use std::fmt::Display;

use crate::{Error, Result, Shape};

/// A (node, slot index) pair. Whether the index is an islot or an oslot
/// depends on where the reference is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    pub node: String,
    pub slot: usize,
}

impl SlotRef {
    pub fn new(node: impl Into<String>, slot: usize) -> Self {
        Self {
            node: node.into(),
            slot,
        }
    }
}

impl Display for SlotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.slot)
    }
}

/// Per-node table of connected peers.
///
/// Every islot holds at most one source `(node, oslot)`; an oslot fans out to
/// any number of destinations `(node, islot)`.
#[derive(Debug, Clone, Default)]
pub struct SlotRegistry {
    sources: Vec<Option<SlotRef>>,
    islot_shapes: Vec<Option<Shape>>,
    destinations: Vec<Vec<SlotRef>>,
}

impl SlotRegistry {
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            sources: vec![None; num_inputs],
            islot_shapes: vec![None; num_inputs],
            destinations: vec![Vec::new(); num_outputs],
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.sources.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.destinations.len()
    }

    /// The `(node, oslot)` feeding `islot`, if connected.
    pub fn source(&self, islot: usize) -> Option<&SlotRef> {
        self.sources.get(islot).and_then(Option::as_ref)
    }

    /// Shape of the tensor connected to `islot`.
    pub fn islot_shape(&self, islot: usize) -> Option<&Shape> {
        self.islot_shapes.get(islot).and_then(Option::as_ref)
    }

    pub fn destinations(&self, oslot: usize) -> &[SlotRef] {
        self.destinations.get(oslot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Islots with no source, in index order.
    pub fn unresolved(&self) -> impl Iterator<Item = usize> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_none().then_some(i))
    }

    pub fn is_resolved(&self) -> bool {
        self.sources.iter().all(Option::is_some)
    }

    pub(crate) fn check_islot_free(&self, owner: &str, islot: usize) -> Result<()> {
        match self.sources.get(islot) {
            None => Err(Error::wiring(
                owner,
                format!(
                    "islot {islot} is out of range, the node has {} islots",
                    self.num_inputs()
                ),
            )),
            Some(Some(src)) => Err(Error::wiring(
                owner,
                format!("islot {islot} is already connected to {src}"),
            )),
            Some(None) => Ok(()),
        }
    }

    pub(crate) fn check_oslot(&self, owner: &str, oslot: usize) -> Result<()> {
        if oslot >= self.num_outputs() {
            return Err(Error::wiring(
                owner,
                format!(
                    "oslot {oslot} is out of range, the node has {} oslots",
                    self.num_outputs()
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn connect_islot(
        &mut self,
        owner: &str,
        islot: usize,
        src: SlotRef,
        shape: Option<Shape>,
    ) -> Result<()> {
        self.check_islot_free(owner, islot)?;
        self.sources[islot] = Some(src);
        self.islot_shapes[islot] = shape;
        Ok(())
    }

    pub(crate) fn add_destination(&mut self, owner: &str, oslot: usize, dst: SlotRef) -> Result<()> {
        self.check_oslot(owner, oslot)?;
        self.destinations[oslot].push(dst);
        Ok(())
    }

    pub(crate) fn disconnect_islot(&mut self, islot: usize) -> Option<SlotRef> {
        let src = self.sources.get_mut(islot)?.take();
        self.islot_shapes[islot] = None;
        src
    }

    pub(crate) fn remove_destination(&mut self, oslot: usize, dst: &SlotRef) {
        if let Some(dsts) = self.destinations.get_mut(oslot) {
            dsts.retain(|d| d != dst);
        }
    }
}
