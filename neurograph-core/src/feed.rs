//! Routing of user dataset keys to the placeholder symbols they feed.

use std::collections::HashMap;

use crate::{bail, Error, Result};

/// Symbol name of the `main` output of the input node `key` in `scope`.
pub fn feed_name(scope: &str, key: &str) -> String {
    format!("{scope}/{key}_main")
}

/// Re-key `data` by [`feed_name`].
pub fn prepare_dataset<V>(scope: &str, data: HashMap<String, V>) -> HashMap<String, V> {
    data.into_iter()
        .map(|(key, value)| (feed_name(scope, &key), value))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitDatasets<V> {
    pub train: HashMap<String, V>,
    pub valid: HashMap<String, V>,
    pub test: HashMap<String, V>,
}

// Manual impl, `V: Default` is not needed.
impl<V> Default for SplitDatasets<V> {
    fn default() -> Self {
        Self {
            train: HashMap::new(),
            valid: HashMap::new(),
            test: HashMap::new(),
        }
    }
}

/// Split keys of the form `<train|valid|test>_<input node>` into three
/// datasets keyed by [`feed_name`].
pub fn prepare_datasets<V>(scope: &str, data: HashMap<String, V>) -> Result<SplitDatasets<V>> {
    let mut split = SplitDatasets::default();
    for (key, value) in data {
        let (set, node) = match key.split_once('_') {
            Some((set, node)) if !node.is_empty() => (set, node),
            _ => return Err(Error::DatasetKey(key)),
        };
        let target = match set {
            "train" => &mut split.train,
            "valid" => &mut split.valid,
            "test" => &mut split.test,
            _ => return Err(Error::DatasetKey(key)),
        };
        target.insert(feed_name(scope, node), value);
    }
    Ok(split)
}

/// Number of full batches in `num_samples` samples.
pub fn num_batches(num_samples: usize, batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        bail!("batch size must be positive");
    }
    if num_samples % batch_size != 0 {
        bail!(
            "the number of samples ({num_samples}) is not divisible by the batch size ({batch_size})"
        );
    }
    Ok(num_samples / batch_size)
}
