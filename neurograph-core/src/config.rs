use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{DType, Result};

/// Elementwise nonlinearity applied after an affine layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    None,
    Relu,
    LeakyRelu,
    Tanh,
    Sigmoid,
    Softplus,
}

/// Options of a [`crate::Builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    /// Namespace prefix of every symbol the builder materializes.
    pub scope: String,
    /// Fixes the leading dimension of every input. Dynamic when `None`.
    pub batch_size: Option<usize>,
    pub dtype: DType,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            scope: "main".to_string(),
            batch_size: None,
            dtype: DType::F32,
        }
    }
}

impl BuilderConfig {
    pub fn scoped(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Default::default()
        }
    }
}

/// Feed-forward network from the concatenated inputs to the node's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeterministicConfig {
    /// Hidden layers before the output layer.
    pub num_layers: usize,
    /// Units in the first hidden layer.
    pub num_nodes: usize,
    /// Each hidden layer has `net_grow_rate` times the units of the previous one.
    pub net_grow_rate: f64,
    pub activation: Activation,
    pub output_activation: Activation,
}

impl Default for DeterministicConfig {
    fn default() -> Self {
        Self {
            num_layers: 2,
            num_nodes: 128,
            net_grow_rate: 1.0,
            activation: Activation::Relu,
            output_activation: Activation::None,
        }
    }
}

impl DeterministicConfig {
    /// Units of every hidden layer, in order.
    pub fn hidden_units(&self) -> Vec<usize> {
        (0..self.num_layers)
            .map(|i| {
                let units = self.num_nodes as f64 * self.net_grow_rate.powi(i as i32);
                (units.round() as usize).max(1)
            })
            .collect()
    }
}

/// Normal distribution with a lower-triangular scale, both computed from the
/// node inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalTriLConfig {
    /// Required trailing dimension of the tensor fed to islot 0.
    pub num_features: Option<usize>,
    pub num_layers: usize,
    pub num_nodes: usize,
    pub activation: Activation,
}

impl Default for NormalTriLConfig {
    fn default() -> Self {
        Self {
            num_features: None,
            num_layers: 2,
            num_nodes: 64,
            activation: Activation::Softplus,
        }
    }
}

impl NormalTriLConfig {
    pub fn hidden(&self) -> DeterministicConfig {
        DeterministicConfig {
            num_layers: self.num_layers,
            num_nodes: self.num_nodes,
            activation: self.activation,
            ..Default::default()
        }
    }
}

/// Learned normal input, used as the initial state of recurrent cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalInputConfig {
    /// Standard deviation of the initial `loc` values. Zero initializes to zeros.
    pub loc_init_std: f64,
}

impl Default for NormalInputConfig {
    fn default() -> Self {
        Self { loc_init_std: 0.0 }
    }
}

/// Options of a [`crate::cell::TwoEncodersCell`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TwoEncodersConfig {
    /// Scope of the cell's step graph under the external scope, `TwoEncCell`
    /// when unset. A `_<n>` suffix is added if another cell holds it.
    pub name: Option<String>,
    /// Shared by both encoders.
    pub encoder: DeterministicConfig,
    /// Initial-state inputs registered on the external builder.
    pub init: NormalInputConfig,
}

/// An open bag of named options, parsed into one of the typed configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directives(BTreeMap<String, serde_json::Value>);

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The directives whose key starts with `<prefix>_`, with that prefix
    /// stripped.
    pub fn extract(&self, prefix: &str) -> Directives {
        let head = format!("{prefix}_");
        Directives(
            self.0
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(&head).map(|k| (k.to_string(), v.clone())))
                .collect(),
        )
    }

    /// Parse into a typed config. Unknown keys are rejected.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let map: serde_json::Map<String, serde_json::Value> = self.0.clone().into_iter().collect();
        Ok(serde_json::from_value(serde_json::Value::Object(map))?)
    }
}

impl<K: Into<String>, V: Into<serde_json::Value>> FromIterator<(K, V)> for Directives {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Directives(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn parse_fills_defaults() {
        let cfg: DeterministicConfig = Directives::new()
            .with("num_layers", 1)
            .with("activation", "tanh")
            .parse()
            .unwrap();
        assert_eq!(cfg.num_layers, 1);
        assert_eq!(cfg.num_nodes, 128);
        assert_eq!(cfg.activation, Activation::Tanh);
    }

    #[test]
    fn unknown_keys_fail() {
        let err = Directives::new()
            .with("numlayers", 3)
            .parse::<NormalTriLConfig>()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDirective(_)));
    }

    #[test]
    fn extract_strips_prefix() {
        let dirs: Directives = [
            ("enc_num_nodes", serde_json::json!(16)),
            ("enc_activation", serde_json::json!("relu")),
            ("dec_num_nodes", serde_json::json!(8)),
        ]
        .into_iter()
        .collect();
        let enc = dirs.extract("enc");
        assert_eq!(enc.get("num_nodes"), Some(&serde_json::json!(16)));
        assert!(enc.get("dec_num_nodes").is_none());
        let cfg: DeterministicConfig = enc.parse().unwrap();
        assert_eq!(cfg.num_nodes, 16);
    }

    #[test]
    fn nested_cell_config() {
        let cfg: TwoEncodersConfig = serde_json::from_str(
            r#"{"name": "Enc", "encoder": {"num_layers": 1}, "init": {"loc_init_std": 0.1}}"#,
        )
        .unwrap();
        assert_eq!(cfg.name.as_deref(), Some("Enc"));
        assert_eq!(cfg.encoder.num_layers, 1);
        assert_eq!(cfg.encoder.num_nodes, 128);
        assert_eq!(cfg.init.loc_init_std, 0.1);
    }

    #[test]
    fn grow_rate_scales_hidden_layers() {
        let cfg = DeterministicConfig {
            num_layers: 3,
            num_nodes: 10,
            net_grow_rate: 2.0,
            ..Default::default()
        };
        assert_eq!(cfg.hidden_units(), vec![10, 20, 40]);
    }
}
